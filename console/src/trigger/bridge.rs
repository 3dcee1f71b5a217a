//! Deployment trigger bridge
//!
//! Seeds a speculative record as soon as a deployment has been triggered so the
//! list shows it before the backend reports it.

use std::sync::Arc;

use chrono::Utc;
use openapi_client::models::{DeployRequest, DeployResponse};
use tracing::info;

use crate::errors::ConsoleError;
use crate::http::deployments::DeploymentApi;
use crate::models::deployment::{
    DeploymentRecord, DeploymentStatus, EntityRef, RecordId, RecordOrigin,
};
use crate::sync::feed::DeploymentFeed;
use crate::utils::auto_version;

/// What the operator asked for
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    pub environment: EntityRef,

    /// Empty means auto-generate
    pub version: String,
    pub notes: Option<String>,
    pub triggered_by: String,
}

pub struct TriggerBridge {
    feed: Arc<DeploymentFeed>,
    api: Arc<dyn DeploymentApi>,
    version_prefix: String,
}

impl TriggerBridge {
    pub fn new(feed: Arc<DeploymentFeed>, api: Arc<dyn DeploymentApi>, version_prefix: &str) -> Self {
        Self {
            feed,
            api,
            version_prefix: version_prefix.to_string(),
        }
    }

    /// Trigger a deployment through the CI and seed its speculative record
    pub async fn trigger(&self, mut context: TriggerContext) -> Result<DeploymentRecord, ConsoleError> {
        let project_id = self.feed.project().id.ok_or_else(|| {
            ConsoleError::ValidationError(format!(
                "Project id {} is not numeric",
                self.feed.project_id()
            ))
        })?;
        let environment_id = context.environment.id.ok_or_else(|| {
            ConsoleError::ValidationError("An environment id is required".to_string())
        })?;
        if context.version.trim().is_empty() {
            context.version = auto_version(&self.version_prefix, Utc::now());
        }

        let request = DeployRequest {
            project_id,
            environment_id,
            version: context.version.clone(),
            notes: context.notes.clone(),
        };
        let response = self.api.trigger_deployment(&request).await?;
        if !response.success {
            return Err(ConsoleError::TriggerRejected(
                response
                    .message
                    .unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        self.on_triggered(&context, &response).await
    }

    /// Hand the speculative record for an accepted trigger to the feed
    pub async fn on_triggered(
        &self,
        context: &TriggerContext,
        response: &DeployResponse,
    ) -> Result<DeploymentRecord, ConsoleError> {
        let record = DeploymentRecord {
            id: RecordId::local(),
            version: context.version.clone(),
            status: DeploymentStatus::Pending,
            environment: context.environment.clone(),
            project: self.feed.project(),
            build_number: response.build_number,
            triggered_by: context.triggered_by.clone(),
            created_at: Utc::now(),
            completed_at: None,
            origin: RecordOrigin::Speculative,
            created_at_provisional: false,
        };

        info!(
            "Deployment of {} to {} triggered (build {})",
            record.version,
            record.environment.name,
            record
                .build_number
                .map(|b| b.to_string())
                .unwrap_or_else(|| "pending".to_string())
        );
        self.feed.apply(vec![record.clone()]).await?;
        Ok(record)
    }
}
