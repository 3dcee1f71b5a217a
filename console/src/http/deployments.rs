//! Deployment API client

use async_trait::async_trait;
use openapi_client::models::{DeployRequest, DeployResponse, DeploymentDto};
use tracing::warn;

use crate::errors::ConsoleError;
use crate::http::client::HttpClient;
use crate::models::deployment::DeploymentRecord;

/// Backend operations the reconciliation engine depends on
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Authoritative snapshot of a project's deployments
    async fn list_deployments(&self, project_id: &str) -> Result<Vec<DeploymentRecord>, ConsoleError>;

    /// Fire the CI trigger for a deployment
    async fn trigger_deployment(&self, request: &DeployRequest) -> Result<DeployResponse, ConsoleError>;

    /// Ask the backend to refresh its view of in-flight CI jobs
    async fn sync_all_active(&self) -> Result<(), ConsoleError>;
}

/// Convert a snapshot, dropping entries that cannot be understood
pub fn records_from_dtos(dtos: Vec<DeploymentDto>) -> Vec<DeploymentRecord> {
    dtos.into_iter()
        .filter_map(|dto| {
            let id = dto.id;
            match DeploymentRecord::try_from(dto) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping deployment {} from snapshot: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl DeploymentApi for HttpClient {
    async fn list_deployments(&self, project_id: &str) -> Result<Vec<DeploymentRecord>, ConsoleError> {
        let path = format!("/projects/{}/deployments", project_id);
        let dtos: Vec<DeploymentDto> = self.get(&path).await?;
        Ok(records_from_dtos(dtos))
    }

    async fn trigger_deployment(&self, request: &DeployRequest) -> Result<DeployResponse, ConsoleError> {
        self.post("/deploy", request).await
    }

    async fn sync_all_active(&self) -> Result<(), ConsoleError> {
        self.post_empty("/sync-all-active-deployments").await
    }
}
