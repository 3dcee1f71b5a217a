//! API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment as returned by `GET /projects/{id}/deployments`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDto {
    pub id: i64,
    #[serde(default)]
    pub version: String,
    pub status: String,
    #[serde(default)]
    pub environment_id: Option<i64>,
    #[serde(default)]
    pub environment_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Deployment trigger request (`POST /deploy`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub project_id: i64,
    pub environment_id: i64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Deployment trigger response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub success: bool,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Status change pushed on the `deployments` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    pub deployment_id: i64,
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub environment_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Legacy push form carrying a full deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyDeploymentPayload {
    pub deployment: DeploymentDto,
}

/// Push channel message, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    #[serde(rename = "deployment_status_update")]
    DeploymentStatusUpdate(StatusUpdatePayload),

    #[serde(rename = "deployment")]
    Deployment(LegacyDeploymentPayload),

    #[serde(other)]
    Unknown,
}
