//! Render-layer API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// A deployment row as rendered by the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    pub id: String,
    pub version: String,
    pub status: String,
    pub environment_id: Option<i64>,
    pub environment_name: String,
    pub project_id: Option<i64>,
    pub project_name: String,
    pub build_number: Option<u64>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentView>,
    pub total: usize,
}

/// Push channel health as shown in the console header
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    /// `CONNECTED`, `DISCONNECTED` or `RECONNECTING`
    pub health: String,
    pub failed_attempts: u32,
    pub retries_exhausted: bool,
}

/// Result of a manual refresh or reconnect request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

/// Body of a deployment trigger request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDeploymentBody {
    pub environment_id: i64,
    pub environment_name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

/// Alert raised when a deployment reaches a terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub deployment_id: String,
    /// `success` or `failure`
    pub level: String,
    pub message: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
