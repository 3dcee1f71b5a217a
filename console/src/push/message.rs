//! Push message normalization

use chrono::{DateTime, Utc};
use openapi_client::models::PushMessage;
use tracing::debug;

use crate::errors::ConsoleError;
use crate::models::deployment::{record_from_status_update, DeploymentRecord};

/// Decode a push payload into a deployment record.
///
/// Both the status-update form and the legacy full-record form normalize to a
/// record. Unknown message types yield `Ok(None)`.
pub fn decode(payload: &[u8], received_at: DateTime<Utc>) -> Result<Option<DeploymentRecord>, ConsoleError> {
    let message: PushMessage = serde_json::from_slice(payload)?;

    match message {
        PushMessage::DeploymentStatusUpdate(update) => {
            record_from_status_update(update, received_at).map(Some)
        }
        PushMessage::Deployment(legacy) => DeploymentRecord::try_from(legacy.deployment).map(Some),
        PushMessage::Unknown => {
            debug!("Ignoring push message of unknown type");
            Ok(None)
        }
    }
}
