//! Notification emitter
//!
//! Raises one alert per terminal transition of a deployment.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use openapi_server::models::NotificationView;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::models::deployment::{DeploymentRecord, DeploymentStatus, RecordId};

/// Alert level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Failure,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Success => "success",
            NotificationLevel::Failure => "failure",
        }
    }
}

/// A user-visible deployment alert
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub deployment_id: RecordId,
    pub status: DeploymentStatus,
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    fn for_record(record: &DeploymentRecord) -> Self {
        let (level, verb) = match record.status {
            DeploymentStatus::Failed => (NotificationLevel::Failure, "failed"),
            _ => (NotificationLevel::Success, "succeeded"),
        };
        let environment = if record.environment.name.is_empty() {
            "unknown environment"
        } else {
            record.environment.name.as_str()
        };

        Self {
            deployment_id: record.id.clone(),
            status: record.status,
            level,
            message: format!(
                "Deployment of {} to {} {}",
                record.version, environment, verb
            ),
        }
    }

    pub fn to_view(&self) -> NotificationView {
        NotificationView {
            deployment_id: self.deployment_id.to_string(),
            level: self.level.as_str().to_string(),
            message: self.message.clone(),
        }
    }
}

/// Destination for alerts
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes alerts to the log
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: &Notification) {
        match notification.level {
            NotificationLevel::Success => info!("{}", notification.message),
            NotificationLevel::Failure => warn!("{}", notification.message),
        }
    }
}

/// Forwards alerts to render-layer subscribers
pub struct ChannelSink {
    tx: broadcast::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(tx: broadcast::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: &Notification) {
        // no subscribers is fine
        let _ = self.tx.send(notification.clone());
    }
}

/// Emits each `(deployment, terminal status)` alert at most once per session
pub struct NotificationEmitter {
    sinks: Vec<Arc<dyn NotificationSink>>,
    fired: Mutex<HashSet<(RecordId, DeploymentStatus)>>,
}

impl NotificationEmitter {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self {
            sinks,
            fired: Mutex::new(HashSet::new()),
        }
    }

    /// Handle a record transition. Returns true if an alert fired.
    ///
    /// Fires only when a known record changes status into a terminal one.
    /// Records first seen already terminal are history, not transitions.
    pub fn on_record_transition(
        &self,
        previous: Option<&DeploymentRecord>,
        next: &DeploymentRecord,
    ) -> bool {
        let Some(previous) = previous else {
            return false;
        };
        if previous.status == next.status || !next.status.is_terminal() {
            return false;
        }

        {
            let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
            if !fired.insert((next.id.clone(), next.status)) {
                return false;
            }
        }

        let notification = Notification::for_record(next);
        for sink in &self.sinks {
            sink.notify(&notification);
        }
        true
    }
}

impl Default for NotificationEmitter {
    fn default() -> Self {
        Self::new(vec![Arc::new(LogSink)])
    }
}
