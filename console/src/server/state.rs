//! Server state

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::notify::emitter::Notification;
use crate::push::client::PushHandle;
use crate::sync::feed::DeploymentFeed;
use crate::trigger::bridge::TriggerBridge;

/// Server state shared across handlers
pub struct ServerState {
    pub feed: Arc<DeploymentFeed>,
    pub bridge: Arc<TriggerBridge>,

    /// `None` when the push channel is disabled
    pub push: Option<PushHandle>,
    pub notifications: broadcast::Sender<Notification>,

    /// Fires once on shutdown; ends open event streams
    pub shutdown: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(
        feed: Arc<DeploymentFeed>,
        bridge: Arc<TriggerBridge>,
        push: Option<PushHandle>,
        notifications: broadcast::Sender<Notification>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            feed,
            bridge,
            push,
            notifications,
            shutdown,
        }
    }
}
