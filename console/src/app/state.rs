//! Application state management

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::cache::active_set::ActiveSetCache;
use crate::errors::ConsoleError;
use crate::http::deployments::DeploymentApi;
use crate::notify::emitter::{ChannelSink, LogSink, Notification, NotificationEmitter};
use crate::storage::layout::StorageLayout;
use crate::sync::feed::{DeploymentFeed, FeedOptions};
use crate::trigger::bridge::TriggerBridge;

const NOTIFICATION_CAPACITY: usize = 64;

/// Main application state
pub struct AppState {
    /// Backend API
    pub api: Arc<dyn DeploymentApi>,

    /// Active-set cache
    pub cache: Arc<ActiveSetCache>,

    /// Deployment alerts
    pub emitter: Arc<NotificationEmitter>,

    /// Alerts forwarded to render-layer subscribers
    pub notifications: broadcast::Sender<Notification>,

    /// Reconciled deployment list
    pub feed: Arc<DeploymentFeed>,

    /// Trigger bridge
    pub bridge: Arc<TriggerBridge>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(
        layout: &StorageLayout,
        feed_options: FeedOptions,
        version_prefix: &str,
        api: Arc<dyn DeploymentApi>,
    ) -> Result<Self, ConsoleError> {
        info!("Initializing application state...");

        layout.setup().await?;
        let cache = Arc::new(ActiveSetCache::new(layout.cache_dir()));

        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let emitter = Arc::new(NotificationEmitter::new(vec![
            Arc::new(LogSink),
            Arc::new(ChannelSink::new(notifications.clone())),
        ]));

        let feed = Arc::new(DeploymentFeed::new(
            feed_options,
            cache.clone(),
            emitter.clone(),
            api.clone(),
        ));
        let bridge = Arc::new(TriggerBridge::new(feed.clone(), api.clone(), version_prefix));

        Ok(Self {
            api,
            cache,
            emitter,
            notifications,
            feed,
            bridge,
        })
    }

    /// Stop accepting updates and persist the active set
    pub async fn shutdown(&self) -> Result<(), ConsoleError> {
        self.feed.teardown().await
    }
}
