//! Polling fallback workers
//!
//! The fast poll keeps the list fresh while deployments are in flight and nudges
//! the backend when the push channel is down. The slow poll is a best-effort
//! safety net.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::ConsoleError;
use crate::push::client::PushHandle;
use crate::push::fsm::ConnectionHealth;
use crate::sync::feed::DeploymentFeed;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Fast poll interval
    pub fast_interval: Duration,

    /// Slow poll interval
    pub slow_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(5),
            slow_interval: Duration::from_secs(120),
        }
    }
}

fn push_connected(push: Option<&PushHandle>) -> bool {
    push.map(|handle| handle.health() == ConnectionHealth::Connected)
        .unwrap_or(false)
}

/// Run the fast poller
pub async fn run_fast<S, F>(
    options: &Options,
    feed: &DeploymentFeed,
    push: Option<&PushHandle>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Fast poller starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Fast poller shutting down...");
                return;
            }
            _ = sleep_fn(options.fast_interval) => {}
        }

        if !push_connected(push) {
            debug!("Push channel not connected, syncing active deployments...");
            if let Err(e) = feed.sync_all_active().await {
                warn!("Sync of active deployments failed: {}", e);
            }
        }

        match feed.refresh().await {
            Ok(outcome) if outcome.changed() => {
                debug!("Fast poll applied {} changes", outcome.transitions.len());
            }
            Ok(_) => {}
            Err(ConsoleError::FeedClosed) => {
                info!("Deployment feed closed, fast poller stopping...");
                return;
            }
            Err(e) => warn!("Fast poll failed: {}", e),
        }
    }
}

/// Run the slow poller. Errors are swallowed.
pub async fn run_slow<S, F>(
    options: &Options,
    feed: &DeploymentFeed,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Slow poller starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Slow poller shutting down...");
                return;
            }
            _ = sleep_fn(options.slow_interval) => {}
        }

        if let Err(e) = feed.sync_all_active().await {
            debug!("Slow poll sync failed: {}", e);
        }
        match feed.refresh().await {
            Ok(_) => debug!("Slow poll completed"),
            Err(ConsoleError::FeedClosed) => return,
            Err(e) => debug!("Slow poll failed: {}", e),
        }
    }
}
