//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ConsoleError;
use crate::http::client::HttpClient;
use crate::push::client::PushHandle;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{poller, push};

/// Run the deploy console
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ConsoleError> {
    info!("Initializing deploy console...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start deploy console: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), ConsoleError> {
    let app_state = init_app_state(options, shutdown_manager).await?;

    // cached in-flight deployments first, then the authoritative list
    app_state.feed.resume().await?;
    if let Err(e) = app_state.feed.refresh().await {
        warn!("Initial deployment fetch failed, polling will retry: {}", e);
    }

    let push_handle = if options.enable_push {
        Some(
            init_push_worker(
                options,
                app_state.clone(),
                shutdown_manager,
                shutdown_tx.subscribe(),
            )
            .await?,
        )
    } else {
        info!("Push channel disabled, relying on polling");
        None
    };

    if options.enable_poller {
        init_poller_workers(
            options.poller.clone(),
            app_state.clone(),
            push_handle.clone(),
            shutdown_manager,
            &shutdown_tx,
        )
        .await?;
    }

    if options.enable_server {
        init_server(
            options,
            app_state.clone(),
            push_handle.clone(),
            shutdown_tx.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    shutdown_manager.with_push_handle(push_handle);
    Ok(())
}

async fn init_app_state(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, ConsoleError> {
    let http_client = Arc::new(HttpClient::new(
        &options.backend_base_url,
        options.api_token.clone(),
        options.request_timeout,
    )?);

    let app_state = AppState::init(
        &options.storage.layout,
        options.feed.clone(),
        &options.version_prefix,
        http_client,
    )
    .await?;

    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    Ok(app_state)
}

async fn init_push_worker(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<PushHandle, ConsoleError> {
    info!("Initializing push worker...");

    let connector = push::connector(&options.push, options.api_token.clone())?;
    let (client, handle) = push::client(&options.push, connector);
    let feed = app_state.feed.clone();

    let push_handle = tokio::spawn(async move {
        push::run(
            client,
            feed,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_push_worker_handle(push_handle)?;
    Ok(handle)
}

async fn init_poller_workers(
    options: poller::Options,
    app_state: Arc<AppState>,
    push_handle: Option<PushHandle>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<(), ConsoleError> {
    info!("Initializing poller workers...");

    let fast_options = options.clone();
    let fast_feed = app_state.feed.clone();
    let mut fast_shutdown_rx = shutdown_tx.subscribe();
    let fast_handle = tokio::spawn(async move {
        poller::run_fast(
            &fast_options,
            fast_feed.as_ref(),
            push_handle.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = fast_shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    let slow_feed = app_state.feed.clone();
    let mut slow_shutdown_rx = shutdown_tx.subscribe();
    let slow_handle = tokio::spawn(async move {
        poller::run_slow(
            &options,
            slow_feed.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = slow_shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_poller_worker_handles(fast_handle, slow_handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    push_handle: Option<PushHandle>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ConsoleError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        app_state.feed.clone(),
        app_state.bridge.clone(),
        push_handle,
        app_state.notifications.clone(),
        shutdown_tx,
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    push: Option<PushHandle>,
    server_handle: Option<JoinHandle<Result<(), ConsoleError>>>,
    push_worker_handle: Option<JoinHandle<()>>,
    fast_poller_handle: Option<JoinHandle<()>>,
    slow_poller_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            push: None,
            server_handle: None,
            push_worker_handle: None,
            fast_poller_handle: None,
            slow_poller_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), ConsoleError> {
        if self.app_state.is_some() {
            return Err(ConsoleError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_push_handle(&mut self, push: Option<PushHandle>) {
        self.push = push;
    }

    pub fn with_push_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ConsoleError> {
        if self.push_worker_handle.is_some() {
            return Err(ConsoleError::ShutdownError("push_handle already set".to_string()));
        }
        self.push_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_poller_worker_handles(
        &mut self,
        fast: JoinHandle<()>,
        slow: JoinHandle<()>,
    ) -> Result<(), ConsoleError> {
        if self.fast_poller_handle.is_some() || self.slow_poller_handle.is_some() {
            return Err(ConsoleError::ShutdownError("poller_handles already set".to_string()));
        }
        self.fast_poller_handle = Some(fast);
        self.slow_poller_handle = Some(slow);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ConsoleError>>,
    ) -> Result<(), ConsoleError> {
        if self.server_handle.is_some() {
            return Err(ConsoleError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConsoleError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ConsoleError> {
        info!("Shutting down deploy console...");

        // 1. Close the feed so nothing in flight can merge after this point
        if let Some(app_state) = &self.app_state {
            app_state.shutdown().await?;
        }

        // 2. Stop the push channel and the timers
        if let Some(push) = self.push.take() {
            let _ = push.disconnect();
        }
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.push_worker_handle.take() {
            handle.await.map_err(|e| ConsoleError::ShutdownError(e.to_string()))?;
        }
        if let Some(handle) = self.fast_poller_handle.take() {
            handle.await.map_err(|e| ConsoleError::ShutdownError(e.to_string()))?;
        }
        if let Some(handle) = self.slow_poller_handle.take() {
            handle.await.map_err(|e| ConsoleError::ShutdownError(e.to_string()))?;
        }

        // 3. Local server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ConsoleError::ShutdownError(e.to_string()))??;
        }

        self.app_state = None;
        info!("Shutdown complete");
        Ok(())
    }
}
