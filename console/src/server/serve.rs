//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ConsoleError;
use crate::server::handlers::{
    connection_handler, deployments_handler, events_handler, health_handler, reconnect_handler,
    refresh_handler, trigger_handler, version_handler,
};
use crate::server::state::ServerState;

/// Render-layer routes
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/deployments", get(deployments_handler).post(trigger_handler))
        .route("/deployments/refresh", post(refresh_handler))
        // Push channel
        .route("/connection", get(connection_handler))
        .route("/connection/reconnect", post(reconnect_handler))
        // Live updates
        .route("/events", get(events_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ConsoleError>>, ConsoleError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ConsoleError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ConsoleError::ServerError(e.to_string()))
    });

    Ok(handle)
}
