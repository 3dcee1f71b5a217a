//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use openapi_server::models::{
    ActionResponse, ConnectionResponse, DeploymentsResponse, ErrorResponse, HealthResponse,
    TriggerDeploymentBody, VersionResponse,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::ConsoleError;
use crate::models::deployment::{DeploymentRecord, EntityRef};
use crate::notify::emitter::Notification;
use crate::push::fsm::ConnectionHealth;
use crate::server::state::ServerState;
use crate::trigger::bridge::TriggerContext;
use crate::utils::version_info;

fn error_response(status: StatusCode, error: &str, err: &ConsoleError) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn deployments_response(records: &[DeploymentRecord]) -> DeploymentsResponse {
    DeploymentsResponse {
        deployments: records.iter().map(DeploymentRecord::to_view).collect(),
        total: records.len(),
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deploy-console".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deployment list in render order
pub async fn deployments_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(deployments_response(&state.feed.records()))
}

/// Push channel health
pub async fn connection_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = match &state.push {
        Some(push) => {
            let status = push.status();
            ConnectionResponse {
                health: status.health().as_str().to_string(),
                failed_attempts: status.failures,
                retries_exhausted: status.exhausted,
            }
        }
        None => ConnectionResponse {
            health: ConnectionHealth::Disconnected.as_str().to_string(),
            failed_attempts: 0,
            retries_exhausted: false,
        },
    };
    Json(response)
}

/// Manual refresh
pub async fn refresh_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.feed.refresh_now().await {
        Ok(outcome) => Json(ActionResponse {
            success: true,
            message: format!("{} deployments updated", outcome.transitions.len()),
        })
        .into_response(),
        Err(e) => {
            warn!("Manual refresh failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, "refresh_failed", &e)
        }
    }
}

/// Manual push channel reconnect
pub async fn reconnect_handler(State(state): State<Arc<ServerState>>) -> Response {
    let Some(push) = &state.push else {
        return error_response(
            StatusCode::CONFLICT,
            "push_disabled",
            &ConsoleError::ConfigError("Push channel is disabled".to_string()),
        );
    };

    match push.force_reconnect() {
        Ok(()) => Json(ActionResponse {
            success: true,
            message: "Reconnecting".to_string(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, "push_unavailable", &e),
    }
}

/// Trigger a deployment
pub async fn trigger_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<TriggerDeploymentBody>,
) -> Response {
    let context = TriggerContext {
        environment: EntityRef::new(body.environment_id, body.environment_name),
        version: body.version.unwrap_or_default(),
        notes: body.notes,
        triggered_by: body.triggered_by.unwrap_or_default(),
    };

    match state.bridge.trigger(context).await {
        Ok(record) => (StatusCode::CREATED, Json(record.to_view())).into_response(),
        Err(e @ ConsoleError::TriggerRejected(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, "trigger_rejected", &e)
        }
        Err(e @ ConsoleError::ValidationError(_)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", &e)
        }
        Err(e) => {
            warn!("Deployment trigger failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, "trigger_failed", &e)
        }
    }
}

fn deployments_event(records: &[DeploymentRecord]) -> Event {
    Event::default()
        .event("deployments")
        .json_data(deployments_response(records))
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn notification_event(notification: &Notification) -> Event {
    Event::default()
        .event("notification")
        .json_data(notification.to_view())
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Server-sent events: a `deployments` snapshot on connect and after every
/// change, plus one `notification` per alert
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Event stream subscriber connected");

    let initial = stream::once(std::future::ready(deployments_event(&state.feed.records())));

    let snapshots = stream::unfold(state.feed.subscribe(), |mut rx| async move {
        rx.changed().await.ok()?;
        let snapshot = rx.borrow_and_update().clone();
        Some((deployments_event(&snapshot), rx))
    });

    let alerts = stream::unfold(state.notifications.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notification) => return Some((notification_event(&notification), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Event stream skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let mut shutdown_rx = state.shutdown.subscribe();
    let events = stream::select(initial.chain(snapshots), alerts)
        .take_until(async move {
            let _ = shutdown_rx.recv().await;
        })
        .map(Ok);
    Sse::new(events).keep_alive(KeepAlive::default())
}
