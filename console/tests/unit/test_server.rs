//! Render-layer HTTP API tests

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tower::ServiceExt;

use deploy_console::server::serve::router;
use deploy_console::server::state::ServerState;
use deploy_console::trigger::bridge::TriggerBridge;

use crate::mocks::{feed_fixture, FeedFixture};

fn app(fixture: &FeedFixture) -> Router {
    let bridge = Arc::new(TriggerBridge::new(
        fixture.feed.clone(),
        fixture.api.clone(),
        "1.0.0",
    ));
    let (notifications, _) = broadcast::channel(16);
    let (shutdown, _) = broadcast::channel(1);

    router(Arc::new(ServerState::new(
        fixture.feed.clone(),
        bridge,
        None,
        notifications,
        shutdown,
    )))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, json: Option<&str>) -> Request<Body> {
    let builder = Request::builder().method("POST").uri(uri);
    match json {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_health() {
    let fixture = feed_fixture();
    let (status, body) = send(app(&fixture), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_trigger_then_list() {
    let fixture = feed_fixture();
    fixture.api.accept_triggers(Some(101));

    let (status, body) = send(
        app(&fixture),
        post(
            "/deployments",
            Some(r#"{"environmentId":3,"environmentName":"staging","version":"2.0.0"}"#),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], "2.0.0");
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["buildNumber"], 101);

    let (status, body) = send(app(&fixture), get("/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["deployments"][0]["environmentName"], "staging");
}

#[tokio::test]
async fn test_rejected_trigger_is_unprocessable() {
    let fixture = feed_fixture();

    let (status, body) = send(
        app(&fixture),
        post(
            "/deployments",
            Some(r#"{"environmentId":3,"environmentName":"staging"}"#),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "trigger_rejected");
    assert!(fixture.feed.records().is_empty());
}

#[tokio::test]
async fn test_failed_refresh_is_bad_gateway() {
    let fixture = feed_fixture();
    fixture.api.fail_list.store(true, Ordering::SeqCst);

    let (status, body) = send(app(&fixture), post("/deployments/refresh", None)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "refresh_failed");
}

#[tokio::test]
async fn test_connection_without_push() {
    let fixture = feed_fixture();

    let (status, body) = send(app(&fixture), get("/connection")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"], "DISCONNECTED");

    let (status, body) = send(app(&fixture), post("/connection/reconnect", None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "push_disabled");
}
