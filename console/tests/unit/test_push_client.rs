//! Push channel client tests, driven by fake transports

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use deploy_console::models::deployment::{DeploymentStatus, RecordId};
use deploy_console::push::client::PushChannelClient;
use deploy_console::push::fsm::{ConnectionHealth, ConnectionState, ReconnectPolicy};

use crate::mocks::{eventually, CollectingSink, FailingConnector, ScriptedConnector};

#[tokio::test]
async fn test_gives_up_after_five_failed_attempts() {
    let connector = Arc::new(FailingConnector::default());
    let (client, handle) =
        PushChannelClient::new(connector.clone(), "deployments", ReconnectPolicy::default());

    let delays = Arc::new(Mutex::new(Vec::new()));
    let recorded = delays.clone();
    let sleep_fn = move |delay: Duration| {
        recorded.lock().unwrap().push(delay);
        async {}
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let sink = Arc::new(CollectingSink::default());
    let task = tokio::spawn(async move {
        client
            .run(
                sink.as_ref(),
                sleep_fn,
                Box::pin(async move {
                    let _ = shutdown_rx.await;
                }),
            )
            .await;
    });

    let mut status = handle.subscribe_status();
    tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| s.exhausted))
        .await
        .expect("client never gave up")
        .unwrap();

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(8000),
        ]
    );

    let snapshot = handle.status();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.failures, 5);
    assert_eq!(handle.health(), ConnectionHealth::Disconnected);

    // nothing else is attempted while idle
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);

    // a manual retry starts a fresh round of attempts
    handle.force_reconnect().unwrap();
    assert!(eventually(|| connector.attempts.load(Ordering::SeqCst) == 10).await);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_delivers_decoded_messages_and_skips_the_rest() {
    let connector = Arc::new(ScriptedConnector::new(vec![
        r#"{"type":"deployment_status_update","deploymentId":42,"status":"SUCCESS","projectName":"billing"}"#,
        "garbage",
        r#"{"type":"heartbeat"}"#,
        r#"{"type":"deployment","deployment":{"id":43,"version":"2.0.0","status":"PENDING","createdAt":"2024-01-01T10:00:00Z"}}"#,
    ]));
    let log = connector.log.clone();
    let (client, handle) =
        PushChannelClient::new(connector, "console/deployments", ReconnectPolicy::default());

    let sink = Arc::new(CollectingSink::default());
    let client_sink = sink.clone();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        client
            .run(
                client_sink.as_ref(),
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = shutdown_rx.await;
                }),
            )
            .await;
    });

    assert!(eventually(|| sink.records.lock().unwrap().len() == 2).await);
    {
        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].id, RecordId::Server(42));
        assert_eq!(records[0].status, DeploymentStatus::Success);
        assert_eq!(records[1].id, RecordId::Server(43));
    }
    assert_eq!(*log.subscribed.lock().unwrap(), vec!["console/deployments".to_string()]);
    assert_eq!(handle.health(), ConnectionHealth::Connected);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert!(log.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_disconnect_invalidates_the_subscription() {
    let connector = Arc::new(ScriptedConnector::new(Vec::new()));
    let log = connector.log.clone();
    let (client, handle) = PushChannelClient::new(connector, "deployments", ReconnectPolicy::default());

    let sink = Arc::new(CollectingSink::default());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        client
            .run(
                sink.as_ref(),
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = shutdown_rx.await;
                }),
            )
            .await;
    });

    assert!(eventually(|| handle.health() == ConnectionHealth::Connected).await);

    handle.disconnect().unwrap();
    assert!(eventually(|| log.closed.load(Ordering::SeqCst)).await);
    assert_eq!(handle.status().state, ConnectionState::Disconnected);
    assert!(!handle.status().exhausted);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}
