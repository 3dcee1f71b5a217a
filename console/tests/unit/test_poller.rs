//! Polling fallback tests

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;

use deploy_console::push::client::PushChannelClient;
use deploy_console::push::fsm::{ConnectionHealth, ReconnectPolicy};
use deploy_console::workers::poller::{run_fast, run_slow, Options};

use crate::mocks::{dto, eventually, feed_fixture, CollectingSink, ScriptedConnector};

type Signal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A sleep that completes `ticks` times, then never again, and a shutdown
/// signal that fires once the poller is parked on that last sleep
fn ticking(ticks: usize) -> (impl Fn(Duration) -> Signal, Signal) {
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let sleep_fn = move |_delay: Duration| -> Signal {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if n >= ticks {
                std::future::pending::<()>().await;
            }
        })
    };

    let shutdown: Signal = Box::pin(async move {
        while calls.load(Ordering::SeqCst) <= ticks {
            tokio::task::yield_now().await;
        }
    });

    (sleep_fn, shutdown)
}

#[tokio::test]
async fn test_fast_poll_syncs_while_push_is_down() {
    let fixture = feed_fixture();
    fixture
        .api
        .set_snapshot(vec![dto(42, "1.0.0", "IN_PROGRESS", Some(7), Utc::now())]);

    let (sleep_fn, shutdown) = ticking(3);
    run_fast(&Options::default(), fixture.feed.as_ref(), None, sleep_fn, shutdown).await;

    assert_eq!(fixture.api.sync_calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.api.list_calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.feed.records().len(), 1);
}

#[tokio::test]
async fn test_fast_poll_skips_sync_while_push_is_connected() {
    let fixture = feed_fixture();

    let connector = Arc::new(ScriptedConnector::new(Vec::new()));
    let (client, handle) = PushChannelClient::new(connector, "deployments", ReconnectPolicy::default());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let push_task = tokio::spawn(async move {
        let sink = CollectingSink::default();
        client
            .run(
                &sink,
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = stop_rx.await;
                }),
            )
            .await;
    });
    assert!(eventually(|| handle.health() == ConnectionHealth::Connected).await);

    let (sleep_fn, shutdown) = ticking(2);
    run_fast(&Options::default(), fixture.feed.as_ref(), Some(&handle), sleep_fn, shutdown).await;

    assert_eq!(fixture.api.sync_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.api.list_calls.load(Ordering::SeqCst), 2);

    stop_tx.send(()).unwrap();
    push_task.await.unwrap();
}

#[tokio::test]
async fn test_fast_poll_stops_when_the_feed_closes() {
    let fixture = feed_fixture();
    fixture.feed.teardown().await.unwrap();

    run_fast(
        &Options::default(),
        fixture.feed.as_ref(),
        None,
        |_| async {},
        Box::pin(std::future::pending::<()>()),
    )
    .await;

    assert_eq!(fixture.api.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_poll_swallows_errors() {
    let fixture = feed_fixture();
    fixture.api.fail_list.store(true, Ordering::SeqCst);

    let (sleep_fn, shutdown) = ticking(3);
    run_slow(&Options::default(), fixture.feed.as_ref(), sleep_fn, shutdown).await;

    assert_eq!(fixture.api.sync_calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.api.list_calls.load(Ordering::SeqCst), 3);
    assert!(fixture.feed.records().is_empty());
}
