//! Test doubles for the backend API and the push transport

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openapi_client::models::{DeployRequest, DeployResponse, DeploymentDto};

use deploy_console::cache::active_set::ActiveSetCache;
use deploy_console::errors::ConsoleError;
use deploy_console::filesys::dir::Dir;
use deploy_console::http::deployments::{records_from_dtos, DeploymentApi};
use deploy_console::models::deployment::DeploymentRecord;
use deploy_console::notify::emitter::{Notification, NotificationEmitter, NotificationSink};
use deploy_console::push::client::PushSink;
use deploy_console::push::transport::{PushConnector, PushFrame, PushSession};
use deploy_console::sync::feed::{DeploymentFeed, FeedOptions};

// ================================= BACKEND API ================================== //

#[derive(Default)]
pub struct FakeApi {
    pub snapshot: Mutex<Vec<DeploymentDto>>,
    pub fail_list: AtomicBool,
    pub trigger_response: Mutex<Option<DeployResponse>>,
    pub triggered: Mutex<Vec<DeployRequest>>,
    pub list_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
}

impl FakeApi {
    pub fn set_snapshot(&self, dtos: Vec<DeploymentDto>) {
        *self.snapshot.lock().unwrap() = dtos;
    }

    pub fn accept_triggers(&self, build_number: Option<u64>) {
        *self.trigger_response.lock().unwrap() = Some(DeployResponse {
            success: true,
            build_number,
            message: None,
        });
    }
}

#[async_trait]
impl DeploymentApi for FakeApi {
    async fn list_deployments(&self, _project_id: &str) -> Result<Vec<DeploymentRecord>, ConsoleError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ConsoleError::ApiError {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(records_from_dtos(self.snapshot.lock().unwrap().clone()))
    }

    async fn trigger_deployment(&self, request: &DeployRequest) -> Result<DeployResponse, ConsoleError> {
        self.triggered.lock().unwrap().push(request.clone());
        Ok(self
            .trigger_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(DeployResponse {
                success: false,
                build_number: None,
                message: Some("CI is unavailable".to_string()),
            }))
    }

    async fn sync_all_active(&self) -> Result<(), ConsoleError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn dto(
    id: i64,
    version: &str,
    status: &str,
    build_number: Option<u64>,
    created_at: DateTime<Utc>,
) -> DeploymentDto {
    DeploymentDto {
        id,
        version: version.to_string(),
        status: status.to_string(),
        environment_id: Some(3),
        environment_name: Some("staging".to_string()),
        project_id: Some(9),
        project_name: Some("billing".to_string()),
        build_number,
        triggered_by: Some("alice".to_string()),
        created_at,
        completed_at: None,
    }
}

// ================================ NOTIFICATIONS ================================= //

#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}

// ==================================== FEED ====================================== //

pub struct FeedFixture {
    pub dir: tempfile::TempDir,
    pub api: Arc<FakeApi>,
    pub alerts: Arc<RecordingSink>,
    pub cache: Arc<ActiveSetCache>,
    pub feed: Arc<DeploymentFeed>,
}

pub fn feed_fixture() -> FeedFixture {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::default());
    let alerts = Arc::new(RecordingSink::default());
    let cache = Arc::new(ActiveSetCache::new(Dir::new(dir.path())));
    let emitter = Arc::new(NotificationEmitter::new(vec![alerts.clone()]));

    let feed = Arc::new(DeploymentFeed::new(
        FeedOptions {
            project_id: "9".to_string(),
            project_name: Some("billing".to_string()),
            ..Default::default()
        },
        cache.clone(),
        emitter,
        api.clone(),
    ));

    FeedFixture {
        dir,
        api,
        alerts,
        cache,
        feed,
    }
}

// ================================ PUSH TRANSPORT ================================ //

/// Connector whose every attempt fails
#[derive(Default)]
pub struct FailingConnector {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl PushConnector for FailingConnector {
    async fn connect(&self) -> Result<Box<dyn PushSession>, ConsoleError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ConsoleError::PushError("connection refused".to_string()))
    }
}

/// Shared view of what a scripted session went through
#[derive(Default)]
pub struct SessionLog {
    pub subscribed: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

/// Connector handing out one session that replays scripted frames, then idles
pub struct ScriptedConnector {
    frames: Mutex<Option<VecDeque<PushFrame>>>,
    pub log: Arc<SessionLog>,
}

impl ScriptedConnector {
    pub fn new(payloads: Vec<&str>) -> Self {
        let frames = payloads
            .into_iter()
            .map(|p| PushFrame {
                topic: "deployments".to_string(),
                payload: p.as_bytes().to_vec(),
            })
            .collect();
        Self {
            frames: Mutex::new(Some(frames)),
            log: Arc::new(SessionLog::default()),
        }
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn PushSession>, ConsoleError> {
        let frames = self.frames.lock().unwrap().take().unwrap_or_default();
        Ok(Box::new(ScriptedSession {
            frames,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedSession {
    frames: VecDeque<PushFrame>,
    log: Arc<SessionLog>,
}

#[async_trait]
impl PushSession for ScriptedSession {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ConsoleError> {
        self.log.subscribed.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<PushFrame>, ConsoleError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

/// Push sink that only records what it receives
#[derive(Default)]
pub struct CollectingSink {
    pub records: Mutex<Vec<DeploymentRecord>>,
}

#[async_trait]
impl PushSink for CollectingSink {
    async fn deliver(&self, record: DeploymentRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
