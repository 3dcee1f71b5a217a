//! Deployment feed
//!
//! Owns the reconciliation store for one project. Every source (push messages,
//! polls, the trigger bridge, cache resume) converges on [`DeploymentFeed::apply`],
//! which merges under a short synchronous lock and then fans the result out to
//! the notification emitter, the render-layer watch channel and the active-set
//! cache.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::active_set::ActiveSetCache;
use crate::errors::ConsoleError;
use crate::http::deployments::DeploymentApi;
use crate::models::deployment::{DeploymentRecord, EntityRef};
use crate::notify::emitter::NotificationEmitter;
use crate::push::client::PushSink;
use crate::reconcile::matcher::MatchPolicy;
use crate::reconcile::store::{DeploymentStore, MergeOutcome};

/// Feed options
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Project whose deployments are watched
    pub project_id: String,

    /// Display name, if known up front; otherwise learned from snapshots
    pub project_name: Option<String>,

    /// Reconciliation key matching
    pub match_policy: MatchPolicy,

    /// Speculative records older than this are dropped on the next snapshot
    pub speculative_ttl: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            project_name: None,
            match_policy: MatchPolicy::default(),
            speculative_ttl: Duration::from_secs(30 * 60),
        }
    }
}

struct FeedState {
    store: DeploymentStore,
    project: EntityRef,
    closed: bool,
}

/// Snapshot published to render-layer subscribers
pub type DeploymentSnapshot = Arc<Vec<DeploymentRecord>>;

pub struct DeploymentFeed {
    project_id: String,
    state: Mutex<FeedState>,
    cache: Arc<ActiveSetCache>,
    emitter: Arc<NotificationEmitter>,
    api: Arc<dyn DeploymentApi>,
    snapshot_tx: watch::Sender<DeploymentSnapshot>,
    speculative_ttl: Duration,
    persist_lock: tokio::sync::Mutex<()>,
}

impl DeploymentFeed {
    pub fn new(
        options: FeedOptions,
        cache: Arc<ActiveSetCache>,
        emitter: Arc<NotificationEmitter>,
        api: Arc<dyn DeploymentApi>,
    ) -> Self {
        let project = EntityRef {
            id: options.project_id.parse().ok(),
            name: options.project_name.unwrap_or_default(),
        };
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            project_id: options.project_id,
            state: Mutex::new(FeedState {
                store: DeploymentStore::new(options.match_policy),
                project,
                closed: false,
            }),
            cache,
            emitter,
            api,
            snapshot_tx,
            speculative_ttl: options.speculative_ttl,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The watched project, with its display name once known
    pub fn project(&self) -> EntityRef {
        self.lock().project.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current records in render order
    pub fn records(&self) -> Vec<DeploymentRecord> {
        self.lock().store.records().to_vec()
    }

    /// Receive a fresh snapshot after every change
    pub fn subscribe(&self) -> watch::Receiver<DeploymentSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Seed the store from the active-set cache
    pub async fn resume(&self) -> Result<usize, ConsoleError> {
        let cached = self.cache.load(&self.project_id).await;
        let count = cached.len();
        if count > 0 {
            info!("Resuming {} active deployments from cache", count);
            self.apply(cached).await?;
        }
        Ok(count)
    }

    /// Merge records from any source
    pub async fn apply(&self, records: Vec<DeploymentRecord>) -> Result<MergeOutcome, ConsoleError> {
        self.merge(records, false).await
    }

    /// Merge an authoritative snapshot and drop speculative records it never confirmed
    pub async fn apply_snapshot(
        &self,
        records: Vec<DeploymentRecord>,
    ) -> Result<MergeOutcome, ConsoleError> {
        self.merge(records, true).await
    }

    async fn merge(
        &self,
        records: Vec<DeploymentRecord>,
        expire: bool,
    ) -> Result<MergeOutcome, ConsoleError> {
        let now = Utc::now();

        let (outcome, snapshot) = {
            let mut state = self.lock();
            if state.closed {
                return Err(ConsoleError::FeedClosed);
            }

            learn_project_name(&mut state.project, &records);
            let outcome = state.store.merge(records, now);
            let expired = if expire {
                state.store.expire_speculative(now, self.speculative_ttl)
            } else {
                Vec::new()
            };

            let snapshot = (outcome.changed() || !expired.is_empty())
                .then(|| Arc::new(state.store.records().to_vec()));
            (outcome, snapshot)
        };

        let Some(snapshot) = snapshot else {
            return Ok(outcome);
        };

        for transition in &outcome.transitions {
            self.emitter
                .on_record_transition(transition.previous.as_ref(), &transition.next);
        }
        self.snapshot_tx.send_replace(snapshot);

        if let Err(e) = self.persist().await {
            warn!("Failed to cache active deployments: {}", e);
        }
        Ok(outcome)
    }

    /// Write the current active set to the cache
    pub async fn persist(&self) -> Result<usize, ConsoleError> {
        let _guard = self.persist_lock.lock().await;
        let active = self.lock().store.active();
        self.cache.save(&self.project_id, &active).await
    }

    /// Fetch the authoritative list and merge it
    pub async fn refresh(&self) -> Result<MergeOutcome, ConsoleError> {
        let records = self.api.list_deployments(&self.project_id).await?;
        debug!("Fetched {} deployments for project {}", records.len(), self.project_id);
        self.apply_snapshot(records).await
    }

    /// Ask the backend to re-check in-flight CI jobs
    pub async fn sync_all_active(&self) -> Result<(), ConsoleError> {
        self.api.sync_all_active().await
    }

    /// Manual refresh: best-effort sync of in-flight jobs, then a fetch whose
    /// failure is reported to the caller
    pub async fn refresh_now(&self) -> Result<MergeOutcome, ConsoleError> {
        if let Err(e) = self.sync_all_active().await {
            warn!("Sync of active deployments failed: {}", e);
        }
        self.refresh().await
    }

    /// Stop accepting merges and persist what is still in flight
    pub async fn teardown(&self) -> Result<(), ConsoleError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        let saved = self.persist().await?;
        info!("Deployment feed closed with {} active deployments cached", saved);
        Ok(())
    }

    /// Whether a pushed record belongs to this feed
    fn accepts(&self, record: &DeploymentRecord) -> bool {
        let state = self.lock();
        record.project.same_as(&state.project) || state.store.get(&record.id).is_some()
    }
}

fn learn_project_name(project: &mut EntityRef, records: &[DeploymentRecord]) {
    if !project.name.is_empty() {
        return;
    }
    if let Some(name) = records
        .iter()
        .filter(|r| project.id.is_some() && r.project.id == project.id)
        .map(|r| r.project.name.as_str())
        .find(|name| !name.is_empty())
    {
        project.name = name.to_string();
    }
}

#[async_trait]
impl PushSink for DeploymentFeed {
    async fn deliver(&self, record: DeploymentRecord) {
        if !self.accepts(&record) {
            debug!("Ignoring push update {} for another project", record.id);
            return;
        }
        match self.apply(vec![record]).await {
            Ok(outcome) if outcome.changed() => debug!("Applied push update"),
            Ok(_) => {}
            Err(ConsoleError::FeedClosed) => debug!("Dropping push update after teardown"),
            Err(e) => warn!("Failed to apply push update: {}", e),
        }
    }
}
