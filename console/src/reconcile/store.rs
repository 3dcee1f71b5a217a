//! Ordered in-memory store of deployment records for one project

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::deployment::{DeploymentRecord, RecordId, RecordOrigin};
use crate::reconcile::matcher::{matches, MatchPolicy};

/// A record-level change produced by a merge
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Record as it was before the merge; `None` for newly inserted records
    pub previous: Option<DeploymentRecord>,
    pub next: DeploymentRecord,
}

/// Result of a merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub transitions: Vec<Transition>,
    pub replaced_speculative: usize,
    pub inserted: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Deployment record store.
///
/// Records are kept newest-first by `created_at`; ties keep insertion order.
/// Replacements never move a record, except a pushed record whose provisional
/// creation time is corrected.
#[derive(Debug, Clone, Default)]
pub struct DeploymentStore {
    records: Vec<DeploymentRecord>,
    policy: MatchPolicy,
}

impl DeploymentStore {
    /// Create an empty store
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            records: Vec::new(),
            policy,
        }
    }

    /// All records in render order
    pub fn records(&self) -> &[DeploymentRecord] {
        &self.records
    }

    /// Records not yet in a terminal status
    pub fn active(&self) -> Vec<DeploymentRecord> {
        self.records
            .iter()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &RecordId) -> Option<&DeploymentRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge incoming records.
    ///
    /// For each record: overwrite the record with the same id in place; else, if
    /// authoritative, replace the matching speculative record in place; else
    /// insert it at its ordered position. Merging the same snapshot twice is a no-op.
    pub fn merge(&mut self, incoming: Vec<DeploymentRecord>, now: DateTime<Utc>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for record in incoming {
            if let Some(idx) = self.position_of(&record.id) {
                let previous = self.records[idx].clone();
                if self.records[idx].absorb(&record, now) {
                    let next = self.records[idx].clone();
                    if next.created_at != previous.created_at {
                        // creation time learned from the first full record
                        self.records.remove(idx);
                        let idx = self.insert_position(next.created_at);
                        self.records.insert(idx, next.clone());
                    }
                    outcome.transitions.push(Transition {
                        previous: Some(previous),
                        next,
                    });
                }
                continue;
            }

            if record.origin == RecordOrigin::Authoritative {
                if let Some(idx) = self.find_speculative_match(&record, now) {
                    let previous = self.records[idx].clone();
                    self.records[idx].absorb(&record, now);
                    info!(
                        "Reconciled speculative deployment {} as {}",
                        previous.id, record.id
                    );
                    outcome.replaced_speculative += 1;
                    outcome.transitions.push(Transition {
                        previous: Some(previous),
                        next: self.records[idx].clone(),
                    });
                    continue;
                }
            }

            let mut record = record;
            if record.is_terminal() && record.completed_at.is_none() {
                record.completed_at = Some(now);
            }
            let idx = self.insert_position(record.created_at);
            self.records.insert(idx, record.clone());
            outcome.inserted += 1;
            outcome.transitions.push(Transition {
                previous: None,
                next: record,
            });
        }

        outcome
    }

    /// Drop speculative records that stayed unreconciled for longer than `ttl`
    pub fn expire_speculative(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<RecordId> {
        let mut expired = Vec::new();
        self.records.retain(|r| {
            let stale = r.is_speculative()
                && (now - r.created_at).to_std().map(|age| age > ttl).unwrap_or(false);
            if stale {
                expired.push(r.id.clone());
            }
            !stale
        });
        if !expired.is_empty() {
            debug!("Expired {} unreconciled speculative deployments", expired.len());
        }
        expired
    }

    fn position_of(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    /// The matching speculative record; when several qualify the most recently
    /// created one wins
    fn find_speculative_match(&self, record: &DeploymentRecord, now: DateTime<Utc>) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_speculative() && matches(r, record, &self.policy, now))
            .max_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ia.cmp(ib)))
            .map(|(idx, _)| idx)
    }

    fn insert_position(&self, created_at: DateTime<Utc>) -> usize {
        self.records
            .iter()
            .position(|r| r.created_at < created_at)
            .unwrap_or(self.records.len())
    }
}
