//! Reconciliation key matching

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::deployment::DeploymentRecord;

/// Matching policy
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    /// How long after its creation a speculative record without a build number
    /// may still be matched on `(version, environment, project)` alone
    pub fallback_window: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            fallback_window: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Whether `authoritative` is the confirmed form of `speculative`.
///
/// Versions must be equal and non-empty and the environments must be the same.
/// When both sides carry a build number it must be equal. When either side lacks
/// one, the projects must also agree, the speculative record must have been
/// created within the fallback window (inclusive) before `now`, and the
/// authoritative record must not have been created more than that window before
/// the speculative one. Older history reusing the version never matches.
pub fn matches(
    speculative: &DeploymentRecord,
    authoritative: &DeploymentRecord,
    policy: &MatchPolicy,
    now: DateTime<Utc>,
) -> bool {
    if speculative.version.is_empty() || speculative.version != authoritative.version {
        return false;
    }
    if !speculative.environment.same_as(&authoritative.environment) {
        return false;
    }

    match (speculative.build_number, authoritative.build_number) {
        (Some(a), Some(b)) => a == b,
        _ => {
            speculative.project.same_as(&authoritative.project)
                && within_window(speculative.created_at, now, policy.fallback_window)
                && !predates(authoritative.created_at, speculative.created_at, policy.fallback_window)
        }
    }
}

/// Whether `created_at` lies more than `window` before `reference`
fn predates(created_at: DateTime<Utc>, reference: DateTime<Utc>, window: Duration) -> bool {
    match (reference - created_at).to_std() {
        Ok(gap) => gap > window,
        Err(_) => false,
    }
}

fn within_window(created_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    // a record stamped ahead of `now` (clock skew) is treated as brand new
    match (now - created_at).to_std() {
        Ok(age) => age <= window,
        Err(_) => true,
    }
}
