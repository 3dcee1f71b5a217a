//! Persistent active-set cache
//!
//! Keeps the non-terminal deployments of each project on disk so a restarted
//! console resumes watching them. One JSON file per project; the last writer wins.

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::ConsoleError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentRecord;

const KEY_PREFIX: &str = "deployments-active-";

/// Records still being watched
pub fn active_subset(records: &[DeploymentRecord]) -> Vec<DeploymentRecord> {
    records.iter().filter(|r| !r.is_terminal()).cloned().collect()
}

/// Storage key for a project. Characters outside `[A-Za-z0-9_-]` are replaced
/// so any project id maps to a plain file name.
pub fn cache_key(project_id: &str) -> String {
    let sanitized: String = project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}{}", KEY_PREFIX, sanitized)
}

/// Durable per-project store of non-terminal deployments
pub struct ActiveSetCache {
    dir: Dir,
    write_lock: Mutex<()>,
}

impl ActiveSetCache {
    /// Create a cache rooted at `dir`
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn file(&self, project_id: &str) -> File {
        self.dir.file(&format!("{}.json", cache_key(project_id)))
    }

    /// Persist the non-terminal subset of `records`; an empty subset removes the
    /// entry. Returns the number of records written.
    pub async fn save(
        &self,
        project_id: &str,
        records: &[DeploymentRecord],
    ) -> Result<usize, ConsoleError> {
        let active = active_subset(records);
        let file = self.file(project_id);

        let _guard = self.write_lock.lock().await;
        if active.is_empty() {
            file.delete()
                .await
                .map_err(|e| ConsoleError::CacheError(format!("{}: {}", project_id, e)))?;
        } else {
            file.write_json(&active)
                .await
                .map_err(|e| ConsoleError::CacheError(format!("{}: {}", project_id, e)))?;
        }

        debug!("Cached {} active deployments for project {}", active.len(), project_id);
        Ok(active.len())
    }

    /// Load the last saved active set. Missing or corrupt data yields an empty set.
    pub async fn load(&self, project_id: &str) -> Vec<DeploymentRecord> {
        let file = self.file(project_id);
        if !file.exists().await {
            return Vec::new();
        }

        match file.read_json::<Vec<DeploymentRecord>>().await {
            Ok(records) => active_subset(&records),
            Err(e) => {
                warn!(
                    "Ignoring unreadable deployment cache {}: {}",
                    file.path().display(),
                    e
                );
                Vec::new()
            }
        }
    }
}
