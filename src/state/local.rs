//! Local file-based state storage backend.
//!
//! The snapshot lives in `<base_dir>/state.json`. Every save goes through a
//! temporary file that is synced and then renamed over the previous snapshot,
//! so an interrupted run leaves the last complete snapshot in place.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::StateStore;
use super::types::StateSnapshot;

/// Default state directory name.
pub const STATE_DIR: &str = ".terrace";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Attempts at taking the lock while expired locks are being cleared.
const LOCK_ATTEMPTS: usize = 5;

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Writes `content` to `path` via a synced temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;

        let temp_path = sibling(path, "tmp");
        write_synced(&temp_path, content).await?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename {}: {e}", temp_path.display())))?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        match read_lock(&self.lock_path).await {
            Ok(lock) => Ok(Some(lock)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::corrupted(format!("Failed to read lock file: {e}")).into()),
        }
    }

    /// Publishes `content` as the lock file unless one already exists.
    ///
    /// The content is written in full to a private file first and then hard
    /// linked into place, so a reader never sees a partial lock.
    async fn create_lock_file(&self, content: &str) -> Result<bool> {
        let temp_path = sibling(&self.lock_path, &format!("{}.tmp", Uuid::new_v4()));
        write_synced(&temp_path, content).await?;

        let linked = fs::hard_link(&temp_path, &self.lock_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            debug!("Failed to remove {}: {e}", temp_path.display());
        }
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            }
            .into()),
        }
    }

    /// Removes the lock file if it still holds the expired lock `expired`.
    ///
    /// The file is first renamed aside, which only one contender can do. A
    /// lock that changed hands in the meantime is put back.
    async fn clear_expired_lock(&self, expired: &LockInfo) -> Result<()> {
        let stale_path = sibling(&self.lock_path, &format!("{}.stale", Uuid::new_v4()));
        match fs::rename(&self.lock_path, &stale_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to move expired lock aside: {e}"),
                }
                .into());
            }
        }

        let moved = read_lock(&stale_path).await;
        if moved.is_ok_and(|lock| lock.lock_id != expired.lock_id) {
            if let Err(e) = fs::hard_link(&stale_path, &self.lock_path).await {
                warn!("Failed to restore lock file: {e}");
            }
        } else {
            info!("Cleared expired state lock {} held by {}", expired.lock_id, expired.holder);
        }

        if let Err(e) = fs::remove_file(&stale_path).await {
            debug!("Failed to remove {}: {e}", stale_path.display());
        }
        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })?;
        }
        Ok(())
    }
}

/// Path next to `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes `content` to a fresh file at `path` and syncs it.
async fn write_synced(path: &Path, content: &str) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| StateError::write(format!("Failed to create {}: {e}", path.display())))?;

    file.write_all(content.as_bytes())
        .await
        .map_err(|e| StateError::write(format!("Failed to write {}: {e}", path.display())))?;

    file.sync_all()
        .await
        .map_err(|e| StateError::write(format!("Failed to sync {}: {e}", path.display())))?;

    Ok(())
}

async fn read_lock(path: &Path) -> std::io::Result<LockInfo> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read state file: {e}")))?;

        let snapshot: StateSnapshot = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state file: {e}")))?;

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        debug!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.write_atomic(&self.state_path, &content).await
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::write(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;

        let lock_info = LockInfo::new(&holder_or_generated(holder), operation);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        for _ in 0..LOCK_ATTEMPTS {
            if self.create_lock_file(&content).await? {
                info!(
                    "Acquired state lock: {} (expires in {}s)",
                    lock_info.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lock_info);
            }

            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                Some(existing) => {
                    debug!("Expired lock found, taking over");
                    self.clear_expired_lock(&existing).await?;
                }
                None => debug!("Lock released while acquiring, retrying"),
            }
        }

        Err(StateError::LockFailed {
            message: format!("Lock still contended after {LOCK_ATTEMPTS} attempts"),
        }
        .into())
    }

    async fn renew_lock(&self, lock: &LockInfo) -> Result<LockInfo> {
        let current = self.read_lock_file().await?;
        let Some(current) = current.filter(|c| c.lock_id == lock.lock_id) else {
            return Err(StateError::LockFailed {
                message: format!("Lock {} is no longer held", lock.lock_id),
            }
            .into());
        };

        let renewed = current.renewed();
        let content = serde_json::to_string_pretty(&renewed)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        debug!("Renewed state lock {} until {}", renewed.lock_id, renewed.expires_at);
        Ok(renewed)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
