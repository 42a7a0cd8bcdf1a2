//! Run-scoped access to the state snapshot.
//!
//! A session loads the snapshot once at the start of a run and writes the
//! whole snapshot back through the store after every recorded change, so
//! every completed operation is durable before its dependents start.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};
use crate::graph::{ResourceId, Value};

use super::store::StateStore;
use super::types::{ResourceState, RunHistoryEntry, STATE_VERSION, StateSnapshot};

/// The snapshot of one run together with the store it persists to.
pub struct StateSession<'a> {
    store: &'a dyn StateStore,
    snapshot: StateSnapshot,
}

impl<'a> StateSession<'a> {
    /// Loads the snapshot, or starts an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored snapshot cannot be read or was written
    /// by an incompatible state format.
    pub async fn load_snapshot(
        store: &'a dyn StateStore,
        project: &str,
        environment: &str,
    ) -> Result<Self> {
        let snapshot = match store.load().await? {
            Some(snapshot) => {
                check_version(&snapshot.version)?;
                if snapshot.project != project || snapshot.environment != environment {
                    warn!(
                        "State belongs to {}/{}, configuration declares {project}/{environment}",
                        snapshot.project, snapshot.environment
                    );
                }
                debug!("Loaded snapshot with {} resources", snapshot.len());
                snapshot
            }
            None => {
                info!("No existing state, starting from an empty snapshot");
                StateSnapshot::new(project, environment)
            }
        };

        Ok(Self { store, snapshot })
    }

    /// Returns the current snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }

    /// Consumes the session, returning the snapshot.
    #[must_use]
    pub fn into_snapshot(self) -> StateSnapshot {
        self.snapshot
    }

    /// Records the applied state of a resource and persists the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub async fn record_result(&mut self, id: &ResourceId, entry: ResourceState) -> Result<()> {
        let entry = match self.snapshot.get(id) {
            Some(previous) => ResourceState {
                created_at: previous.created_at,
                ..entry
            },
            None => entry,
        };
        self.snapshot.set_resource(id.clone(), entry);
        debug!("Recorded {id}");
        self.store.save(&self.snapshot).await
    }

    /// Removes a deleted resource and persists the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub async fn forget(&mut self, id: &ResourceId) -> Result<()> {
        if self.snapshot.remove_resource(id).is_some() {
            debug!("Forgot {id}");
            self.store.save(&self.snapshot).await?;
        }
        Ok(())
    }

    /// Records that the old instance `provider_id` of `id` outlived its
    /// replacement's cleanup, then persists the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub async fn depose(&mut self, id: &ResourceId, provider_id: &str) -> Result<()> {
        self.snapshot.add_deposed(id.clone(), provider_id);
        debug!("Deposed {provider_id} of {id}");
        self.store.save(&self.snapshot).await
    }

    /// Drops a deposed instance once the provider deleted it.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub async fn forget_deposed(&mut self, id: &ResourceId, provider_id: &str) -> Result<()> {
        if self.snapshot.remove_deposed(id, provider_id) {
            debug!("Forgot deposed {provider_id} of {id}");
            self.store.save(&self.snapshot).await?;
        }
        Ok(())
    }

    /// Records the run's history entry and outputs, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub async fn commit(
        &mut self,
        entry: RunHistoryEntry,
        outputs: BTreeMap<String, Value>,
    ) -> Result<()> {
        if entry.success {
            self.snapshot.config_hash.clone_from(&entry.config_hash);
        }
        self.snapshot.outputs = outputs;
        self.snapshot.add_history(entry);
        self.snapshot.last_updated = chrono::Utc::now();
        self.store.save(&self.snapshot).await
    }
}

/// Accepts snapshots written with the same major format version.
fn check_version(found: &str) -> Result<()> {
    let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
    if major(found) == major(STATE_VERSION) {
        Ok(())
    } else {
        Err(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: found.to_string(),
        }
        .into())
    }
}

impl std::fmt::Debug for StateSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSession")
            .field("backend", &self.store.backend_type())
            .field("resources", &self.snapshot.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerraceError;
    use crate::graph::AttrMap;
    use crate::state::{LocalStateStore, RunOperation};
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(provider_id: &str) -> ResourceState {
        let mut attrs = AttrMap::new();
        attrs.insert(String::from("cidr_block"), Value::from("10.0.0.0/16"));
        let mut outputs = AttrMap::new();
        outputs.insert(String::from("id"), Value::from(provider_id));
        ResourceState::new(provider_id, attrs, outputs)
    }

    #[tokio::test]
    async fn test_recorded_create_reads_back_equal() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let id = ResourceId::new("network", "main");

        let mut session = StateSession::load_snapshot(&store, "net", "dev")
            .await
            .expect("load");
        assert!(session.snapshot().is_empty());
        session.record_result(&id, entry("vpc-1")).await.expect("record");
        let written = session.snapshot().get(&id).cloned();

        let reloaded = StateSession::load_snapshot(&store, "net", "dev")
            .await
            .expect("reload");
        assert_eq!(reloaded.snapshot().get(&id).cloned(), written);
    }

    #[tokio::test]
    async fn test_forget_and_commit() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let id = ResourceId::new("network", "main");

        let mut session = StateSession::load_snapshot(&store, "net", "dev")
            .await
            .expect("load");
        session.record_result(&id, entry("vpc-1")).await.expect("record");
        session.forget(&id).await.expect("forget");

        let mut outputs = BTreeMap::new();
        outputs.insert(String::from("vpc_id"), Value::from("vpc-1"));
        session
            .commit(
                RunHistoryEntry {
                    timestamp: Utc::now(),
                    operation: RunOperation::Apply,
                    config_hash: String::from("abc"),
                    succeeded: 2,
                    unchanged: 0,
                    failed: 0,
                    skipped: 0,
                    success: true,
                },
                outputs,
            )
            .await
            .expect("commit");

        let reloaded = store.load().await.expect("load").expect("exists");
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.config_hash, "abc");
        assert_eq!(reloaded.history.len(), 1);
        assert_eq!(reloaded.outputs["vpc_id"], Value::from("vpc-1"));
    }

    #[tokio::test]
    async fn test_deposed_instances_outlive_forget() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let id = ResourceId::new("target_group", "app");

        let mut session = StateSession::load_snapshot(&store, "net", "dev")
            .await
            .expect("load");
        session.depose(&id, "tg-1").await.expect("depose");
        session.record_result(&id, entry("tg-2")).await.expect("record");
        session.forget(&id).await.expect("forget");

        // Forgetting the current instance leaves the superseded one tracked.
        let reloaded = store.load().await.expect("load").expect("exists");
        assert_eq!(reloaded.deposed.get(&id), Some(&vec![String::from("tg-1")]));

        let mut session = StateSession::load_snapshot(&store, "net", "dev")
            .await
            .expect("reload");
        session.forget_deposed(&id, "tg-1").await.expect("forget deposed");
        let reloaded = store.load().await.expect("load").expect("exists");
        assert!(reloaded.deposed.is_empty());
    }

    #[tokio::test]
    async fn test_incompatible_version_is_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.version = String::from("2.0");
        store.save(&snapshot).await.expect("save");

        let err = StateSession::load_snapshot(&store, "net", "dev")
            .await
            .expect_err("version mismatch");
        assert!(matches!(
            err,
            TerraceError::State(StateError::VersionMismatch { .. })
        ));
    }
}
