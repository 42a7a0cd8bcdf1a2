//! State types for tracking applied resources.
//!
//! The snapshot is the diff baseline of the next plan: the last-applied
//! attributes of every resource together with the identifiers and outputs
//! the provider assigned to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{AttrMap, ResourceId, Value};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of retained history entries.
const MAX_HISTORY: usize = 100;

/// The complete persisted state of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Applied resources by identity.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceState>,
    /// Provider ids of superseded instances still awaiting deletion.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deposed: BTreeMap<ResourceId, Vec<String>>,
    /// Named run outputs exported by the last run.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Last-applied state of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Identifier assigned by the provider.
    pub provider_id: String,
    /// Resolved attributes as last applied.
    pub attributes: AttrMap,
    /// Outputs reported by the provider (always includes `id`).
    #[serde(default)]
    pub outputs: AttrMap,
    /// Resources this one depended on when applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Hash of `attributes`.
    #[serde(default)]
    pub attributes_hash: String,
    /// Whether the resource was declared protected.
    #[serde(default)]
    pub protected: bool,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Kind of run.
    pub operation: RunOperation,
    /// Configuration hash the run applied.
    pub config_hash: String,
    /// Number of operations that succeeded.
    pub succeeded: usize,
    /// Number of operations with nothing to do.
    pub unchanged: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Number of skipped or cancelled operations.
    pub skipped: usize,
    /// Whether every operation succeeded.
    pub success: bool,
}

/// Kinds of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Converge to the declared state.
    Apply,
    /// Delete every recorded resource.
    Destroy,
}

impl StateSnapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            deposed: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Adds or replaces a resource entry.
    pub fn set_resource(&mut self, id: ResourceId, resource: ResourceState) {
        self.resources.insert(id, resource);
        self.last_updated = Utc::now();
    }

    /// Records a superseded instance of `id` that still exists.
    pub fn add_deposed(&mut self, id: ResourceId, provider_id: &str) {
        let ids = self.deposed.entry(id).or_default();
        if !ids.iter().any(|d| d == provider_id) {
            ids.push(provider_id.to_string());
        }
        self.last_updated = Utc::now();
    }

    /// Drops a superseded instance; returns false if it was not recorded.
    pub fn remove_deposed(&mut self, id: &ResourceId, provider_id: &str) -> bool {
        let Some(ids) = self.deposed.get_mut(id) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|d| d != provider_id);
        let removed = ids.len() != before;
        if ids.is_empty() {
            self.deposed.remove(id);
        }
        if removed {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Removes a resource entry.
    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, keeping only the most recent ones.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all recorded identities.
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    /// Returns the number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resource is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceState {
    /// Creates a new resource entry.
    #[must_use]
    pub fn new(provider_id: &str, attributes: AttrMap, outputs: AttrMap) -> Self {
        let now = Utc::now();
        Self {
            provider_id: provider_id.to_string(),
            attributes,
            outputs,
            dependencies: Vec::new(),
            attributes_hash: String::new(),
            protected: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Looks up an output value.
    #[must_use]
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Looks up a referenceable key: provider outputs first, then the
    /// applied attributes.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key).or_else(|| self.attributes.get(key))
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json_uses_dotted_keys() {
        let mut snapshot = StateSnapshot::new("net", "dev");
        let mut outputs = AttrMap::new();
        outputs.insert(String::from("id"), Value::from("vpc-1"));
        snapshot.set_resource(
            ResourceId::new("network", "vpc"),
            ResourceState::new("vpc-1", AttrMap::new(), outputs),
        );

        let json = serde_json::to_string(&snapshot).expect("serializable");
        assert!(json.contains("\"network.vpc\""));

        let back: StateSnapshot = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(back, snapshot);
        assert!(!json.contains("deposed"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut snapshot = StateSnapshot::new("net", "dev");
        for _ in 0..(MAX_HISTORY + 5) {
            snapshot.add_history(RunHistoryEntry {
                timestamp: Utc::now(),
                operation: RunOperation::Apply,
                config_hash: String::new(),
                succeeded: 0,
                unchanged: 0,
                failed: 0,
                skipped: 0,
                success: true,
            });
        }
        assert_eq!(snapshot.history.len(), MAX_HISTORY);
    }
}
