//! Diff engine for comparing declared attributes with the snapshot.
//!
//! Diffs are computed at top-level attribute granularity. A declared value is
//! either known at plan time or only known once a dependency has been applied;
//! the latter always counts as a change.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::error::PlanError;
use crate::graph::{AttrMap, ResourceNode, Value};

use super::policy::{ChangeAction, PolicyRegistry};

/// Planned value of a declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffValue {
    /// Value known at plan time.
    Known(Value),
    /// Value depends on an output that only exists after apply.
    KnownAfterApply,
    /// Attribute is no longer declared.
    Absent,
}

/// Change of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDiff {
    /// Last-applied value, if any.
    pub old: Option<Value>,
    /// Planned value.
    pub new: DiffValue,
    /// How the change is applied; `None` for attributes of a new resource.
    pub action: Option<ChangeAction>,
}

/// Attribute diffs by attribute name.
pub type Diff = BTreeMap<String, AttrDiff>;

/// Engine for computing attribute diffs.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    policies: PolicyRegistry,
}

impl DiffEngine {
    /// Creates a diff engine using the given policies.
    #[must_use]
    pub const fn new(policies: PolicyRegistry) -> Self {
        Self { policies }
    }

    /// Returns the policy registry.
    #[must_use]
    pub const fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Describes every declared attribute of a resource about to be created.
    #[must_use]
    pub fn creation(&self, desired: &BTreeMap<String, DiffValue>) -> Diff {
        desired
            .iter()
            .map(|(key, new)| {
                (
                    key.clone(),
                    AttrDiff {
                        old: None,
                        new: new.clone(),
                        action: None,
                    },
                )
            })
            .collect()
    }

    /// Compares declared values with last-applied attributes.
    ///
    /// Attributes listed in the node's `lifecycle.ignore_changes` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DiffPolicy`] for a changed attribute the type's
    /// policy does not classify.
    pub fn compare(
        &self,
        node: &ResourceNode,
        desired: &BTreeMap<String, DiffValue>,
        recorded: &AttrMap,
    ) -> Result<Diff, PlanError> {
        let ignored: BTreeSet<&str> = node
            .lifecycle
            .ignore_changes
            .iter()
            .map(String::as_str)
            .collect();

        let keys: BTreeSet<&String> = desired.keys().chain(recorded.keys()).collect();
        let mut diff = Diff::new();

        for key in keys {
            if ignored.contains(key.as_str()) {
                continue;
            }

            let old = recorded.get(key.as_str());
            let new = desired.get(key.as_str()).cloned().unwrap_or(DiffValue::Absent);

            let changed = match (&new, old) {
                (DiffValue::KnownAfterApply, _) => true,
                (DiffValue::Known(v), Some(o)) => v != o,
                (DiffValue::Known(v), None) => !v.is_null(),
                (DiffValue::Absent, Some(o)) => !o.is_null(),
                (DiffValue::Absent, None) => false,
            };
            if !changed {
                continue;
            }

            let action = self.policies.classify(node.kind(), key).ok_or_else(|| {
                PlanError::DiffPolicy {
                    resource_type: node.kind().to_string(),
                    name: node.name().to_string(),
                    attribute: key.clone(),
                }
            })?;

            debug!("{}: {key} changed ({action:?})", node.id);
            diff.insert(
                key.clone(),
                AttrDiff {
                    old: old.cloned(),
                    new,
                    action: Some(action),
                },
            );
        }

        Ok(diff)
    }
}

impl AttrDiff {
    /// Returns true if this change forces replacement.
    #[must_use]
    pub fn forces_replacement(&self) -> bool {
        self.action == Some(ChangeAction::Replace)
    }
}

impl fmt::Display for DiffValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::KnownAfterApply => write!(f, "(known after apply)"),
            Self::Absent => write!(f, "(removed)"),
        }
    }
}

impl fmt::Display for AttrDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old {
            Some(old) => write!(f, "{old} -> {}", self.new)?,
            None => write!(f, "{}", self.new)?,
        }
        if self.forces_replacement() {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}
