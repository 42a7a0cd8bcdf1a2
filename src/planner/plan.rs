//! Plan types and construction.
//!
//! The planner walks the resource graph in topological order, diffs every node
//! against the snapshot and emits one operation per resource. Deletes of
//! resources no longer declared come last.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info};

use crate::error::{PlanError, Result};
use crate::graph::{OutputRef, ResourceGraph, ResourceId, Value};
use crate::state::StateSnapshot;

use super::diff::{Diff, DiffEngine, DiffValue};
use super::policy::PolicyRegistry;

/// A complete plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Planned operations in execution order.
    pub operations: Vec<PlannedOperation>,
}

/// A single planned operation.
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    /// Target resource.
    pub resource_id: ResourceId,
    /// What to do.
    pub kind: OperationKind,
    /// Attribute changes.
    pub diff: Diff,
    /// Indices of operations that must complete first.
    pub dependencies: Vec<usize>,
    /// Why this operation was planned.
    pub reason: String,
    /// Provider identifier of the existing resource, if any.
    pub provider_id: Option<String>,
    /// Create the replacement before deleting the old resource.
    pub create_before_destroy: bool,
    /// Indices of operations that must have removed their old instance
    /// before this operation removes its own.
    pub destroy_dependencies: Vec<usize>,
    /// Deletes a superseded instance (`provider_id`) instead of the current one.
    pub deposed: bool,
}

/// Kinds of planned operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete and recreate a resource.
    Replace,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    NoOp,
}

/// Counts of operations per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Unchanged resources.
    pub unchanged: usize,
}

/// Builds plans from a graph and a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    engine: DiffEngine,
}

impl Planner {
    /// Creates a planner using the given diff policies.
    #[must_use]
    pub const fn new(policies: PolicyRegistry) -> Self {
        Self {
            engine: DiffEngine::new(policies),
        }
    }

    /// Plans the operations converging `snapshot` to `graph`.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] for unclassified attribute changes, references
    /// to unavailable outputs, and deletion or replacement of protected
    /// resources. Nothing has been mutated when planning fails.
    pub fn plan(
        &self,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
        config_hash: &str,
    ) -> Result<Plan> {
        let mut operations: Vec<PlannedOperation> = Vec::with_capacity(graph.len());
        let mut index: HashMap<ResourceId, usize> = HashMap::new();
        // Resources whose snapshot outputs remain valid during this run.
        let mut known: BTreeSet<ResourceId> = BTreeSet::new();

        for node in graph.topological_order() {
            let mut lookup = |r: &OutputRef| -> std::result::Result<Option<Value>, PlanError> {
                let unavailable = || PlanError::Reference {
                    from: node.id.to_string(),
                    target: r.resource.to_string(),
                    key: r.key.clone(),
                };
                if !graph.contains(&r.resource) {
                    return Err(unavailable());
                }
                if !known.contains(&r.resource) {
                    return Ok(None);
                }
                snapshot
                    .get(&r.resource)
                    .and_then(|state| state.lookup(&r.key))
                    .cloned()
                    .map(Some)
                    .ok_or_else(unavailable)
            };

            let mut desired = BTreeMap::new();
            for (key, attr) in &node.attributes {
                let value = attr
                    .try_resolve(&mut lookup)?
                    .map_or(DiffValue::KnownAfterApply, DiffValue::Known);
                desired.insert(key.clone(), value);
            }

            let recorded = snapshot.get(&node.id);
            let (kind, diff, reason) = match recorded {
                None => (
                    OperationKind::Create,
                    self.engine.creation(&desired),
                    String::from("not in state"),
                ),
                Some(state) => {
                    let diff = self.engine.compare(node, &desired, &state.attributes)?;
                    let replacing: Vec<&str> = diff
                        .iter()
                        .filter(|(_, d)| d.forces_replacement())
                        .map(|(k, _)| k.as_str())
                        .collect();
                    if diff.is_empty() {
                        (OperationKind::NoOp, diff, String::from("up to date"))
                    } else if replacing.is_empty() {
                        let changed = diff.keys().cloned().collect::<Vec<_>>().join(", ");
                        (OperationKind::Update, diff, format!("changed: {changed}"))
                    } else {
                        let reason = format!("forces replacement: {}", replacing.join(", "));
                        (OperationKind::Replace, diff, reason)
                    }
                }
            };

            if kind == OperationKind::Replace && (node.lifecycle.protect || recorded.is_some_and(|s| s.protected)) {
                return Err(PlanError::ProtectedResource {
                    id: node.id.to_string(),
                    action: String::from("replace"),
                }
                .into());
            }

            if matches!(kind, OperationKind::NoOp | OperationKind::Update) {
                known.insert(node.id.clone());
            }

            let dependencies = graph
                .dependencies(&node.id)
                .into_iter()
                .filter_map(|d| index.get(d).copied())
                .collect();

            debug!("Planned {kind} {}", node.id);
            index.insert(node.id.clone(), operations.len());
            operations.push(PlannedOperation {
                resource_id: node.id.clone(),
                kind,
                diff,
                dependencies,
                reason,
                provider_id: recorded.map(|s| s.provider_id.clone()),
                create_before_destroy: node.lifecycle.create_before_destroy,
                destroy_dependencies: Vec::new(),
                deposed: false,
            });
        }

        Self::plan_deposed(snapshot, graph, &index, &mut operations);
        let orphans: BTreeSet<&ResourceId> =
            snapshot.ids().filter(|id| !graph.contains(id)).collect();
        Self::plan_deletes(snapshot, &orphans, &mut operations, &mut index, "removed from configuration")?;
        Self::order_destroys(snapshot, &mut operations);

        let plan = Plan {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operations,
        };
        info!("Plan: {}", plan.summary());
        Ok(plan)
    }

    /// Plans the deletion of every resource in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ProtectedResource`] if any recorded resource is protected.
    pub fn plan_destroy(&self, snapshot: &StateSnapshot) -> Result<Plan> {
        let mut operations = Vec::with_capacity(snapshot.len());
        let mut index = HashMap::new();
        let all: BTreeSet<&ResourceId> = snapshot.ids().collect();
        Self::plan_deposed(snapshot, &ResourceGraph::empty(), &index, &mut operations);
        Self::plan_deletes(snapshot, &all, &mut operations, &mut index, "destroy")?;

        let plan = Plan {
            created_at: Utc::now(),
            config_hash: snapshot.config_hash.clone(),
            operations,
        };
        info!("Destroy plan: {}", plan.summary());
        Ok(plan)
    }

    /// Appends deletes of `targets`, dependents first.
    ///
    /// A delete depends on the deletes of its recorded dependents and on the
    /// already-planned operations of recorded dependents that stay declared.
    fn plan_deletes(
        snapshot: &StateSnapshot,
        targets: &BTreeSet<&ResourceId>,
        operations: &mut Vec<PlannedOperation>,
        index: &mut HashMap<ResourceId, usize>,
        reason: &str,
    ) -> Result<()> {
        let mut dependents: BTreeMap<&ResourceId, Vec<&ResourceId>> = BTreeMap::new();
        for (id, state) in &snapshot.resources {
            for dependency in &state.dependencies {
                dependents.entry(dependency).or_default().push(id);
            }
        }

        for id in targets {
            if snapshot.get(id).is_some_and(|s| s.protected) {
                return Err(PlanError::ProtectedResource {
                    id: id.to_string(),
                    action: String::from("delete"),
                }
                .into());
            }
        }

        let mut remaining: BTreeSet<&ResourceId> = targets.clone();
        while !remaining.is_empty() {
            // Next target none of whose remaining targets depends on it; a
            // recorded cycle falls back to identity order.
            let next = remaining
                .iter()
                .copied()
                .find(|id| {
                    dependents
                        .get(id)
                        .is_none_or(|ds| ds.iter().all(|d| !remaining.contains(d)))
                })
                .or_else(|| remaining.iter().copied().next());
            let Some(id) = next else { break };
            remaining.remove(id);

            // Superseded instances go before the current one.
            let mut dependencies: Vec<usize> = dependents
                .get(id)
                .map(|ds| ds.iter().filter_map(|d| index.get(*d).copied()).collect())
                .unwrap_or_default();
            dependencies.extend(
                operations
                    .iter()
                    .enumerate()
                    .filter(|(_, op)| op.deposed && op.resource_id == *id)
                    .map(|(i, _)| i),
            );
            let provider_id = snapshot.get(id).map(|s| s.provider_id.clone());

            index.insert(id.clone(), operations.len());
            operations.push(PlannedOperation {
                resource_id: id.clone(),
                kind: OperationKind::Delete,
                diff: Diff::new(),
                dependencies,
                reason: reason.to_string(),
                provider_id,
                create_before_destroy: false,
                destroy_dependencies: Vec::new(),
                deposed: false,
            });
        }

        Ok(())
    }

    /// Appends deletes of instances superseded by an earlier replacement.
    ///
    /// Each waits for the current operation on its resource and for the
    /// operations of its declared dependents, which move their references to
    /// the current instance first.
    fn plan_deposed(
        snapshot: &StateSnapshot,
        graph: &ResourceGraph,
        index: &HashMap<ResourceId, usize>,
        operations: &mut Vec<PlannedOperation>,
    ) {
        for (id, provider_ids) in &snapshot.deposed {
            let dependencies: Vec<usize> = std::iter::once(id)
                .chain(graph.dependents(id))
                .filter_map(|d| index.get(d).copied())
                .collect();
            for provider_id in provider_ids {
                debug!("Planned delete of deposed {provider_id} of {id}");
                operations.push(PlannedOperation {
                    resource_id: id.clone(),
                    kind: OperationKind::Delete,
                    diff: Diff::new(),
                    dependencies: dependencies.clone(),
                    reason: format!("deposed instance {provider_id}"),
                    provider_id: Some(provider_id.clone()),
                    create_before_destroy: false,
                    destroy_dependencies: Vec::new(),
                    deposed: true,
                });
            }
        }
    }

    /// Orders removals of old instances dependents first.
    ///
    /// A replacement that deletes before creating must wait until every
    /// recorded dependent that is also going away has been removed: deletes,
    /// and replacements that delete first.
    fn order_destroys(snapshot: &StateSnapshot, operations: &mut [PlannedOperation]) {
        let removes_first = |op: &PlannedOperation| match op.kind {
            OperationKind::Delete => !op.deposed,
            OperationKind::Replace => !op.create_before_destroy,
            _ => false,
        };

        for i in 0..operations.len() {
            let op = &operations[i];
            if op.kind != OperationKind::Replace || op.create_before_destroy {
                continue;
            }
            let target = &op.resource_id;
            let waits_for: Vec<usize> = operations
                .iter()
                .enumerate()
                .filter(|&(k, other)| {
                    k != i
                        && removes_first(other)
                        && snapshot
                            .get(&other.resource_id)
                            .is_some_and(|s| s.dependencies.contains(target))
                })
                .map(|(k, _)| k)
                .collect();
            operations[i].destroy_dependencies = waits_for;
        }
    }
}

impl Plan {
    /// Returns true if the plan has no operations.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of operations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if any operation mutates a resource.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.kind != OperationKind::NoOp)
    }

    /// Counts operations per kind.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match op.kind {
                OperationKind::Create => summary.create += 1,
                OperationKind::Update => summary.update += 1,
                OperationKind::Replace => summary.replace += 1,
                OperationKind::Delete => summary.delete += 1,
                OperationKind::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }
}

impl PlannedOperation {
    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            OperationKind::Create => format!("Create {}", self.resource_id),
            OperationKind::Update => format!("Update {}", self.resource_id),
            OperationKind::Replace => format!("Replace {}", self.resource_id),
            OperationKind::Delete if self.deposed => format!(
                "Delete deposed {} ({})",
                self.resource_id,
                self.provider_id.as_deref().unwrap_or("unknown")
            ),
            OperationKind::Delete => format!("Delete {}", self.resource_id),
            OperationKind::NoOp => format!("No change for {}", self.resource_id),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

impl fmt::Display for PlannedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.resource_id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({}):", self.summary())?;
        for (i, op) in self.operations.iter().enumerate() {
            if op.kind == OperationKind::NoOp {
                continue;
            }
            writeln!(f, "  {i}. {op}")?;
            for (key, change) in &op.diff {
                writeln!(f, "       {key}: {change}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerraceError;
    use crate::graph::{AttrMap, Attribute, GraphBuilder, Lifecycle, ResourceNode};
    use crate::state::ResourceState;

    fn id(kind: &str, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn reference(kind: &str, name: &str, key: &str) -> Attribute {
        Attribute::Pending(OutputRef::new(id(kind, name), key))
    }

    fn state(provider_id: &str, attrs: &[(&str, Value)], deps: Vec<ResourceId>) -> ResourceState {
        let attributes: AttrMap = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        let mut outputs = AttrMap::new();
        outputs.insert(String::from("id"), Value::from(provider_id));
        ResourceState::new(provider_id, attributes, outputs).with_dependencies(deps)
    }

    /// network N <- subnet S1 <- instance I1.
    fn scenario_a_graph() -> ResourceGraph {
        GraphBuilder::new()
            .with(
                ResourceNode::new(id("network", "n"))
                    .with_attribute("cidr_block", Value::from("10.0.0.0/16")),
            )
            .and_then(|b| {
                b.with(
                    ResourceNode::new(id("subnet", "s1"))
                        .with_attribute("network_id", reference("network", "n", "id"))
                        .with_attribute("cidr_block", Value::from("10.0.1.0/24")),
                )
            })
            .and_then(|b| {
                b.with(
                    ResourceNode::new(id("instance", "i1"))
                        .with_attribute("subnet_id", reference("subnet", "s1", "id"))
                        .with_attribute("ami", Value::from("ami-1")),
                )
            })
            .and_then(GraphBuilder::build)
            .expect("valid graph")
    }

    fn applied_snapshot() -> StateSnapshot {
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.set_resource(
            id("network", "n"),
            state("vpc-1", &[("cidr_block", Value::from("10.0.0.0/16"))], vec![]),
        );
        snapshot.set_resource(
            id("subnet", "s1"),
            state(
                "subnet-1",
                &[
                    ("network_id", Value::from("vpc-1")),
                    ("cidr_block", Value::from("10.0.1.0/24")),
                ],
                vec![id("network", "n")],
            ),
        );
        snapshot.set_resource(
            id("instance", "i1"),
            state(
                "i-1",
                &[
                    ("subnet_id", Value::from("subnet-1")),
                    ("ami", Value::from("ami-1")),
                ],
                vec![id("subnet", "s1")],
            ),
        );
        snapshot
    }

    fn kinds(plan: &Plan) -> Vec<(OperationKind, String)> {
        plan.operations
            .iter()
            .map(|op| (op.kind, op.resource_id.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_snapshot_creates_in_dependency_order() {
        let plan = Planner::default()
            .plan(&scenario_a_graph(), &StateSnapshot::new("net", "dev"), "h")
            .expect("plan");

        assert_eq!(
            kinds(&plan),
            vec![
                (OperationKind::Create, String::from("network.n")),
                (OperationKind::Create, String::from("subnet.s1")),
                (OperationKind::Create, String::from("instance.i1")),
            ]
        );
        assert_eq!(plan.operations[1].dependencies, vec![0]);
        assert_eq!(plan.operations[2].dependencies, vec![1]);
        assert_eq!(
            plan.operations[1].diff["network_id"].new,
            DiffValue::KnownAfterApply
        );
    }

    #[test]
    fn test_planning_applied_state_is_all_noop() {
        let planner = Planner::default();
        let graph = scenario_a_graph();
        let snapshot = applied_snapshot();

        let first = planner.plan(&graph, &snapshot, "h").expect("plan");
        let second = planner.plan(&graph, &snapshot, "h").expect("plan");

        assert!(!first.has_changes());
        assert_eq!(first.summary().unchanged, 3);
        assert_eq!(kinds(&first), kinds(&second));
        assert_eq!(first.to_string(), "No changes required");
    }

    #[test]
    fn test_replace_attribute_change_plans_replace() {
        let graph = GraphBuilder::new()
            .with(
                ResourceNode::new(id("target_group", "r"))
                    .with_attribute("port", Value::Int(443))
                    .with_attribute("protocol", Value::from("HTTP")),
            )
            .and_then(GraphBuilder::build)
            .expect("valid graph");
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.set_resource(
            id("target_group", "r"),
            state(
                "tg-1",
                &[("port", Value::Int(80)), ("protocol", Value::from("HTTP"))],
                vec![],
            ),
        );

        let plan = Planner::default().plan(&graph, &snapshot, "h").expect("plan");
        assert_eq!(kinds(&plan), vec![(OperationKind::Replace, String::from("target_group.r"))]);
        assert_eq!(plan.operations[0].provider_id.as_deref(), Some("tg-1"));
        assert_eq!(plan.operations[0].diff["port"].old, Some(Value::Int(80)));
    }

    #[test]
    fn test_replacement_cascades_through_references() {
        let graph = scenario_a_graph();
        let mut snapshot = applied_snapshot();
        // The network was applied with a different CIDR, forcing replacement.
        snapshot.set_resource(
            id("network", "n"),
            state("vpc-1", &[("cidr_block", Value::from("10.9.0.0/16"))], vec![]),
        );

        let plan = Planner::default().plan(&graph, &snapshot, "h").expect("plan");
        assert_eq!(
            plan.operations.iter().map(|op| op.kind).collect::<Vec<_>>(),
            vec![OperationKind::Replace; 3]
        );
    }

    #[test]
    fn test_delete_first_replacements_remove_dependents_first() {
        let graph = scenario_a_graph();
        let mut snapshot = applied_snapshot();
        snapshot.set_resource(
            id("network", "n"),
            state("vpc-1", &[("cidr_block", Value::from("10.9.0.0/16"))], vec![]),
        );

        let plan = Planner::default().plan(&graph, &snapshot, "h").expect("plan");
        // network, subnet, instance in that order.
        assert_eq!(plan.operations[0].destroy_dependencies, vec![1]);
        assert_eq!(plan.operations[1].destroy_dependencies, vec![2]);
        assert!(plan.operations[2].destroy_dependencies.is_empty());
        assert_eq!(plan.operations[1].dependencies, vec![0]);
    }

    #[test]
    fn test_deposed_instance_deleted_after_current_one_settles() {
        let graph = scenario_a_graph();
        let mut snapshot = applied_snapshot();
        snapshot.add_deposed(id("network", "n"), "vpc-0");

        let plan = Planner::default().plan(&graph, &snapshot, "h").expect("plan");
        assert_eq!(plan.operations.len(), 4);
        let deposed = &plan.operations[3];
        assert!(deposed.deposed);
        assert_eq!(deposed.kind, OperationKind::Delete);
        assert_eq!(deposed.resource_id, id("network", "n"));
        assert_eq!(deposed.provider_id.as_deref(), Some("vpc-0"));
        assert_eq!(deposed.dependencies, vec![0, 1]);
        assert!(plan.has_changes());
        assert!(deposed.description().contains("deposed"));

        let destroy = Planner::default().plan_destroy(&snapshot).expect("plan");
        assert!(destroy.operations[0].deposed);
        let network = destroy
            .operations
            .iter()
            .position(|op| !op.deposed && op.resource_id == id("network", "n"))
            .expect("network delete");
        assert!(destroy.operations[network].dependencies.contains(&0));
    }

    #[test]
    fn test_update_keeps_dependents_known() {
        let graph = GraphBuilder::new()
            .with(
                ResourceNode::new(id("network", "n"))
                    .with_attribute("cidr_block", Value::from("10.0.0.0/16"))
                    .with_attribute("tags", Value::from("prod")),
            )
            .and_then(|b| {
                b.with(
                    ResourceNode::new(id("subnet", "s1"))
                        .with_attribute("network_id", reference("network", "n", "id")),
                )
            })
            .and_then(GraphBuilder::build)
            .expect("valid graph");
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.set_resource(
            id("network", "n"),
            state(
                "vpc-1",
                &[
                    ("cidr_block", Value::from("10.0.0.0/16")),
                    ("tags", Value::from("dev")),
                ],
                vec![],
            ),
        );
        snapshot.set_resource(
            id("subnet", "s1"),
            state("subnet-1", &[("network_id", Value::from("vpc-1"))], vec![id("network", "n")]),
        );

        let plan = Planner::default().plan(&graph, &snapshot, "h").expect("plan");
        assert_eq!(
            plan.operations.iter().map(|op| op.kind).collect::<Vec<_>>(),
            vec![OperationKind::Update, OperationKind::NoOp]
        );
    }

    #[test]
    fn test_undeclared_resources_deleted_dependents_first() {
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.set_resource(id("network", "a"), state("vpc-a", &[], vec![]));
        snapshot.set_resource(
            id("subnet", "b"),
            state("subnet-b", &[], vec![id("network", "a")]),
        );

        let plan = Planner::default()
            .plan(&ResourceGraph::empty(), &snapshot, "h")
            .expect("plan");

        assert_eq!(
            kinds(&plan),
            vec![
                (OperationKind::Delete, String::from("subnet.b")),
                (OperationKind::Delete, String::from("network.a")),
            ]
        );
        assert_eq!(plan.operations[1].dependencies, vec![0]);
    }

    #[test]
    fn test_delete_waits_for_declared_dependent() {
        // The instance stays declared but no longer references the old subnet.
        let graph = GraphBuilder::new()
            .with(ResourceNode::new(id("instance", "i1")).with_attribute("ami", Value::from("ami-1")))
            .and_then(GraphBuilder::build)
            .expect("valid graph");
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.set_resource(id("subnet", "old"), state("subnet-1", &[], vec![]));
        snapshot.set_resource(
            id("instance", "i1"),
            state("i-1", &[("ami", Value::from("ami-1"))], vec![id("subnet", "old")]),
        );

        let plan = Planner::default().plan(&graph, &snapshot, "h").expect("plan");
        assert_eq!(plan.operations[1].kind, OperationKind::Delete);
        assert_eq!(plan.operations[1].dependencies, vec![0]);
    }

    #[test]
    fn test_missing_output_on_known_dependency() {
        let graph = GraphBuilder::new()
            .with(ResourceNode::new(id("network", "n")))
            .and_then(|b| {
                b.with(
                    ResourceNode::new(id("subnet", "s1"))
                        .with_attribute("network_id", reference("network", "n", "arn")),
                )
            })
            .and_then(GraphBuilder::build)
            .expect("valid graph");
        let mut snapshot = StateSnapshot::new("net", "dev");
        snapshot.set_resource(id("network", "n"), state("vpc-1", &[], vec![]));

        let err = Planner::default()
            .plan(&graph, &snapshot, "h")
            .expect_err("missing output");
        assert!(matches!(err, TerraceError::Plan(PlanError::Reference { ref key, .. }) if key == "arn"));
    }

    #[test]
    fn test_protected_resources() {
        let mut snapshot = StateSnapshot::new("net", "dev");
        let mut protected = state("vpc-1", &[], vec![]);
        protected.protected = true;
        snapshot.set_resource(id("network", "n"), protected);

        let err = Planner::default()
            .plan(&ResourceGraph::empty(), &snapshot, "h")
            .expect_err("protected");
        assert!(matches!(err, TerraceError::Plan(PlanError::ProtectedResource { .. })));

        let graph = GraphBuilder::new()
            .with(
                ResourceNode::new(id("network", "n"))
                    .with_attribute("cidr_block", Value::from("10.1.0.0/16"))
                    .with_lifecycle(Lifecycle {
                        protect: true,
                        ..Lifecycle::default()
                    }),
            )
            .and_then(GraphBuilder::build)
            .expect("valid graph");
        let err = Planner::default()
            .plan(&graph, &snapshot, "h")
            .expect_err("protected");
        assert!(matches!(
            err,
            TerraceError::Plan(PlanError::ProtectedResource { ref action, .. }) if action == "replace"
        ));
    }

    #[test]
    fn test_plan_destroy_reverses_dependencies() {
        let plan = Planner::default()
            .plan_destroy(&applied_snapshot())
            .expect("plan");
        assert_eq!(
            kinds(&plan),
            vec![
                (OperationKind::Delete, String::from("instance.i1")),
                (OperationKind::Delete, String::from("subnet.s1")),
                (OperationKind::Delete, String::from("network.n")),
            ]
        );
    }
}
