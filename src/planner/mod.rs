//! Planning module for infrastructure runs.
//!
//! This module compares the resource graph with the recorded snapshot,
//! produces an ordered plan of operations, and executes that plan against a
//! provider with bounded parallelism.

mod diff;
mod executor;
mod plan;
mod policy;

pub use diff::{AttrDiff, Diff, DiffEngine, DiffValue};
pub use executor::{
    DEFAULT_PARALLELISM, ExecutionReport, Executor, OperationResult, OperationStatus,
};
pub use plan::{OperationKind, Plan, PlanSummary, PlannedOperation, Planner};
pub use policy::{ChangeAction, DiffPolicy, PolicyRegistry};
