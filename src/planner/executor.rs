//! Plan executor for applying plans against a provider.
//!
//! The scheduler runs on the caller's task. It hands ready operations to a
//! bounded pool of spawned workers, resolves pending references from its
//! output table just before an operation starts, and records every success in
//! the state session before releasing that operation's dependents.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ConfigHasher;
use crate::error::{ExecuteError, ProviderError, ProviderErrorCode, Result};
use crate::graph::{AttrMap, OutputRef, ResourceGraph, ResourceId, Value};
use crate::provider::{Provider, RetryPolicy, with_retry};
use crate::state::{ResourceState, StateSession, StateSnapshot};

use super::plan::{OperationKind, Plan, PlannedOperation};

/// Default number of concurrent provider calls.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Executor for plans.
pub struct Executor {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    parallelism: usize,
    cancel: Option<watch::Receiver<bool>>,
}

/// Final status of a planned operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// The provider call succeeded and the result was recorded.
    Succeeded,
    /// Nothing needed to be done.
    NoOp,
    /// The operation failed.
    Failed,
    /// A dependency failed, so the operation never started.
    Skipped,
    /// The run was cancelled before the operation started.
    Cancelled,
}

/// Result of executing a single operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    /// Index of the operation in the plan.
    pub index: usize,
    /// Target resource.
    pub resource_id: ResourceId,
    /// Planned kind.
    pub kind: OperationKind,
    /// The operation deleted a superseded instance.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deposed: bool,
    /// Final status.
    pub status: OperationStatus,
    /// Provider calls made, retries included.
    pub attempts: u32,
    /// Provider identifier after the operation.
    pub provider_id: Option<String>,
    /// Error message (if failed or skipped).
    pub error: Option<String>,
}

/// Result of executing an entire plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Per-operation results in plan order.
    pub results: Vec<OperationResult>,
    /// Referenceable values of every resource known at the end of the run.
    outputs: HashMap<ResourceId, AttrMap>,
}

/// What a worker must do for one step.
enum Job {
    Create {
        attributes: AttrMap,
    },
    Update {
        provider_id: String,
        attributes: AttrMap,
        changed: AttrMap,
    },
    /// Create the new instance, then delete the old one.
    CreateThenDelete {
        provider_id: String,
        attributes: AttrMap,
    },
    Delete {
        provider_id: String,
    },
}

/// Which part of an operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Removal of the old instance of a replacement that deletes first.
    Destroy,
    /// The whole operation, or the create half of such a replacement.
    Apply,
}

/// Unit of scheduling: one operation, or one half of a split replacement.
#[derive(Debug, Clone, Copy)]
struct Step {
    op: usize,
    phase: Phase,
}

/// Steps of a plan with their ordering constraints.
struct Schedule {
    steps: Vec<Step>,
    dependents: Vec<Vec<usize>>,
    waiting: Vec<usize>,
}

/// A resource as left by a worker.
struct Applied {
    provider_id: String,
    attributes: AttrMap,
    outputs: AttrMap,
}

/// What a worker reports back to the scheduler.
struct Outcome {
    attempts: u32,
    /// Resource that now exists, if the step created or updated one.
    applied: Option<Applied>,
    /// The previously recorded resource no longer exists.
    gone: bool,
    /// Old instance that outlived its replacement's cleanup.
    deposed: Option<String>,
    /// Set when the step failed, even if `applied` is also set.
    error: Option<ProviderError>,
}

impl Executor {
    /// Creates an executor with default retry policy and parallelism.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            cancel: None,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the maximum number of concurrent provider calls.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Stops scheduling new operations once `cancel` turns true.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Executes a plan.
    ///
    /// Operations whose dependencies all completed run concurrently, up to the
    /// configured parallelism. A replacement that deletes first runs as two
    /// steps: its old instance goes only after the old instances of replaced
    /// or deleted dependents are gone, and its new instance only after its
    /// dependencies are in place. A failure marks every transitive dependent
    /// `Skipped`; unrelated operations keep running.
    ///
    /// # Errors
    ///
    /// Provider failures are reported per operation, not as errors. This only
    /// fails if the plan references operations it does not contain.
    pub async fn execute(
        &self,
        plan: &Plan,
        graph: &ResourceGraph,
        session: &mut StateSession<'_>,
    ) -> Result<ExecutionReport> {
        info!(
            "Executing plan with {} operations via {} provider (parallelism {})",
            plan.len(),
            self.provider.name(),
            self.parallelism
        );

        let Schedule {
            steps,
            dependents,
            mut waiting,
        } = schedule(plan)?;

        let count = plan.len();
        let mut results: Vec<Option<OperationResult>> = vec![None; count];
        let mut attempts: Vec<u32> = vec![0; count];
        let mut settled: Vec<bool> = vec![false; steps.len()];
        let mut table = output_table(session.snapshot());
        let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&s| waiting[s] == 0).collect();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut workers: JoinSet<(usize, Outcome)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut cancel = self.cancel.clone();
        let mut cancelled = false;
        let hasher = ConfigHasher::new();

        loop {
            while !cancelled {
                // The signal may have fired while a completion was handled.
                if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                    warn!("Cancellation requested, no further operations will start");
                    cancelled = true;
                    break;
                }

                let Some(&s) = ready.first() else { break };
                let Step { op: i, phase } = steps[s];
                let op = &plan.operations[i];

                if op.kind == OperationKind::NoOp {
                    ready.remove(&s);
                    settled[s] = true;
                    results[i] = Some(result(i, op, OperationStatus::NoOp, 0, op.provider_id.clone(), None));
                    release(s, &dependents, &settled, &mut waiting, &mut ready);
                    continue;
                }

                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                ready.remove(&s);

                let job = match job_for(op, phase, graph, &table) {
                    Ok(job) => job,
                    Err(e) => {
                        error!("Cannot start {}: {e}", op.description());
                        settled[s] = true;
                        results[i] = Some(result(i, op, OperationStatus::Failed, attempts[i], op.provider_id.clone(), Some(e.to_string())));
                        skip_dependents(s, &steps, plan, &dependents, &attempts, &mut settled, &mut results);
                        continue;
                    }
                };

                match phase {
                    Phase::Destroy => debug!("Removing old instance of {}", op.resource_id),
                    Phase::Apply => debug!("Starting {}", op.description()),
                }
                let provider = Arc::clone(&self.provider);
                let retry = self.retry;
                let id = op.resource_id.clone();
                let handle = workers.spawn(async move {
                    let outcome = run_job(provider.as_ref(), &retry, &id, job).await;
                    drop(permit);
                    (s, outcome)
                });
                running.insert(handle.id(), s);
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                joined = workers.join_next_with_id() => {
                    let Some(joined) = joined else { continue };
                    let (s, outcome) = match joined {
                        Ok((task, (s, outcome))) => {
                            running.remove(&task);
                            (s, outcome)
                        }
                        Err(e) => {
                            let Some(s) = running.remove(&e.id()) else { continue };
                            let message = format!("worker crashed: {e}");
                            (s, Outcome::failed(0, ProviderError::transient(message)))
                        }
                    };

                    let Step { op: i, phase } = steps[s];
                    let op = &plan.operations[i];
                    attempts[i] += outcome.attempts;
                    let (status, provider_id, message) = self
                        .complete(op, phase, graph, outcome, &hasher, session, &mut table)
                        .await;
                    settled[s] = true;

                    if status == OperationStatus::Succeeded {
                        if phase == Phase::Apply {
                            results[i] = Some(result(i, op, status, attempts[i], provider_id, None));
                        }
                        release(s, &dependents, &settled, &mut waiting, &mut ready);
                    } else {
                        results[i] = Some(result(i, op, status, attempts[i], provider_id, message));
                        skip_dependents(s, &steps, plan, &dependents, &attempts, &mut settled, &mut results);
                    }
                }
                () = wait_for_cancel(&mut cancel), if !cancelled => {
                    warn!("Cancellation requested, waiting for {} in-flight operations", workers.len());
                    cancelled = true;
                }
            }
        }

        let results: Vec<OperationResult> = results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.unwrap_or_else(|| {
                    let op = &plan.operations[i];
                    let status = if cancelled {
                        OperationStatus::Cancelled
                    } else {
                        OperationStatus::Skipped
                    };
                    result(i, op, status, attempts[i], op.provider_id.clone(), None)
                })
            })
            .collect();

        let report = ExecutionReport {
            results,
            outputs: table,
        };
        info!("Execution finished: {}", report.summary_line());
        Ok(report)
    }

    /// Records a finished step and returns its status.
    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        op: &PlannedOperation,
        phase: Phase,
        graph: &ResourceGraph,
        outcome: Outcome,
        hasher: &ConfigHasher,
        session: &mut StateSession<'_>,
        table: &mut HashMap<ResourceId, AttrMap>,
    ) -> (OperationStatus, Option<String>, Option<String>) {
        let Outcome {
            attempts,
            applied,
            gone,
            deposed,
            error,
        } = outcome;
        let id = &op.resource_id;

        let recorded = match applied {
            Some(applied) => {
                // Providers may report only the outputs an update changed.
                let mut outputs = match session.snapshot().get(id) {
                    Some(previous) if op.kind == OperationKind::Update => previous.outputs.clone(),
                    _ => AttrMap::new(),
                };
                outputs.extend(applied.outputs);

                let mut entry = ResourceState::new(&applied.provider_id, applied.attributes, outputs)
                    .with_dependencies(graph.dependencies(id).into_iter().cloned().collect());
                entry
                    .outputs
                    .entry(String::from("id"))
                    .or_insert_with(|| Value::from(applied.provider_id.as_str()));
                entry.attributes_hash = hasher.hash_attributes(&entry.attributes);
                entry.protected = graph.get(id).is_some_and(|n| n.lifecycle.protect);

                table.insert(id.clone(), referenceable(&entry));
                match deposed {
                    Some(old) => match session.depose(id, &old).await {
                        Ok(()) => session.record_result(id, entry).await,
                        Err(e) => Err(e),
                    },
                    None => session.record_result(id, entry).await,
                }
            }
            None if gone && op.deposed => match op.provider_id.as_deref() {
                Some(old) => session.forget_deposed(id, old).await,
                None => Ok(()),
            },
            None if gone => {
                table.remove(id);
                session.forget(id).await
            }
            None => Ok(()),
        };

        let provider_id = session.snapshot().get(id).map(|s| s.provider_id.clone());

        if let Err(e) = recorded {
            error!("Failed to record {id}: {e}");
            return (OperationStatus::Failed, provider_id, Some(e.to_string()));
        }

        match (error, phase) {
            (Some(e), _) => {
                error!("{} failed after {attempts} attempt(s): {e}", op.description());
                (OperationStatus::Failed, provider_id, Some(e.to_string()))
            }
            (None, Phase::Destroy) => {
                info!("Removed old instance of {id}");
                (OperationStatus::Succeeded, provider_id, None)
            }
            (None, Phase::Apply) => {
                info!("{} succeeded", op.description());
                (OperationStatus::Succeeded, provider_id, None)
            }
        }
    }
}

/// Splits the plan into steps and wires their dependencies.
///
/// An operation's apply step waits for the final step of every operation it
/// depends on. A replacement that deletes first gets a destroy step ahead of
/// its apply step, and that destroy step waits for the removal steps named
/// in `destroy_dependencies`.
fn schedule(plan: &Plan) -> std::result::Result<Schedule, ExecuteError> {
    let count = plan.len();
    let mut steps = Vec::with_capacity(count);
    let mut apply_step = vec![0; count];
    let mut destroy_step: Vec<Option<usize>> = vec![None; count];
    for (i, op) in plan.operations.iter().enumerate() {
        if op.kind == OperationKind::Replace && !op.create_before_destroy {
            destroy_step[i] = Some(steps.len());
            steps.push(Step {
                op: i,
                phase: Phase::Destroy,
            });
        }
        apply_step[i] = steps.len();
        steps.push(Step {
            op: i,
            phase: Phase::Apply,
        });
    }

    let unknown = |op: &PlannedOperation, dep: usize| ExecuteError::Aborted {
        reason: format!("{} depends on unknown operation {dep}", op.resource_id),
    };

    let mut requires: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); steps.len()];
    for (i, op) in plan.operations.iter().enumerate() {
        for &dep in &op.dependencies {
            if dep >= count {
                return Err(unknown(op, dep));
            }
            requires[apply_step[i]].insert(apply_step[dep]);
        }
        if let Some(destroy) = destroy_step[i] {
            requires[apply_step[i]].insert(destroy);
            for &dep in &op.destroy_dependencies {
                if dep >= count {
                    return Err(unknown(op, dep));
                }
                requires[destroy].insert(destroy_step[dep].unwrap_or(apply_step[dep]));
            }
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (s, deps) in requires.iter().enumerate() {
        for &d in deps {
            dependents[d].push(s);
        }
    }
    let waiting = requires.iter().map(BTreeSet::len).collect();

    Ok(Schedule {
        steps,
        dependents,
        waiting,
    })
}

/// Seeds the output table from the snapshot.
fn output_table(snapshot: &StateSnapshot) -> HashMap<ResourceId, AttrMap> {
    snapshot
        .resources
        .iter()
        .map(|(id, state)| (id.clone(), referenceable(state)))
        .collect()
}

/// Attributes overlaid with outputs: every key a reference may name.
fn referenceable(state: &ResourceState) -> AttrMap {
    let mut values = state.attributes.clone();
    values.extend(state.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
    values
}

/// Builds the worker job of a step, resolving pending references.
fn job_for(
    op: &PlannedOperation,
    phase: Phase,
    graph: &ResourceGraph,
    table: &HashMap<ResourceId, AttrMap>,
) -> std::result::Result<Job, ExecuteError> {
    let provider_id = || {
        op.provider_id.clone().ok_or_else(|| ExecuteError::Aborted {
            reason: format!("{} has no provider id", op.resource_id),
        })
    };

    if op.kind == OperationKind::Delete || phase == Phase::Destroy {
        return Ok(Job::Delete {
            provider_id: provider_id()?,
        });
    }

    let node = graph.get(&op.resource_id).ok_or_else(|| ExecuteError::Aborted {
        reason: format!("{} is not declared", op.resource_id),
    })?;

    let mut lookup = |r: &OutputRef| -> std::result::Result<Option<Value>, ExecuteError> {
        table
            .get(&r.resource)
            .and_then(|values| values.get(&r.key))
            .cloned()
            .map(Some)
            .ok_or_else(|| ExecuteError::Unresolved {
                from: op.resource_id.to_string(),
                target: r.resource.to_string(),
                key: r.key.clone(),
            })
    };

    let mut attributes = AttrMap::new();
    for (key, attr) in &node.attributes {
        if let Some(value) = attr.try_resolve(&mut lookup)? {
            attributes.insert(key.clone(), value);
        }
    }

    Ok(match op.kind {
        OperationKind::Update => {
            let changed = op
                .diff
                .keys()
                .map(|k| (k.clone(), attributes.get(k).cloned().unwrap_or(Value::Null)))
                .collect();
            Job::Update {
                provider_id: provider_id()?,
                attributes,
                changed,
            }
        }
        OperationKind::Replace if op.create_before_destroy => Job::CreateThenDelete {
            provider_id: provider_id()?,
            attributes,
        },
        _ => Job::Create { attributes },
    })
}

/// Runs one job against the provider.
async fn run_job(provider: &dyn Provider, retry: &RetryPolicy, id: &ResourceId, job: Job) -> Outcome {
    match job {
        Job::Create { attributes } => {
            let (created, attempts) = create(provider, retry, id, attributes).await;
            match created {
                Ok(applied) => Outcome::applied(attempts, applied),
                Err(e) => Outcome::failed(attempts, e),
            }
        }
        Job::Update {
            provider_id,
            attributes,
            changed,
        } => {
            let what = format!("update {id}");
            let (updated, attempts) =
                with_retry(retry, &what, || provider.update(id, &provider_id, &changed)).await;
            match updated {
                Ok(outputs) => Outcome::applied(
                    attempts,
                    Applied {
                        provider_id,
                        attributes,
                        outputs,
                    },
                ),
                Err(e) => Outcome::failed(attempts, e),
            }
        }
        Job::CreateThenDelete {
            provider_id,
            attributes,
        } => {
            let (created, mut attempts) = create(provider, retry, id, attributes).await;
            let applied = match created {
                Ok(applied) => applied,
                Err(e) => return Outcome::failed(attempts, e),
            };
            let (deleted, delete_attempts) = delete(provider, retry, id, &provider_id).await;
            attempts += delete_attempts;
            match deleted {
                Ok(()) => Outcome::applied(attempts, applied),
                Err(e) => {
                    warn!("Old instance {provider_id} of {id} could not be deleted and is kept as deposed");
                    Outcome {
                        deposed: Some(provider_id),
                        ..Outcome::applied(attempts, applied)
                    }
                    .with_error(e)
                }
            }
        }
        Job::Delete { provider_id } => {
            let (deleted, attempts) = delete(provider, retry, id, &provider_id).await;
            match deleted {
                Ok(()) => Outcome {
                    gone: true,
                    ..Outcome::new(attempts)
                },
                Err(e) => Outcome::failed(attempts, e),
            }
        }
    }
}

async fn create(
    provider: &dyn Provider,
    retry: &RetryPolicy,
    id: &ResourceId,
    attributes: AttrMap,
) -> (std::result::Result<Applied, ProviderError>, u32) {
    let what = format!("create {id}");
    let (created, attempts) = with_retry(retry, &what, || provider.create(id, &attributes)).await;
    let applied = created.map(|c| Applied {
        provider_id: c.provider_id,
        attributes,
        outputs: c.outputs,
    });
    (applied, attempts)
}

/// Deletes a resource; one that is already gone counts as deleted.
async fn delete(
    provider: &dyn Provider,
    retry: &RetryPolicy,
    id: &ResourceId,
    provider_id: &str,
) -> (std::result::Result<(), ProviderError>, u32) {
    let what = format!("delete {id}");
    let (deleted, attempts) = with_retry(retry, &what, || provider.delete(id, provider_id)).await;
    match deleted {
        Err(e) if e.code == ProviderErrorCode::NotFound => {
            debug!("{id} ({provider_id}) already deleted");
            (Ok(()), attempts)
        }
        other => (other, attempts),
    }
}

/// Resolves once the cancellation signal turns true; never without a signal.
async fn wait_for_cancel(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Marks step `index` complete and moves dependents with no remaining wait to `ready`.
fn release(
    index: usize,
    dependents: &[Vec<usize>],
    settled: &[bool],
    waiting: &mut [usize],
    ready: &mut BTreeSet<usize>,
) {
    for &d in &dependents[index] {
        waiting[d] = waiting[d].saturating_sub(1);
        if waiting[d] == 0 && !settled[d] {
            ready.insert(d);
        }
    }
}

/// Settles every transitive dependent of a failed step, marking operations
/// without a result `Skipped`.
fn skip_dependents(
    index: usize,
    steps: &[Step],
    plan: &Plan,
    dependents: &[Vec<usize>],
    attempts: &[u32],
    settled: &mut [bool],
    results: &mut [Option<OperationResult>],
) {
    let failed = &plan.operations[steps[index].op].resource_id;
    let mut stack = dependents[index].clone();
    while let Some(d) = stack.pop() {
        if settled[d] {
            continue;
        }
        settled[d] = true;
        stack.extend(dependents[d].iter().copied());

        let i = steps[d].op;
        if results[i].is_some() {
            continue;
        }
        let op = &plan.operations[i];
        warn!("Skipping {} because {failed} did not complete", op.description());
        results[i] = Some(result(
            i,
            op,
            OperationStatus::Skipped,
            attempts[i],
            op.provider_id.clone(),
            Some(format!("dependency {failed} did not complete")),
        ));
    }
}

fn result(
    index: usize,
    op: &PlannedOperation,
    status: OperationStatus,
    attempts: u32,
    provider_id: Option<String>,
    error: Option<String>,
) -> OperationResult {
    OperationResult {
        index,
        resource_id: op.resource_id.clone(),
        kind: op.kind,
        deposed: op.deposed,
        status,
        attempts,
        provider_id,
        error,
    }
}

impl Outcome {
    const fn new(attempts: u32) -> Self {
        Self {
            attempts,
            applied: None,
            gone: false,
            deposed: None,
            error: None,
        }
    }

    fn applied(attempts: u32, applied: Applied) -> Self {
        Self {
            applied: Some(applied),
            ..Self::new(attempts)
        }
    }

    fn failed(attempts: u32, error: ProviderError) -> Self {
        Self::new(attempts).with_error(error)
    }

    fn with_error(mut self, error: ProviderError) -> Self {
        self.error = Some(error);
        self
    }
}

impl ExecutionReport {
    /// Counts results with the given status.
    #[must_use]
    pub fn count(&self, status: OperationStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Returns true if every operation succeeded or had nothing to do.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.status, OperationStatus::Succeeded | OperationStatus::NoOp))
    }

    /// Returns the result for a resource.
    #[must_use]
    pub fn result_for(&self, id: &ResourceId) -> Option<&OperationResult> {
        self.results.iter().find(|r| &r.resource_id == id && !r.deposed)
    }

    /// Resolves a reference against the run's outputs.
    ///
    /// Returns `None` if the referenced resource's operation did not complete
    /// or the key is not exposed.
    #[must_use]
    pub fn resolve(&self, reference: &OutputRef) -> Option<&Value> {
        let completed = self.result_for(&reference.resource).is_none_or(|r| {
            matches!(r.status, OperationStatus::Succeeded | OperationStatus::NoOp)
                && r.kind != OperationKind::Delete
        });
        if !completed {
            return None;
        }
        self.outputs.get(&reference.resource)?.get(&reference.key)
    }

    /// Resolves named outputs; unavailable ones are `None`.
    #[must_use]
    pub fn resolve_outputs(
        &self,
        outputs: &BTreeMap<String, OutputRef>,
    ) -> BTreeMap<String, Option<Value>> {
        outputs
            .iter()
            .map(|(name, r)| (name.clone(), self.resolve(r).cloned()))
            .collect()
    }

    /// One-line summary of the run.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{} succeeded, {} unchanged, {} failed, {} skipped, {} cancelled",
            self.count(OperationStatus::Succeeded),
            self.count(OperationStatus::NoOp),
            self.count(OperationStatus::Failed),
            self.count(OperationStatus::Skipped),
            self.count(OperationStatus::Cancelled)
        )
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::NoOp => "no-op",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Execution Report:")?;
        writeln!(f, "  {}", self.summary_line())?;
        for r in &self.results {
            write!(f, "  [{}] {} {}", r.status, r.kind, r.resource_id)?;
            if let Some(error) = &r.error {
                write!(f, ": {error}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
