//! Run orchestration.
//!
//! A run converges recorded state towards the configuration: it locks the
//! state, loads the snapshot, builds the graph, plans, executes the plan,
//! resolves the named outputs, commits a history entry and unlocks.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{
    ConfigHasher, ConfigParser, ProviderKind, StateBackend, TerraceConfig, build_graph, output_refs,
};
use crate::error::{ConfigError, Result};
use crate::graph::{ResourceGraph, Value};
use crate::planner::{
    Executor, OperationResult, OperationStatus, Plan, PlanSummary, Planner, PolicyRegistry,
};
use crate::provider::{HttpProvider, Provider, RetryPolicy, SimulatedProvider};
use crate::state::{
    LOCK_EXPIRY_SECS, LocalStateStore, RunHistoryEntry, RunOperation, S3StateStore, STATE_DIR,
    StateSession, StateStore, generate_holder_id,
};

/// Exit code of a run in which some operation did not complete.
pub const EXIT_INCOMPLETE: u8 = 2;

/// Interval at which a running apply or destroy renews its state lock.
const LOCK_HEARTBEAT: Duration = Duration::from_secs(LOCK_EXPIRY_SECS.unsigned_abs() / 3);

/// File the simulated provider persists its cloud to, inside the state directory.
const SIMULATED_CLOUD_FILE: &str = "cloud.json";

/// Orchestrates plan and apply runs for one configuration.
pub struct Reconciler<'a> {
    config: &'a TerraceConfig,
    store: &'a dyn StateStore,
    provider: Arc<dyn Provider>,
    policies: PolicyRegistry,
    hasher: ConfigHasher,
    retry: RetryPolicy,
    parallelism: usize,
    cancel: Option<watch::Receiver<bool>>,
    heartbeat: Duration,
}

/// Outcome of an apply or destroy run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Kind of run.
    pub operation: RunOperation,
    /// Hash of the configuration the run applied.
    pub config_hash: String,
    /// Summary of the executed plan.
    pub summary: PlanSummary,
    /// Per-resource results in plan order.
    pub results: Vec<OperationResult>,
    /// Named outputs; `None` when the source did not complete.
    pub outputs: BTreeMap<String, Option<Value>>,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler using the configuration's policies and execution
    /// settings.
    #[must_use]
    pub fn new(config: &'a TerraceConfig, store: &'a dyn StateStore, provider: Arc<dyn Provider>) -> Self {
        Self {
            config,
            store,
            provider,
            policies: PolicyRegistry::with_overrides(&config.policies),
            hasher: ConfigHasher::new(),
            retry: RetryPolicy::from(&config.execution),
            parallelism: config.execution.parallelism,
            cancel: None,
            heartbeat: LOCK_HEARTBEAT,
        }
    }

    /// Overrides the configured parallelism.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Overrides the configured retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stops scheduling new operations once `cancel` turns true.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Overrides how often a run renews its state lock.
    #[must_use]
    pub const fn with_lock_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Computes the plan without locking or mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read, the graph is invalid, or
    /// planning fails.
    pub async fn plan(&self) -> Result<Plan> {
        let session = self.session().await?;
        let graph = build_graph(self.config)?;
        Planner::new(self.policies.clone()).plan(&graph, session.snapshot(), &self.config_hash())
    }

    /// Computes the destroy plan without locking or mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or a resource is protected.
    pub async fn plan_destroy(&self) -> Result<Plan> {
        let session = self.session().await?;
        Planner::new(self.policies.clone()).plan_destroy(session.snapshot())
    }

    /// Converges the recorded resources to the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is locked, the configuration cannot be
    /// planned, or the state cannot be written. Operation failures are
    /// reported in the [`RunReport`].
    pub async fn apply(&self) -> Result<RunReport> {
        self.locked(RunOperation::Apply).await
    }

    /// Deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::apply`].
    pub async fn destroy(&self) -> Result<RunReport> {
        self.locked(RunOperation::Destroy).await
    }

    fn config_hash(&self) -> String {
        self.hasher.hash_config(self.config)
    }

    async fn session(&self) -> Result<StateSession<'a>> {
        let project = &self.config.project;
        StateSession::load_snapshot(self.store, &project.name, &project.environment).await
    }

    async fn locked(&self, operation: RunOperation) -> Result<RunReport> {
        let holder = generate_holder_id();
        let mut lock = self.store.acquire_lock(&holder, &operation.to_string()).await?;

        let run = self.run(operation);
        tokio::pin!(run);
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = heartbeat.tick() => match self.store.renew_lock(&lock).await {
                    Ok(renewed) => lock = renewed,
                    Err(e) => warn!("Failed to renew state lock {}: {e}", lock.lock_id),
                },
            }
        };

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn run(&self, operation: RunOperation) -> Result<RunReport> {
        let project = &self.config.project;
        info!("Starting {operation} for {}/{}", project.name, project.environment);

        let config_hash = self.config_hash();
        let mut session = self.session().await?;
        let planner = Planner::new(self.policies.clone());

        let (plan, graph, refs) = match operation {
            RunOperation::Apply => {
                let graph = build_graph(self.config)?;
                let refs = output_refs(self.config)?;
                let plan = planner.plan(&graph, session.snapshot(), &config_hash)?;
                (plan, graph, refs)
            }
            RunOperation::Destroy => (
                planner.plan_destroy(session.snapshot())?,
                ResourceGraph::empty(),
                BTreeMap::new(),
            ),
        };
        info!("Plan: {}", plan.summary());

        let mut executor = Executor::new(Arc::clone(&self.provider))
            .with_retry(self.retry)
            .with_parallelism(self.parallelism);
        if let Some(cancel) = &self.cancel {
            executor = executor.with_cancellation(cancel.clone());
        }
        let execution = executor.execute(&plan, &graph, &mut session).await?;

        let outputs = execution.resolve_outputs(&refs);
        for (name, value) in &outputs {
            if value.is_none() {
                warn!("Output {name} is unavailable");
            }
        }

        let entry = RunHistoryEntry {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.clone(),
            succeeded: execution.count(OperationStatus::Succeeded),
            unchanged: execution.count(OperationStatus::NoOp),
            failed: execution.count(OperationStatus::Failed),
            skipped: execution.count(OperationStatus::Skipped)
                + execution.count(OperationStatus::Cancelled),
            success: execution.is_success(),
        };
        let available = outputs
            .iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect();
        session.commit(entry, available).await?;

        info!("Finished {operation}: {}", execution.summary_line());
        Ok(RunReport {
            operation,
            config_hash,
            summary: plan.summary(),
            results: execution.results,
            outputs,
        })
    }
}

impl RunReport {
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

    /// Process exit code: 0 on success, [`EXIT_INCOMPLETE`] otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { EXIT_INCOMPLETE }
    }
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.config.project.name)
            .field("backend", &self.store.backend_type())
            .field("provider", &self.provider.name())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

/// Opens the state store the configuration selects.
///
/// Relative local paths are resolved against `base_dir`, the directory of the
/// configuration file.
///
/// # Errors
///
/// Returns an error if the S3 backend has no bucket.
pub async fn open_state_store(config: &TerraceConfig, base_dir: &Path) -> Result<Box<dyn StateStore>> {
    match config.state.backend {
        StateBackend::Local => {
            let dir = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(STATE_DIR), |p| base_dir.join(p));
            debug!("Using local state in {}", dir.display());
            Ok(Box::new(LocalStateStore::with_base_dir(dir)))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation("The s3 backend requires a bucket", "state.bucket")
            })?;
            let store = S3StateStore::new(
                bucket,
                config.state.prefix.as_deref(),
                config.state.region.as_deref(),
            )
            .await;
            Ok(Box::new(store))
        }
    }
}

/// Opens the provider the configuration selects.
///
/// The simulated provider persists its cloud next to the local state unless
/// `provider.path` says otherwise, so consecutive runs see the same resources.
///
/// # Errors
///
/// Returns an error if the http provider has no endpoint, the HTTP client
/// cannot be built, or the simulated cloud file cannot be read.
pub async fn open_provider(config: &TerraceConfig, base_dir: &Path) -> Result<Arc<dyn Provider>> {
    match config.provider.kind {
        ProviderKind::Simulated => {
            let path = config.provider.path.as_ref().map_or_else(
                || base_dir.join(STATE_DIR).join(SIMULATED_CLOUD_FILE),
                |p| base_dir.join(p),
            );
            let mut provider = SimulatedProvider::open(path).await?;
            if let Some(region) = &config.provider.region {
                provider = provider.with_region(region.clone());
            }
            Ok(Arc::new(provider))
        }
        ProviderKind::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                ConfigError::validation("The http provider requires an endpoint", "provider.endpoint")
            })?;
            let token = ConfigParser::get_provider_token().ok();
            if token.is_none() {
                debug!("No provider token set, calling the plugin unauthenticated");
            }
            let provider = match config.provider.timeout_secs {
                Some(secs) => HttpProvider::with_timeout(endpoint, token, secs)?,
                None => HttpProvider::new(endpoint, token)?,
            }
            .with_region(config.provider.region.clone());
            Ok(Arc::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValidator;
    use crate::error::{StateError, TerraceError};
    use crate::graph::ResourceId;
    use crate::state::LockInfo;
    use std::time::Duration;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
project:
  name: web
resources:
  - type: network
    name: main
    attributes:
      cidr_block: "10.0.0.0/16"
  - type: subnet
    name: public
    attributes:
      network_id: "${network.main.id}"
      cidr_block: "10.0.1.0/24"
  - type: instance
    name: app
    attributes:
      subnet_id: "${subnet.public.id}"
      associate_public_ip_address: true
outputs:
  app_ip: "${instance.app.public_ip}"
  network: "${network.main.id}"
"#;

    fn config(yaml: &str) -> TerraceConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid config")
    }

    fn fast(reconciler: Reconciler<'_>) -> Reconciler<'_> {
        reconciler.with_retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_destroy_empties_state() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(SimulatedProvider::new());
        let config = config(CONFIG);
        let reconciler = fast(Reconciler::new(&config, &store, provider.clone()));

        let first = reconciler.apply().await.expect("apply");
        assert!(first.is_success());
        assert_eq!(first.exit_code(), 0);
        assert_eq!(first.summary.create, 3);
        assert!(first.outputs.get("app_ip").is_some_and(Option::is_some));

        let plan = reconciler.plan().await.expect("plan");
        assert!(!plan.has_changes());

        let second = reconciler.apply().await.expect("second apply");
        assert_eq!(second.count(OperationStatus::NoOp), 3);
        assert_eq!(second.outputs, first.outputs);

        let snapshot = store.load().await.expect("load").expect("state");
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.config_hash, first.config_hash);
        assert!(snapshot.outputs.contains_key("network"));
        assert!(!store.is_locked().await.expect("lock state"));

        let destroyed = reconciler.destroy().await.expect("destroy");
        assert_eq!(destroyed.summary.delete, 3);
        assert!(destroyed.is_success());
        assert!(provider.resources().await.is_empty());
        let snapshot = store.load().await.expect("load").expect("state");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_failed_operation_reports_non_zero_exit() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let provider = Arc::new(SimulatedProvider::new());
        let config = config(&CONFIG.replace("10.0.1.0/24", "10.0.1.0/40"));
        let reconciler = fast(Reconciler::new(&config, &store, provider));

        let report = reconciler.apply().await.expect("apply");
        assert!(!report.is_success());
        assert_eq!(report.exit_code(), EXIT_INCOMPLETE);
        assert_eq!(report.count(OperationStatus::Succeeded), 1);
        assert_eq!(report.count(OperationStatus::Failed), 1);
        assert_eq!(report.count(OperationStatus::Skipped), 1);
        assert_eq!(report.outputs.get("app_ip"), Some(&None));

        let snapshot = store.load().await.expect("load").expect("state");
        assert!(snapshot.get(&ResourceId::new("network", "main")).is_some());
        assert!(snapshot.config_hash.is_empty());
        assert!(snapshot.history.last().is_some_and(|h| !h.success));
    }

    /// Local store that counts lock renewals.
    struct Renewals {
        inner: LocalStateStore,
        count: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StateStore for Renewals {
        async fn load(&self) -> Result<Option<crate::state::StateSnapshot>> {
            self.inner.load().await
        }

        async fn save(&self, snapshot: &crate::state::StateSnapshot) -> Result<()> {
            self.inner.save(snapshot).await
        }

        async fn delete(&self) -> Result<()> {
            self.inner.delete().await
        }

        async fn exists(&self) -> Result<bool> {
            self.inner.exists().await
        }

        async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
            self.inner.acquire_lock(holder, operation).await
        }

        async fn renew_lock(&self, lock: &LockInfo) -> Result<LockInfo> {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.renew_lock(lock).await
        }

        async fn release_lock(&self, lock_id: &str) -> Result<()> {
            self.inner.release_lock(lock_id).await
        }

        async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
            self.inner.get_lock_info().await
        }

        fn backend_type(&self) -> &'static str {
            "renewals"
        }
    }

    #[tokio::test]
    async fn test_long_run_renews_its_lock() {
        let temp = TempDir::new().expect("temp dir");
        let store = Renewals {
            inner: LocalStateStore::with_base_dir(temp.path()),
            count: std::sync::atomic::AtomicUsize::new(0),
        };
        let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_millis(40)));
        let config = config(CONFIG);
        let reconciler = fast(Reconciler::new(&config, &store, provider))
            .with_lock_heartbeat(Duration::from_millis(10));

        let report = reconciler.apply().await.expect("apply");
        assert!(report.is_success());
        assert!(store.count.load(std::sync::atomic::Ordering::SeqCst) > 0);
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_apply_refuses_locked_state() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        store.acquire_lock("someone-else", "apply").await.expect("lock");

        let config = config(CONFIG);
        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedProvider::new()));
        let err = reconciler.apply().await.expect_err("locked");
        assert!(matches!(err, TerraceError::State(StateError::LockedByOther { .. })));
    }

    #[tokio::test]
    async fn test_planning_error_mutates_nothing() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let config = config(&CONFIG.replace("${subnet.public.id}", "${subnet.missing.id}"));
        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedProvider::new()));

        let err = reconciler.apply().await.expect_err("dangling reference");
        assert!(err.is_planning_failure());
        assert!(!store.exists().await.expect("exists"));
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_simulated_cloud_persists_next_to_local_state() {
        let temp = TempDir::new().expect("temp dir");
        let config = config(CONFIG);
        let store = open_state_store(&config, temp.path()).await.expect("store");

        let provider = open_provider(&config, temp.path()).await.expect("provider");
        Reconciler::new(&config, store.as_ref(), provider)
            .apply()
            .await
            .expect("apply");

        let reopened = open_provider(&config, temp.path()).await.expect("provider");
        let plan = Reconciler::new(&config, store.as_ref(), reopened)
            .plan()
            .await
            .expect("plan");
        assert!(!plan.has_changes());
        assert!(temp.path().join(STATE_DIR).join(SIMULATED_CLOUD_FILE).exists());
    }

    #[tokio::test]
    async fn test_project_template_applies_cleanly() {
        let config = config(include_str!("../templates/terrace.yaml"));
        let validation = ConfigValidator::new().validate(&config).expect("valid template");
        assert!(validation.warnings.is_empty(), "{:?}", validation.warnings);

        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedProvider::new()));

        let report = reconciler.apply().await.expect("apply");
        assert!(report.is_success());
        assert_eq!(report.summary.create, config.resources.len());
        assert!(report.outputs.values().all(Option::is_some));

        let plan = reconciler.plan().await.expect("plan");
        assert!(!plan.has_changes());
    }
}
