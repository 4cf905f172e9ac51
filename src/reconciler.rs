//! Reconciler driving one run end to end.
//!
//! The reconciler builds the context and target for a run, hands the task
//! set to the [`Engine`], and finalizes the target. Document targets are
//! only finalized when every task succeeded, so a partial document is never
//! written.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cloud::Cloud;
use crate::config::RunConfig;
use crate::engine::{Context, Engine, RunReport, TaskSet, TaskStatus};
use crate::error::{ConfigError, ConvergeError, Result};
use crate::resources::default_registry;
use crate::target::{
    ApiTarget, CloudFormationTarget, DryRunTarget, RenderRegistry, Target, TargetKind,
    TargetOutput, TerraformTarget,
};

/// Result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Per-task outcomes.
    pub report: RunReport,
    /// What the target produced.
    pub output: TargetOutput,
}

impl RunOutcome {
    /// Returns true if every task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

/// Reconciler for one configuration and task set.
pub struct Reconciler<'a> {
    /// Configuration.
    config: &'a RunConfig,
    /// Tasks to converge.
    tasks: &'a TaskSet,
    /// Cloud capability handle.
    cloud: Arc<dyn Cloud>,
    /// Scheduler.
    engine: Engine,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler with the built-in renderers.
    #[must_use]
    pub fn new(config: &'a RunConfig, tasks: &'a TaskSet, cloud: Arc<dyn Cloud>) -> Self {
        Self::with_registry(config, tasks, cloud, Arc::new(default_registry()))
    }

    /// Creates a reconciler with a custom renderer registry.
    #[must_use]
    pub fn with_registry(
        config: &'a RunConfig,
        tasks: &'a TaskSet,
        cloud: Arc<dyn Cloud>,
        registry: Arc<RenderRegistry>,
    ) -> Self {
        Self {
            config,
            tasks,
            cloud,
            engine: Engine::new(registry).with_options(config.engine.options()),
        }
    }

    /// Stops dispatching new tasks once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.engine = self.engine.with_cancellation(token);
        self
    }

    /// Runs against the configured target, writing documents to the
    /// configured output directory.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::run`].
    pub async fn run_configured(&self) -> Result<RunOutcome> {
        self.run(self.config.target, Some(self.config.output.dir.clone()))
            .await
    }

    /// Computes a plan without touching the cloud.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::run`].
    pub async fn plan(&self) -> Result<RunOutcome> {
        self.run(TargetKind::DryRun, None).await
    }

    /// Applies changes through the cloud API.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::run`].
    pub async fn apply(&self) -> Result<RunOutcome> {
        self.run(TargetKind::Api, None).await
    }

    /// Emits a document. `out_dir` overrides the configured directory;
    /// nothing is written when both are absent.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `format` is not a document target,
    /// otherwise see [`Reconciler::run`].
    pub async fn render(&self, format: TargetKind, out_dir: Option<PathBuf>) -> Result<RunOutcome> {
        if !format.is_document() {
            return Err(ConvergeError::Config(ConfigError::validation(
                format!("'{format}' does not produce a document"),
                "format",
            )));
        }
        self.run(format, out_dir).await
    }

    /// Runs the task set into a fresh target of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dependency graph is invalid, a task kind has
    /// no renderer for the target, or the target fails to finalize. Task
    /// failures are reported in the outcome, not as errors.
    pub async fn run(&self, kind: TargetKind, out_dir: Option<PathBuf>) -> Result<RunOutcome> {
        info!(
            "Starting {kind} run for cluster {} ({} tasks)",
            self.config.cluster.name,
            self.tasks.len()
        );
        let target = self.make_target(kind, out_dir);
        let ctx = Arc::new(self.context(target.clone()));
        let report = self.engine.run(self.tasks, ctx).await?;

        let output = if kind.is_document() && !report.is_success() {
            let failed = report.count("failed");
            let reason = if report.cancelled {
                String::from("run was cancelled")
            } else {
                format!("{failed} task(s) failed")
            };
            warn!("Discarding {kind} document: {reason}");
            TargetOutput::Incomplete { reason }
        } else {
            target.finalize().await?
        };

        info!(
            "Run finished: {} created, {} updated, {} unchanged, {} failed, {} skipped",
            report.count("created"),
            report.count("updated"),
            report.count("unchanged"),
            report.count("failed"),
            report.count("skipped")
        );
        Ok(RunOutcome { report, output })
    }

    /// Checks for drift without applying changes.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::run`].
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift in cluster {}", self.config.cluster.name);
        let outcome = self.plan().await?;
        Ok(DriftReport::from_report(&outcome.report))
    }

    /// Collects the addresses of every task that has one.
    ///
    /// Tasks whose resource does not exist yet map to an empty list.
    ///
    /// # Errors
    ///
    /// Returns the first observation error.
    pub async fn discover_addresses(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let ctx = self.context(Arc::new(DryRunTarget::new()));
        let mut addresses = BTreeMap::new();
        for task in self.tasks.iter() {
            if let Some(source) = task.as_address_source() {
                let found = source.find_addresses(&ctx).await?;
                addresses.insert(task.name().to_string(), found);
            }
        }
        Ok(addresses)
    }

    fn context(&self, target: Arc<dyn Target>) -> Context {
        Context::new(target, self.cloud.clone(), self.config.cluster.settings())
    }

    fn make_target(&self, kind: TargetKind, out_dir: Option<PathBuf>) -> Arc<dyn Target> {
        match kind {
            TargetKind::Api => Arc::new(ApiTarget::new(self.cloud.clone())),
            TargetKind::DryRun => Arc::new(DryRunTarget::new()),
            TargetKind::Terraform => {
                let target = TerraformTarget::new(&self.config.cluster.name);
                Arc::new(match out_dir {
                    Some(dir) => target.with_output_dir(dir),
                    None => target,
                })
            }
            TargetKind::CloudFormation => {
                let target = CloudFormationTarget::new();
                Arc::new(match out_dir {
                    Some(dir) => target.with_output_dir(dir),
                    None => target,
                })
            }
        }
    }
}

/// Report of drift detection.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources that would be created or updated.
    pub drifted_resources: Vec<String>,
    /// Resources that could not be checked, with the reason.
    pub failed_resources: Vec<(String, String)>,
    /// Total number of resources checked.
    pub total_resources: usize,
}

impl DriftReport {
    /// Builds a drift report from a dry-run report.
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        let mut drifted_resources = Vec::new();
        let mut failed_resources = Vec::new();
        for (name, task) in &report.tasks {
            match &task.status {
                TaskStatus::Created | TaskStatus::Updated => drifted_resources.push(name.clone()),
                TaskStatus::Failed { error } => failed_resources.push((name.clone(), error.clone())),
                TaskStatus::Skipped { cause } => {
                    failed_resources.push((name.clone(), format!("skipped: {cause}")));
                }
                TaskStatus::Unchanged => {}
            }
        }
        Self {
            has_drift: !drifted_resources.is_empty(),
            drifted_resources,
            failed_resources,
            total_resources: report.tasks.len(),
        }
    }

    /// Returns true if the state is converged (no drift, nothing failed).
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift && self.failed_resources.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            writeln!(f, "No drift detected - state is converged")?;
        }
        for (resource, reason) in &self.failed_resources {
            writeln!(f, "  ! {resource}: {reason}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::config::ConfigParser;
    use crate::resources::build_tasks;
    use crate::target::TERRAFORM_FILE;

    const MANIFEST: &str = r"
cluster:
  name: prod
engine:
  retry:
    initial_delay_ms: 1
    max_delay_ms: 5
resources:
  network:
    name: vpc
    cidr: 172.20.0.0/16
  subnets:
    - name: subnet-a
      cidr: 172.20.32.0/19
      zone: us-east-1a
  load_balancers:
    - name: api
      subnets: [subnet-a]
      listeners: ['443']
";

    fn config() -> RunConfig {
        ConfigParser::parse_yaml(MANIFEST, None).unwrap()
    }

    fn cloud() -> (Arc<MemoryCloud>, Arc<dyn Cloud>) {
        let memory = Arc::new(MemoryCloud::new());
        let handle: Arc<dyn Cloud> = memory.clone();
        (memory, handle)
    }

    #[tokio::test]
    async fn test_apply_then_no_drift() {
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let (memory, handle) = cloud();
        let reconciler = Reconciler::new(&config, &tasks, handle);

        let drift = reconciler.check_drift().await.unwrap();
        assert!(drift.has_drift);
        assert_eq!(drift.drifted_resources.len(), 3);

        let outcome = reconciler.apply().await.unwrap();
        assert!(outcome.is_success());
        match &outcome.output {
            TargetOutput::Applied { operations } => assert_eq!(operations.len(), 3),
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(memory.resources().await.len(), 3);

        let drift = reconciler.check_drift().await.unwrap();
        assert!(drift.is_converged(), "{drift}");
    }

    #[tokio::test]
    async fn test_plan_lists_changes() {
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let (memory, handle) = cloud();
        let outcome = Reconciler::new(&config, &tasks, handle).plan().await.unwrap();

        match &outcome.output {
            TargetOutput::Plan { entries, text } => {
                assert_eq!(entries.len(), 3);
                assert!(text.contains("Will create resources:"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        assert!(memory.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_render_writes_document() {
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let (_, handle) = cloud();
        let dir = tempfile::tempdir().unwrap();

        let outcome = Reconciler::new(&config, &tasks, handle)
            .render(TargetKind::Terraform, Some(dir.path().to_path_buf()))
            .await
            .unwrap();
        let path = dir.path().join(TERRAFORM_FILE);
        match &outcome.output {
            TargetOutput::Document { path: written, .. } => {
                assert_eq!(written.as_deref(), Some(path.as_path()));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("aws_elb"));
    }

    #[tokio::test]
    async fn test_failed_document_run_writes_nothing() {
        let mut config = config();
        config.resources.load_balancers[0].listeners.clear();
        let tasks = build_tasks(&config).unwrap();
        let (_, handle) = cloud();
        let dir = tempfile::tempdir().unwrap();

        let outcome = Reconciler::new(&config, &tasks, handle)
            .render(TargetKind::CloudFormation, Some(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert!(matches!(outcome.output, TargetOutput::Incomplete { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_render_rejects_live_target() {
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let (_, handle) = cloud();
        let result = Reconciler::new(&config, &tasks, handle)
            .render(TargetKind::Api, None)
            .await;
        assert!(matches!(result, Err(ConvergeError::Config(_))));
    }

    #[tokio::test]
    async fn test_discover_addresses() {
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let (_, handle) = cloud();
        let reconciler = Reconciler::new(&config, &tasks, handle);

        let before = reconciler.discover_addresses().await.unwrap();
        assert_eq!(before.get("api"), Some(&Vec::new()));

        reconciler.apply().await.unwrap();
        let after = reconciler.discover_addresses().await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after["api"].len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_reported() {
        let config = config();
        let tasks = build_tasks(&config).unwrap();
        let (memory, handle) = cloud();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Reconciler::new(&config, &tasks, handle)
            .with_cancellation(token)
            .apply()
            .await
            .unwrap();
        assert!(outcome.report.cancelled);
        assert_eq!(outcome.report.count("skipped"), 3);
        assert!(memory.calls().await.is_empty());
    }
}
