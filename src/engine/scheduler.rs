//! Dependency-ordered, bounded-concurrency task execution.
//!
//! The coordinator owns the status table and the ready queue; workers only
//! run the lifecycle of a single task and hand a [`TaskRun`] back through a
//! [`JoinSet`]. A task is dispatched once every task it depends on has
//! succeeded. When a task fails, all of its transitive dependents are
//! skipped and unrelated tasks keep running.

use crate::engine::changes::Changes;
use crate::engine::context::Context;
use crate::engine::graph::DependencyGraph;
use crate::engine::lifecycle::Lifecycle;
use crate::engine::report::{ChangeRow, RunReport, TaskReport, TaskStatus};
use crate::engine::retry::RetryPolicy;
use crate::engine::task::{Task, TaskSet};
use crate::error::{CloudError, Result, TargetError, TaskError};
use crate::target::RenderRegistry;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cause recorded on tasks that were never dispatched because of cancellation.
pub const CANCELLED: &str = "cancelled";

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum number of tasks in flight.
    pub max_concurrency: usize,
    /// Retry policy for retryable task errors.
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of running one task to completion.
#[derive(Debug, Clone)]
struct TaskRun {
    status: TaskStatus,
    attempts: u32,
    changes: Vec<ChangeRow>,
}

impl TaskRun {
    fn failed(attempts: u32, error: String) -> Self {
        Self {
            status: TaskStatus::Failed { error },
            attempts,
            changes: Vec::new(),
        }
    }
}

/// The convergence engine.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<RenderRegistry>,
    options: EngineOptions,
    cancel: CancellationToken,
}

impl Engine {
    /// Creates an engine over a renderer registry.
    #[must_use]
    pub fn new(registry: Arc<RenderRegistry>) -> Self {
        Self {
            registry,
            options: EngineOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the scheduler options.
    #[must_use]
    pub const fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The renderer registry.
    #[must_use]
    pub fn registry(&self) -> &RenderRegistry {
        &self.registry
    }

    /// Static checks run before any task is observed.
    ///
    /// # Errors
    ///
    /// Returns a graph error, `RenderUnsupported`, or `UnresolvableLink` when
    /// a document would reference a task it does not contain.
    pub fn preflight(&self, tasks: &TaskSet, ctx: &Context) -> Result<DependencyGraph> {
        let graph = DependencyGraph::build(tasks)?;
        self.registry.ensure_supported(tasks, ctx.target())?;
        if !ctx.target_kind().observes() {
            check_document_links(tasks)?;
        }
        Ok(graph)
    }

    /// Runs every task to a terminal status.
    ///
    /// Only pre-flight failures are returned as errors. Task failures are
    /// reported per task in the [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns a graph error or `RenderUnsupported` before anything runs.
    pub async fn run(&self, tasks: &TaskSet, ctx: Arc<Context>) -> Result<RunReport> {
        let graph = self.preflight(tasks, &ctx)?;
        let started_at = Utc::now();
        let limit = self.options.max_concurrency.max(1);
        info!(
            "Running {} tasks against {} target (max concurrency {limit})",
            tasks.len(),
            ctx.target_kind()
        );

        let mut remaining = graph.in_degrees();
        let mut ready: BTreeSet<String> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        let mut reports: BTreeMap<String, TaskReport> = BTreeMap::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();
        let mut workers: JoinSet<(String, TaskRun)> = JoinSet::new();

        loop {
            while workers.len() < limit && !self.cancel.is_cancelled() {
                let Some(name) = ready.pop_first() else { break };
                let Some(task) = tasks.get(&name) else { continue };
                debug!("Dispatching task {name}");

                let task = Arc::clone(task);
                let ctx = Arc::clone(&ctx);
                let registry = Arc::clone(&self.registry);
                let policy = self.options.retry;
                let cancel = self.cancel.clone();
                let handle = workers.spawn(async move {
                    let run = run_task(task.as_ref(), &ctx, &registry, policy, &cancel).await;
                    (task.name().to_string(), run)
                });
                in_flight.insert(handle.id(), name);
            }

            let Some(joined) = workers.join_next_with_id().await else { break };
            let (name, run) = match joined {
                Ok((id, result)) => {
                    in_flight.remove(&id);
                    result
                }
                Err(err) => {
                    let Some(name) = in_flight.remove(&err.id()) else {
                        error!("Unknown task worker aborted: {err}");
                        continue;
                    };
                    error!("Task worker for {name} aborted: {err}");
                    (name, TaskRun::failed(1, String::from("task worker aborted")))
                }
            };

            if run.status.is_success() {
                for dependent in graph.dependents_of(&name) {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count = count.saturating_sub(1);
                        if *count == 0 && !reports.contains_key(dependent) {
                            ready.insert(dependent.to_string());
                        }
                    }
                }
            } else {
                skip_dependents(&graph, tasks, &name, &mut reports, &mut ready);
            }
            reports.insert(name.clone(), task_report(tasks, &name, run));
        }

        let cancelled = self.cancel.is_cancelled();
        for task in tasks.iter() {
            if !reports.contains_key(task.name()) {
                let run = TaskRun {
                    status: TaskStatus::Skipped {
                        cause: String::from(CANCELLED),
                    },
                    attempts: 0,
                    changes: Vec::new(),
                };
                reports.insert(task.name().to_string(), task_report(tasks, task.name(), run));
            }
        }

        let report = RunReport {
            target: ctx.target_kind(),
            started_at,
            finished_at: Utc::now(),
            cancelled,
            tasks: reports,
        };
        if report.is_success() {
            info!("Run finished: all {} tasks converged", report.tasks.len());
        } else {
            warn!(
                "Run finished with {} failed and {} skipped tasks",
                report.count("failed"),
                report.count("skipped")
            );
        }
        Ok(report)
    }
}

fn task_report(tasks: &TaskSet, name: &str, run: TaskRun) -> TaskReport {
    TaskReport {
        name: name.to_string(),
        kind: tasks
            .get(name)
            .map_or_else(String::new, |t| t.kind().to_string()),
        status: run.status,
        attempts: run.attempts,
        changes: run.changes,
    }
}

/// A document links to referenced tasks by address. Tasks it does not emit
/// must instead carry a pinned provider ID to be linked literally.
fn check_document_links(tasks: &TaskSet) -> std::result::Result<(), TargetError> {
    for task in tasks.iter() {
        for reference in task.fields().references() {
            let Some(referenced) = tasks.get(reference.name()) else {
                continue;
            };
            if !referenced.lifecycle().applies_changes() && referenced.compare_with_id().is_none() {
                return Err(TargetError::UnresolvableLink {
                    task: task.name().to_string(),
                    reference: reference.name().to_string(),
                });
            }
        }
    }
    Ok(())
}

fn skip_dependents(
    graph: &DependencyGraph,
    tasks: &TaskSet,
    failed: &str,
    reports: &mut BTreeMap<String, TaskReport>,
    ready: &mut BTreeSet<String>,
) {
    for dependent in graph.transitive_dependents(failed) {
        if reports.contains_key(&dependent) {
            continue;
        }
        warn!("Skipping task {dependent}: upstream task {failed} failed");
        ready.remove(&dependent);
        let run = TaskRun {
            status: TaskStatus::Skipped {
                cause: failed.to_string(),
            },
            attempts: 0,
            changes: Vec::new(),
        };
        reports.insert(dependent.clone(), task_report(tasks, &dependent, run));
    }
}

/// Runs one task, retrying retryable errors within the policy.
async fn run_task(
    task: &dyn Task,
    ctx: &Context,
    registry: &RenderRegistry,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> TaskRun {
    let started = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(task, ctx, registry).await {
            Ok((status, changes)) => {
                info!("Task {}: {}", task.name(), status.label());
                return TaskRun {
                    status,
                    attempts,
                    changes,
                };
            }
            Err(err) if err.is_retryable() => {
                let Some(delay) = policy.next_delay(attempts, started.elapsed(), err.retry_delay())
                else {
                    let message = format!("gave up after {attempts} attempts: {err}");
                    error!("Task {} failed: {message}", task.name());
                    return TaskRun::failed(attempts, message);
                };
                warn!(
                    "Task {} attempt {attempts} failed, retrying in {delay:?}: {err}",
                    task.name()
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        return TaskRun::failed(attempts, format!("cancelled while retrying: {err}"));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                error!("Task {} failed: {err}", task.name());
                return TaskRun::failed(attempts, err.to_string());
            }
        }
    }
}

/// One pass of find, diff, validate and render.
async fn attempt(
    task: &dyn Task,
    ctx: &Context,
    registry: &RenderRegistry,
) -> std::result::Result<(TaskStatus, Vec<ChangeRow>), TaskError> {
    let lifecycle = task.lifecycle();
    let observes = ctx.target_kind().observes();

    if !observes && !lifecycle.applies_changes() {
        // Dependents link to the pinned ID instead of a document address.
        if let Some(id) = task.compare_with_id() {
            ctx.ids().record(task.name(), &id).await;
        }
        debug!("Not emitting {} ({lifecycle}) into the document", task.name());
        return Ok((TaskStatus::Unchanged, Vec::new()));
    }
    if lifecycle == Lifecycle::Ignore {
        match task.find(ctx).await {
            Ok(Some(actual)) => record_id(ctx, task, actual.as_ref()).await,
            Ok(None) => {}
            Err(err) => debug!("Ignoring observation error for {}: {err}", task.name()),
        }
        return Ok((TaskStatus::Unchanged, Vec::new()));
    }

    let actual = if observes {
        match task.find(ctx).await {
            Ok(actual) => actual,
            Err(TaskError::Cloud(CloudError::AccessDenied { message }))
                if lifecycle == Lifecycle::WarnIfInsufficientAccess =>
            {
                warn!("Insufficient access to observe {}: {message}", task.name());
                return Ok((TaskStatus::Unchanged, Vec::new()));
            }
            Err(err) => return Err(err),
        }
    } else {
        None
    };
    if let Some(actual) = &actual {
        record_id(ctx, task, actual.as_ref()).await;
    }

    let expected_fields = task.fields();
    let actual_fields = actual.as_ref().map(|a| a.fields());
    let changes = Changes::compute(actual_fields.as_ref(), &expected_fields);

    if lifecycle.requires_existing() {
        if actual.is_none() {
            return Err(TaskError::NotFound {
                kind: task.kind().to_string(),
                name: task.name().to_string(),
            });
        }
        if !changes.is_empty() {
            if lifecycle == Lifecycle::ExistsAndValidates {
                return Err(TaskError::ChangesNotAllowed {
                    name: task.name().to_string(),
                    fields: changes.field_names(),
                });
            }
            warn!(
                "{} {} differs from its specification in {}; not applying",
                task.kind(),
                task.name(),
                changes.field_names().join(", ")
            );
        }
        return Ok((TaskStatus::Unchanged, Vec::new()));
    }

    task.check_changes(actual.as_deref(), &changes)?;

    if actual.is_some() && changes.is_empty() {
        debug!("No changes for {}", task.name());
        return Ok((TaskStatus::Unchanged, Vec::new()));
    }

    registry
        .render(ctx, actual.as_deref(), task, &changes)
        .await?;

    let status = if actual.is_some() {
        TaskStatus::Updated
    } else {
        TaskStatus::Created
    };
    Ok((status, ChangeRow::from_changes(task.name(), &changes)))
}

async fn record_id(ctx: &Context, task: &dyn Task, actual: &dyn Task) {
    if let Some(id) = actual.compare_with_id() {
        ctx.ids().record(task.name(), &id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Cloud, CloudOperation, CloudResource, MemoryCloud};
    use crate::engine::context::ClusterSettings;
    use crate::engine::testing::{ConcurrencyGauge, StubTask};
    use crate::error::{ConvergeError, GraphError, TargetError};
    use crate::target::{ApiTarget, DryRunTarget, Target, TerraformTarget};
    use std::time::Duration;

    fn registry() -> Arc<RenderRegistry> {
        let mut registry = RenderRegistry::new();
        registry.register::<StubTask, ApiTarget>();
        Arc::new(registry)
    }

    fn context(target: Arc<dyn Target>, cloud: &Arc<MemoryCloud>) -> Arc<Context> {
        let cloud: Arc<dyn Cloud> = cloud.clone();
        Arc::new(Context::new(target, cloud, ClusterSettings::new("test")))
    }

    fn api_context(cloud: &Arc<MemoryCloud>) -> Arc<Context> {
        let handle: Arc<dyn Cloud> = cloud.clone();
        context(Arc::new(ApiTarget::new(handle)), cloud)
    }

    fn engine(max_attempts: u32) -> Engine {
        Engine::new(registry()).with_options(EngineOptions {
            max_concurrency: 4,
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(1),
                Duration::from_millis(5),
                Duration::from_secs(10),
            ),
        })
    }

    fn tasks(list: Vec<StubTask>) -> TaskSet {
        let mut set = TaskSet::new();
        for task in list {
            set.insert(task).unwrap();
        }
        set
    }

    fn skipped_by(cause: &str) -> TaskStatus {
        TaskStatus::Skipped {
            cause: cause.to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_observation() {
        let cloud = Arc::new(MemoryCloud::new());
        let target = Arc::new(DryRunTarget::new());
        let ctx = context(target.clone(), &cloud);
        let set = tasks(vec![
            StubTask::new("A").with_ref("B"),
            StubTask::new("B").with_ref("C"),
            StubTask::new("C").with_ref("A"),
        ]);

        let err = engine(1).run(&set, ctx).await.unwrap_err();
        match err {
            ConvergeError::Graph(GraphError::DependencyCycle { cycle }) => {
                assert_eq!(cycle, vec!["A", "B", "C", "A"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.entries().await.is_empty());
        assert!(cloud.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_render_unsupported_is_preflight() {
        let cloud = Arc::new(MemoryCloud::new());
        let gauge = Arc::new(ConcurrencyGauge::default());
        let ctx = context(Arc::new(TerraformTarget::new("test")), &cloud);
        let set = tasks(vec![StubTask::new("a").with_gauge(gauge.clone())]);

        let err = engine(1).run(&set, ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::Target(TargetError::RenderUnsupported { .. })
        ));
        assert_eq!(gauge.finds(), 0);
    }

    #[tokio::test]
    async fn test_required_field_fails_without_render() {
        let cloud = Arc::new(MemoryCloud::new());
        let set = tasks(vec![StubTask::new("a").requiring("CIDR")]);

        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert!(matches!(
            report.status_of("a"),
            Some(TaskStatus::Failed { error }) if error.contains("CIDR")
        ));
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_immutable_id_cannot_change() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.seed(CloudResource::new("x", "Stub", "a")).await;
        let set = tasks(vec![StubTask::new("a").with_id("y")]);

        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(
            report.status_of("a"),
            Some(&TaskStatus::Failed {
                error: String::from("Field cannot be changed: ID")
            })
        );
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .fail_next(
                CloudOperation::Create,
                Some("Stub"),
                2,
                CloudError::not_yet_visible("parent"),
            )
            .await;
        let set = tasks(vec![StubTask::new("a")]);

        let report = engine(5).run(&set, api_context(&cloud)).await.unwrap();
        let task = &report.tasks["a"];
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.attempts, 3);
        let creates = cloud
            .calls()
            .await
            .iter()
            .filter(|c| c.operation == CloudOperation::Create)
            .count();
        assert_eq!(creates, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_max_attempts() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .fail_next(
                CloudOperation::Create,
                None,
                10,
                CloudError::Throttled { retry_after_ms: 1 },
            )
            .await;
        let set = tasks(vec![StubTask::new("a")]);

        let report = engine(2).run(&set, api_context(&cloud)).await.unwrap();
        let task = &report.tasks["a"];
        assert_eq!(task.attempts, 2);
        assert!(matches!(
            &task.status,
            TaskStatus::Failed { error } if error.starts_with("gave up after 2 attempts")
        ));
    }

    #[tokio::test]
    async fn test_retry_stops_when_budget_is_spent() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .fail_next(
                CloudOperation::Create,
                None,
                50,
                CloudError::Throttled {
                    retry_after_ms: 3_600_000,
                },
            )
            .await;
        let set = tasks(vec![StubTask::new("a")]);
        let engine = Engine::new(registry()).with_options(EngineOptions {
            max_concurrency: 1,
            retry: RetryPolicy::new(
                50,
                Duration::from_millis(5),
                Duration::from_millis(5),
                Duration::from_millis(40),
            ),
        });

        let started = Instant::now();
        let report = engine.run(&set, api_context(&cloud)).await.unwrap();
        let task = &report.tasks["a"];
        assert!(task.attempts >= 2 && task.attempts < 50);
        assert!(matches!(
            &task.status,
            TaskStatus::Failed { error } if error.starts_with("gave up after")
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_task_and_skips_dependents() {
        let cloud = Arc::new(MemoryCloud::new());
        let set = tasks(vec![
            StubTask::new("a").panicking(),
            StubTask::new("b").with_ref("a"),
            StubTask::new("c"),
        ]);

        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(
            report.status_of("a"),
            Some(&TaskStatus::Failed {
                error: String::from("task worker aborted")
            })
        );
        assert_eq!(report.status_of("b"), Some(&skipped_by("a")));
        assert_eq!(report.status_of("c"), Some(&TaskStatus::Created));
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_failure_skips_only_dependents() {
        let cloud = Arc::new(MemoryCloud::new());
        let set = tasks(vec![
            StubTask::new("a").requiring("CIDR"),
            StubTask::new("b").with_ref("a"),
            StubTask::new("c").with_dependency("b"),
            StubTask::new("d"),
        ]);

        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert!(matches!(report.status_of("a"), Some(TaskStatus::Failed { .. })));
        assert_eq!(report.status_of("b"), Some(&skipped_by("a")));
        assert_eq!(report.status_of("c"), Some(&skipped_by("a")));
        assert_eq!(report.status_of("d"), Some(&TaskStatus::Created));
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_second_run_converges_without_mutation() {
        let cloud = Arc::new(MemoryCloud::new());
        let set = tasks(vec![
            StubTask::new("a").with_field("CIDR", "10.0.0.0/16"),
            StubTask::new("b").with_ref("a").with_field("Zone", "us-east-1a"),
        ]);

        let first = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(first.count("created"), 2);
        let mutations = cloud.mutating_calls().await.len();

        let second = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(second.count("unchanged"), 2);
        assert_eq!(cloud.mutating_calls().await.len(), mutations);
    }

    #[tokio::test]
    async fn test_dependencies_are_created_first() {
        let cloud = Arc::new(MemoryCloud::new());
        let set = tasks(vec![
            StubTask::new("lb").with_ref("subnet"),
            StubTask::new("subnet").with_ref("network"),
            StubTask::new("network"),
        ]);

        engine(1).run(&set, api_context(&cloud)).await.unwrap();
        let order: Vec<String> = cloud
            .mutating_calls()
            .await
            .into_iter()
            .map(|c| c.subject)
            .collect();
        assert_eq!(order, vec!["network", "subnet", "lb"]);
    }

    #[tokio::test]
    async fn test_in_flight_tasks_are_bounded() {
        let cloud = Arc::new(MemoryCloud::new());
        let gauge = Arc::new(ConcurrencyGauge::default());
        let set = tasks(
            (0..6)
                .map(|i| StubTask::new(&format!("t{i}")).with_gauge(gauge.clone()))
                .collect(),
        );

        let engine = Engine::new(registry()).with_options(EngineOptions {
            max_concurrency: 2,
            retry: RetryPolicy::no_retry(),
        });
        let report = engine.run(&set, api_context(&cloud)).await.unwrap();
        assert!(report.is_success());
        assert_eq!(gauge.finds(), 6);
        assert!(gauge.peak() <= 2);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let cloud = Arc::new(MemoryCloud::new());
        let target = Arc::new(DryRunTarget::new());
        let set = tasks(vec![
            StubTask::new("a"),
            StubTask::new("b").with_ref("a"),
            StubTask::new("c"),
        ]);

        let report = engine(1).run(&set, context(target.clone(), &cloud)).await.unwrap();
        assert_eq!(report.count("created"), 3);
        assert_eq!(target.entries().await.len(), 3);
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_exists_lifecycles() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .seed(
                CloudResource::new("s-1", "Stub", "present")
                    .with_attribute("CIDR", serde_json::json!("10.0.0.0/16")),
            )
            .await;
        let set = tasks(vec![
            StubTask::new("missing").with_lifecycle(Lifecycle::ExistsAndValidates),
            StubTask::new("present")
                .with_field("CIDR", "10.9.0.0/16")
                .with_lifecycle(Lifecycle::ExistsAndValidates),
        ]);
        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert!(matches!(
            report.status_of("missing"),
            Some(TaskStatus::Failed { error }) if error.contains("not found")
        ));
        assert!(matches!(
            report.status_of("present"),
            Some(TaskStatus::Failed { error }) if error.contains("CIDR")
        ));

        let set = tasks(vec![
            StubTask::new("present")
                .with_field("CIDR", "10.9.0.0/16")
                .with_lifecycle(Lifecycle::ExistsAndWarnIfChanges),
        ]);
        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(report.status_of("present"), Some(&TaskStatus::Unchanged));
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_ignore_and_insufficient_access() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .fail_next(
                CloudOperation::Describe,
                Some("Stub"),
                1,
                CloudError::AccessDenied {
                    message: String::from("denied"),
                },
            )
            .await;
        let set = tasks(vec![
            StubTask::new("a").with_lifecycle(Lifecycle::WarnIfInsufficientAccess),
        ]);
        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(report.status_of("a"), Some(&TaskStatus::Unchanged));

        let set = tasks(vec![StubTask::new("b").with_lifecycle(Lifecycle::Ignore)]);
        let report = engine(1).run(&set, api_context(&cloud)).await.unwrap();
        assert_eq!(report.status_of("b"), Some(&TaskStatus::Unchanged));
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let cloud = Arc::new(MemoryCloud::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let set = tasks(vec![StubTask::new("a"), StubTask::new("b")]);

        let report = engine(1)
            .with_cancellation(cancel)
            .run(&set, api_context(&cloud))
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.status_of("a"), Some(&skipped_by(CANCELLED)));
        assert!(cloud.calls().await.is_empty());
    }
}
