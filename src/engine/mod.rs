//! The task reconciliation engine.
//!
//! This module contains the task contract, the field-level diff, the
//! dependency graph and the scheduler that drives every task through
//! find, diff, validate and render.

pub mod changes;
pub mod context;
pub mod graph;
pub mod lifecycle;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use changes::{Changes, Delta, FieldChange, FieldSet, validate_changes};
pub use context::{CLUSTER_TAG, ClusterSettings, Context, IdRegistry};
pub use graph::DependencyGraph;
pub use lifecycle::Lifecycle;
pub use report::{ChangeRow, RunReport, TaskReport, TaskStatus};
pub use retry::RetryPolicy;
pub use scheduler::{CANCELLED, Engine, EngineOptions};
pub use task::{HasAddress, Task, TaskSet, TaskType, downcast};
pub use value::{TaskRef, Value};
