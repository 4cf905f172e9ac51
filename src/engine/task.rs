//! The task contract and the task arena.

use crate::engine::changes::{Changes, FieldSet};
use crate::engine::context::Context;
use crate::engine::lifecycle::Lifecycle;
use crate::error::{GraphError, TaskError};
use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single desired-state cloud resource.
///
/// A task instance plays three roles depending on where it came from: the
/// *expected* state (built from configuration), the *actual* state (returned
/// by [`Task::find`]), and the receiver of the render call.
#[async_trait]
pub trait Task: fmt::Debug + Send + Sync + 'static {
    /// Unique name of the task within a run.
    fn name(&self) -> &str;

    /// Kind of resource this task manages, used to look up renderers.
    fn kind(&self) -> &'static str;

    /// Lifecycle policy for this task.
    fn lifecycle(&self) -> Lifecycle;

    /// Comparable attributes. Task references appear as `Value::Ref`.
    fn fields(&self) -> FieldSet;

    /// Observes the live resource.
    ///
    /// Returns `Ok(None)` when it does not exist. Must not mutate anything.
    async fn find(&self, ctx: &Context) -> Result<Option<Box<dyn Task>>, TaskError>;

    /// Validates a proposed change before anything is rendered.
    ///
    /// `actual` is `None` on creation.
    fn check_changes(&self, actual: Option<&dyn Task>, changes: &Changes)
    -> Result<(), TaskError>;

    /// Additional dependencies not expressed through reference fields.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Provider identifier, when the task exposes one.
    fn compare_with_id(&self) -> Option<String> {
        None
    }

    /// Address discovery capability.
    fn as_address_source(&self) -> Option<&dyn HasAddress> {
        None
    }

    /// Upcast for renderer downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Concrete task types, addressable by a static kind.
pub trait TaskType: Task + Sized {
    /// Kind string returned by [`Task::kind`].
    const KIND: &'static str;
}

/// Tasks whose live resource exposes network addresses.
#[async_trait]
pub trait HasAddress: Send + Sync {
    /// Returns the addresses of the live resource, empty if it does not exist.
    async fn find_addresses(&self, ctx: &Context) -> Result<Vec<String>, TaskError>;
}

/// Downcasts a task to its concrete type.
#[must_use]
pub fn downcast<T: TaskType>(task: &dyn Task) -> Option<&T> {
    task.as_any().downcast_ref::<T>()
}

// ============================================================================
// Task arena
// ============================================================================

/// The set of tasks for one run, keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl TaskSet {
    /// Creates an empty task set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Adds a task.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is taken.
    pub fn insert(&mut self, task: impl Task) -> Result<(), GraphError> {
        self.insert_arc(Arc::new(task))
    }

    /// Adds a shared task.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is taken.
    pub fn insert_arc(&mut self, task: Arc<dyn Task>) -> Result<(), GraphError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(GraphError::DuplicateName { name });
        }
        self.tasks.insert(name, task);
        Ok(())
    }

    /// Looks up a task by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Task>> {
        self.tasks.get(name)
    }

    /// Returns true if a task with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterates over tasks in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Task>> {
        self.tasks.values()
    }
}
