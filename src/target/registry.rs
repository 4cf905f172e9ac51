//! Renderer lookup keyed by (task kind, target kind).

use crate::engine::{Changes, Context, Task, TaskSet, TaskType, downcast};
use crate::error::{TargetError, TaskError};
use crate::target::{Target, TargetKind, TargetType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Renders a concrete task type into a concrete target type.
///
/// `self` is the expected state, `actual` the observed state (`None` on
/// creation), and `changes` the sparse field delta between them.
#[async_trait]
pub trait Render<T: TargetType>: TaskType {
    /// Applies the change to the target.
    async fn render(
        &self,
        target: &T,
        ctx: &Context,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<(), TaskError>;
}

#[async_trait]
trait ErasedRender: Send + Sync {
    async fn render(
        &self,
        ctx: &Context,
        actual: Option<&dyn Task>,
        expected: &dyn Task,
        changes: &Changes,
    ) -> Result<(), TaskError>;
}

struct TypedRender<K, T> {
    _marker: PhantomData<fn() -> (K, T)>,
}

#[async_trait]
impl<K, T> ErasedRender for TypedRender<K, T>
where
    K: Render<T>,
    T: TargetType,
{
    async fn render(
        &self,
        ctx: &Context,
        actual: Option<&dyn Task>,
        expected: &dyn Task,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        let target = ctx
            .target()
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch(format!("active target is not {}", T::KIND)))?;
        let expected = downcast::<K>(expected)
            .ok_or_else(|| mismatch(format!("task '{}' is not a {}", expected.name(), K::KIND)))?;
        let actual = match actual {
            Some(task) => Some(downcast::<K>(task).ok_or_else(|| {
                mismatch(format!("observed '{}' is not a {}", task.name(), K::KIND))
            })?),
            None => None,
        };
        <K as Render<T>>::render(expected, target, ctx, actual, changes).await
    }
}

fn mismatch(message: String) -> TaskError {
    TaskError::Target(TargetError::TypeMismatch { message })
}

/// Table of per-kind renderers.
#[derive(Default)]
pub struct RenderRegistry {
    renderers: HashMap<(&'static str, TargetKind), Arc<dyn ErasedRender>>,
}

impl RenderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the renderer of task type `K` for target type `T`.
    pub fn register<K, T>(&mut self)
    where
        K: Render<T>,
        T: TargetType,
    {
        self.renderers.insert(
            (K::KIND, T::KIND),
            Arc::new(TypedRender::<K, T> {
                _marker: PhantomData,
            }),
        );
    }

    /// Returns true if `kind` can be rendered into `target`.
    #[must_use]
    pub fn supports(&self, kind: &'static str, target: &dyn Target) -> bool {
        target.generic_renderer().is_some() || self.renderers.contains_key(&(kind, target.kind()))
    }

    /// Checks that every task in the set can be rendered into `target`.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::RenderUnsupported`] for the first task (by
    /// name) that has no renderer.
    pub fn ensure_supported(&self, tasks: &TaskSet, target: &dyn Target) -> Result<(), TargetError> {
        match tasks.iter().find(|t| !self.supports(t.kind(), target)) {
            Some(task) => Err(TargetError::RenderUnsupported {
                task_kind: task.kind().to_string(),
                target_kind: target.kind().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Renders one task into the context's target.
    ///
    /// A registered per-kind renderer wins over the target's generic one.
    ///
    /// # Errors
    ///
    /// Propagates the renderer's error, or [`TargetError::RenderUnsupported`].
    pub async fn render(
        &self,
        ctx: &Context,
        actual: Option<&dyn Task>,
        expected: &dyn Task,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        let target = ctx.target();
        if let Some(renderer) = self.renderers.get(&(expected.kind(), target.kind())) {
            return renderer.render(ctx, actual, expected, changes).await;
        }
        match target.generic_renderer() {
            Some(generic) => generic.render_any(actual, expected, changes).await,
            None => Err(TaskError::Target(TargetError::RenderUnsupported {
                task_kind: expected.kind().to_string(),
                target_kind: target.kind().to_string(),
            })),
        }
    }
}

impl fmt::Debug for RenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.renderers.keys().collect();
        keys.sort_by_key(|(kind, target)| (*kind, target.as_str()));
        f.debug_struct("RenderRegistry")
            .field("renderers", &keys)
            .finish()
    }
}
