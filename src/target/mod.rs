//! Rendering targets.
//!
//! A target decides what "applying" a change means: calling the cloud
//! ([`ApiTarget`]), recording a plan ([`DryRunTarget`]), or emitting a
//! declarative document ([`TerraformTarget`], [`CloudFormationTarget`]).
//! Per-kind rendering is dispatched through the [`RenderRegistry`].

pub mod api;
pub mod cloudformation;
pub mod dryrun;
pub mod registry;
pub mod terraform;

pub use api::{AppliedOperation, ApiTarget, OperationAction};
pub use cloudformation::{CLOUDFORMATION_FILE, CloudFormationTarget};
pub use dryrun::{DryRunTarget, PlanAction, PlanEntry, PlannedField};
pub use registry::{Render, RenderRegistry};
pub use terraform::{TERRAFORM_FILE, TerraformTarget};

use crate::engine::{Changes, Task};
use crate::error::{TargetError, TaskError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;

/// The kinds of rendering target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Live cloud API calls.
    Api,
    /// Plan only, no mutation.
    #[default]
    DryRun,
    /// Terraform JSON document.
    Terraform,
    /// CloudFormation JSON document.
    CloudFormation,
}

impl TargetKind {
    /// Returns true if tasks observe live state before rendering.
    ///
    /// Document targets describe the full desired state, so nothing is
    /// observed and every task renders as a creation.
    #[must_use]
    pub const fn observes(self) -> bool {
        matches!(self, Self::Api | Self::DryRun)
    }

    /// Returns true if this target writes a declarative document.
    #[must_use]
    pub const fn is_document(self) -> bool {
        !self.observes()
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::DryRun => "dryrun",
            Self::Terraform => "terraform",
            Self::CloudFormation => "cloudformation",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" | "direct" => Ok(Self::Api),
            "dryrun" | "dry-run" | "plan" => Ok(Self::DryRun),
            "terraform" => Ok(Self::Terraform),
            "cloudformation" => Ok(Self::CloudFormation),
            other => Err(format!("unknown target: {other}")),
        }
    }
}

/// What a target produced once finalized.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetOutput {
    /// Mutations issued against the cloud.
    Applied {
        /// Operations in completion order.
        operations: Vec<AppliedOperation>,
    },
    /// A dry-run plan.
    Plan {
        /// Planned changes ordered by task name.
        entries: Vec<PlanEntry>,
        /// Human-readable report.
        text: String,
    },
    /// A rendered document.
    Document {
        /// Target that produced it.
        format: TargetKind,
        /// Where it was written, if anywhere.
        path: Option<PathBuf>,
        /// Full document text.
        contents: String,
    },
    /// A document run failed, so nothing was finalized.
    Incomplete {
        /// Why the output was discarded.
        reason: String,
    },
}

/// A destination for rendered changes.
#[async_trait]
pub trait Target: fmt::Debug + Send + Sync + 'static {
    /// Kind of this target.
    fn kind(&self) -> TargetKind;

    /// Kind-agnostic renderer, for targets that accept any task.
    fn generic_renderer(&self) -> Option<&dyn GenericRender> {
        None
    }

    /// Flushes accumulated output. May be called once.
    async fn finalize(&self) -> Result<TargetOutput, TargetError>;

    /// Upcast for renderer downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Concrete target types, addressable by a static kind.
pub trait TargetType: Target + Sized {
    /// Kind returned by [`Target::kind`].
    const KIND: TargetKind;
}

/// Renders any task from its field diff alone.
#[async_trait]
pub trait GenericRender: Send + Sync {
    /// Records the change of one task.
    async fn render_any(
        &self,
        actual: Option<&dyn Task>,
        expected: &dyn Task,
        changes: &Changes,
    ) -> Result<(), TaskError>;
}
