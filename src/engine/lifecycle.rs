//! Per-task lifecycle policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the engine treats the resource behind a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Create or update the resource to match its specification.
    #[default]
    Sync,
    /// Leave the resource alone. The task always reports unchanged.
    Ignore,
    /// The resource must exist and match; differences fail the task.
    ExistsAndValidates,
    /// The resource must exist; differences are logged and not applied.
    ExistsAndWarnIfChanges,
    /// Like `Sync`, but an access-denied observation only logs a warning.
    WarnIfInsufficientAccess,
}

impl Lifecycle {
    /// Returns true if the engine may create or modify the resource.
    #[must_use]
    pub const fn applies_changes(self) -> bool {
        matches!(self, Self::Sync | Self::WarnIfInsufficientAccess)
    }

    /// Returns true if the resource is expected to already exist.
    #[must_use]
    pub const fn requires_existing(self) -> bool {
        matches!(self, Self::ExistsAndValidates | Self::ExistsAndWarnIfChanges)
    }

    /// Returns the configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Ignore => "ignore",
            Self::ExistsAndValidates => "exists-and-validates",
            Self::ExistsAndWarnIfChanges => "exists-and-warn-if-changes",
            Self::WarnIfInsufficientAccess => "warn-if-insufficient-access",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
