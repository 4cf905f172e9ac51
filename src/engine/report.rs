//! Per-run outcome report.

use crate::engine::changes::Changes;
use crate::target::TargetKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Terminal status of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// The resource did not exist and was rendered as a creation.
    Created,
    /// The resource existed and was rendered as an update.
    Updated,
    /// Nothing to do.
    Unchanged,
    /// The task failed.
    Failed {
        /// Error message.
        error: String,
    },
    /// The task was not attempted.
    Skipped {
        /// Name of the failed upstream task, or `cancelled`.
        cause: String,
    },
}

impl TaskStatus {
    /// Returns true for created, updated and unchanged.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Unchanged)
    }

    /// Short label for tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// One changed field, rendered for output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRow {
    /// Task name.
    pub task: String,
    /// Field name.
    pub field: String,
    /// Previous value, absent on creation or when unset.
    pub old: Option<String>,
    /// New value.
    pub new: String,
}

impl ChangeRow {
    /// Flattens a [`Changes`] value into rows, in field declaration order.
    #[must_use]
    pub fn from_changes(task: &str, changes: &Changes) -> Vec<Self> {
        changes
            .iter()
            .map(|(field, change)| Self {
                task: task.to_string(),
                field: field.to_string(),
                old: change.old.as_ref().map(ToString::to_string),
                new: change.new.to_string(),
            })
            .collect()
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// Task name.
    pub name: String,
    /// Task kind.
    pub kind: String,
    /// Terminal status.
    #[serde(flatten)]
    pub status: TaskStatus,
    /// Number of attempts made.
    pub attempts: u32,
    /// Fields rendered for this task.
    pub changes: Vec<ChangeRow>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Target the run rendered into.
    pub target: TargetKind,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Per-task outcomes, keyed by name.
    pub tasks: BTreeMap<String, TaskReport>,
}

impl RunReport {
    /// Returns true if no task failed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_success())
    }

    /// Status of a task by name.
    #[must_use]
    pub fn status_of(&self, name: &str) -> Option<&TaskStatus> {
        self.tasks.get(name).map(|t| &t.status)
    }

    /// Number of tasks with the given status label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status.label() == label)
            .count()
    }

    /// All change rows ordered by task name, then field declaration order.
    #[must_use]
    pub fn change_rows(&self) -> Vec<&ChangeRow> {
        self.tasks.values().flat_map(|t| t.changes.iter()).collect()
    }

    /// Returns true if any task rendered a change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.tasks
            .values()
            .any(|t| matches!(t.status, TaskStatus::Created | TaskStatus::Updated))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() { "successful" } else { "failed" };
        writeln!(f, "Run against {} target {status}:", self.target)?;
        writeln!(f, "  Created: {}", self.count("created"))?;
        writeln!(f, "  Updated: {}", self.count("updated"))?;
        writeln!(f, "  Unchanged: {}", self.count("unchanged"))?;
        writeln!(f, "  Failed: {}", self.count("failed"))?;
        writeln!(f, "  Skipped: {}", self.count("skipped"))?;

        for task in self.tasks.values() {
            match &task.status {
                TaskStatus::Failed { error } => writeln!(f, "  ! {}: {error}", task.name)?,
                TaskStatus::Skipped { cause } => {
                    writeln!(f, "  - {}: skipped ({cause})", task.name)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
