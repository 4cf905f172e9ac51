//! Plan target: records intended changes without mutating anything.

use crate::engine::{Changes, Task};
use crate::error::{TargetError, TaskError};
use crate::target::{GenericRender, Target, TargetKind, TargetOutput, TargetType};
use async_trait::async_trait;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Whether a planned change creates or modifies a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// The resource will be created.
    Create,
    /// The resource will be modified.
    Update,
}

/// A single field of a planned change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedField {
    /// Field name.
    pub field: String,
    /// Current value, if any.
    pub old: Option<String>,
    /// Value after apply.
    pub new: String,
}

/// Planned change of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Task name.
    pub task: String,
    /// Task kind.
    pub kind: String,
    /// Create or update.
    pub action: PlanAction,
    /// Changed fields in declaration order.
    pub fields: Vec<PlannedField>,
}

/// Target that accumulates a plan.
#[derive(Debug, Default)]
pub struct DryRunTarget {
    entries: Mutex<BTreeMap<String, PlanEntry>>,
    finalized: AtomicBool,
}

impl DryRunTarget {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Planned entries so far, ordered by task name.
    pub async fn entries(&self) -> Vec<PlanEntry> {
        self.entries.lock().await.values().cloned().collect()
    }

    /// Formats a plan the way `plan` prints it.
    #[must_use]
    pub fn format_plan(entries: &[PlanEntry]) -> String {
        let mut out = String::new();
        if entries.is_empty() {
            out.push_str("No changes need to be applied\n");
            return out;
        }

        for (action, heading) in [
            (PlanAction::Create, "Will create resources:"),
            (PlanAction::Update, "Will modify resources:"),
        ] {
            let section: Vec<&PlanEntry> = entries.iter().filter(|e| e.action == action).collect();
            if section.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{heading}");
            for entry in section {
                let _ = writeln!(out, "  {}\t{}", entry.kind, entry.task);
                let width = entry.fields.iter().map(|f| f.field.len()).max().unwrap_or(0);
                for field in &entry.fields {
                    match &field.old {
                        Some(old) => {
                            let _ = writeln!(
                                out,
                                "  \t{:<width$}\t{old} -> {}",
                                field.field, field.new
                            );
                        }
                        None => {
                            let _ = writeln!(out, "  \t{:<width$}\t{}", field.field, field.new);
                        }
                    }
                }
                out.push('\n');
            }
        }
        out
    }
}

#[async_trait]
impl GenericRender for DryRunTarget {
    async fn render_any(
        &self,
        actual: Option<&dyn Task>,
        expected: &dyn Task,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized.into());
        }
        let entry = PlanEntry {
            task: expected.name().to_string(),
            kind: expected.kind().to_string(),
            action: if actual.is_some() {
                PlanAction::Update
            } else {
                PlanAction::Create
            },
            fields: changes
                .iter()
                .map(|(field, change)| PlannedField {
                    field: field.to_string(),
                    old: change.old.as_ref().map(ToString::to_string),
                    new: change.new.to_string(),
                })
                .collect(),
        };
        self.entries.lock().await.insert(entry.task.clone(), entry);
        Ok(())
    }
}

#[async_trait]
impl Target for DryRunTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::DryRun
    }

    fn generic_renderer(&self) -> Option<&dyn GenericRender> {
        Some(self)
    }

    async fn finalize(&self) -> Result<TargetOutput, TargetError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        let entries = self.entries().await;
        let text = Self::format_plan(&entries);
        Ok(TargetOutput::Plan { entries, text })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TargetType for DryRunTarget {
    const KIND: TargetKind = TargetKind::DryRun;
}
