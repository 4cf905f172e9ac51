//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{RunConfig, ValidationResult};
use crate::engine::{RunReport, TaskStatus};
use crate::reconciler::{DriftReport, RunOutcome};
use crate::target::TargetOutput;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Task status row for table display.
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Task")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Changed field row for table display.
#[derive(Tabled)]
struct ChangeTableRow {
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Old")]
    old: String,
    #[tabled(rename = "New")]
    new: String,
}

/// Address row for table display.
#[derive(Tabled)]
struct AddressRow {
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Address")]
    address: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of a run.
    #[must_use]
    pub fn format_outcome(&self, outcome: &RunOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(outcome),
            OutputFormat::Text => {
                let mut output = Self::format_report_text(&outcome.report);
                output.push('\n');
                output.push_str(&Self::format_target_output(&outcome.output));
                output
            }
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "\n{} run against {} target",
            if report.is_success() { "✓".green() } else { "✗".red() },
            report.target.to_string().bold()
        );

        if report.tasks.is_empty() {
            output.push_str("   No tasks.\n");
            return output;
        }

        let rows: Vec<TaskRow> = report
            .tasks
            .values()
            .map(|t| TaskRow {
                name: t.name.clone(),
                kind: t.kind.clone(),
                status: Self::format_status(&t.status),
                attempts: t.attempts,
                detail: match &t.status {
                    TaskStatus::Failed { error } => truncate(error, 60),
                    TaskStatus::Skipped { cause } => format!("after {cause}"),
                    _ => String::new(),
                },
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let changes: Vec<ChangeTableRow> = report
            .change_rows()
            .into_iter()
            .map(|c| ChangeTableRow {
                task: c.task.clone(),
                field: c.field.clone(),
                old: c.old.as_deref().map_or_else(|| "-".dimmed().to_string(), |v| truncate(v, 40)),
                new: truncate(&c.new, 40),
            })
            .collect();
        if !changes.is_empty() {
            output.push_str("\nChanges:\n");
            output.push_str(&Table::new(changes).to_string());
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "\nSummary: {} created, {} updated, {} unchanged, {} failed, {} skipped",
            report.count("created").to_string().green(),
            report.count("updated").to_string().yellow(),
            report.count("unchanged"),
            report.count("failed").to_string().red(),
            report.count("skipped").to_string().dimmed()
        );
        if report.cancelled {
            let _ = writeln!(output, "{} Run was cancelled", "⚠".yellow());
        }
        output
    }

    fn format_target_output(target_output: &TargetOutput) -> String {
        match target_output {
            TargetOutput::Applied { operations } => {
                format!("{} cloud operation(s) issued\n", operations.len())
            }
            TargetOutput::Plan { text, .. } => text.clone(),
            TargetOutput::Document { format, path, contents } => match path {
                Some(path) => format!(
                    "{} {format} document written to {}\n",
                    "✓".green(),
                    path.display()
                ),
                None => format!("{contents}\n"),
            },
            TargetOutput::Incomplete { reason } => {
                format!("{} No document written: {reason}\n", "✗".red())
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }
                let mut output = String::new();
                if report.has_drift {
                    let _ = writeln!(output, "{} Drift detected:\n", "⚠".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   - {resource}");
                    }
                    let _ = writeln!(
                        output,
                        "\n{}/{} resources have drifted.",
                        report.drifted_resources.len(),
                        report.total_resources
                    );
                }
                if !report.failed_resources.is_empty() {
                    let _ = writeln!(output, "\n{} Could not check:", "✗".red());
                    for (resource, reason) in &report.failed_resources {
                        let _ = writeln!(output, "   - {resource}: {reason}");
                    }
                }
                output
            }
        }
    }

    /// Formats a validation result with a summary of the configuration.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &RunConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.errors.is_empty(),
                "errors": result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.errors.is_empty() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Configuration is invalid:", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let resources = &config.resources;
                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "   Cluster: {}", config.cluster.name);
                let _ = writeln!(output, "   Target: {}", config.target);
                let _ = writeln!(output, "   Network: {} ({})", resources.network.name, resources.network.cidr);
                let _ = writeln!(output, "   Subnets: {}", resources.subnets.len());
                let _ = writeln!(output, "   Load balancers: {}", resources.load_balancers.len());
                output
            }
        }
    }

    /// Formats discovered addresses.
    #[must_use]
    pub fn format_addresses(&self, addresses: &BTreeMap<String, Vec<String>>) -> String {
        match self.format {
            OutputFormat::Json => to_json(addresses),
            OutputFormat::Text => {
                if addresses.is_empty() {
                    return String::from("No task exposes an address.\n");
                }
                let rows: Vec<AddressRow> = addresses
                    .iter()
                    .map(|(task, found)| AddressRow {
                        task: task.clone(),
                        address: if found.is_empty() {
                            "(not created)".dimmed().to_string()
                        } else {
                            found.join(", ")
                        },
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a task status with color.
    fn format_status(status: &TaskStatus) -> String {
        match status {
            TaskStatus::Created => "+created".green().to_string(),
            TaskStatus::Updated => "~updated".yellow().to_string(),
            TaskStatus::Unchanged => "unchanged".dimmed().to_string(),
            TaskStatus::Failed { .. } => "failed".red().to_string(),
            TaskStatus::Skipped { .. } => "skipped".dimmed().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskReport;
    use crate::target::TargetKind;
    use chrono::Utc;

    fn report() -> RunReport {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            String::from("vpc"),
            TaskReport {
                name: String::from("vpc"),
                kind: String::from("Network"),
                status: TaskStatus::Failed {
                    error: String::from("Field cannot be changed: CIDR"),
                },
                attempts: 1,
                changes: Vec::new(),
            },
        );
        RunReport {
            target: TargetKind::Api,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled: false,
            tasks,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long message", 8), "a lon...");
    }

    #[test]
    fn test_text_outcome_mentions_failure() {
        colored::control::set_override(false);
        let outcome = RunOutcome {
            report: report(),
            output: TargetOutput::Applied {
                operations: Vec::new(),
            },
        };
        let text = OutputFormatter::new(OutputFormat::Text).format_outcome(&outcome);
        assert!(text.contains("Field cannot be changed: CIDR"));
        assert!(text.contains("0 created"));
        assert!(text.contains("1 failed"));
    }

    #[test]
    fn test_json_outcome_is_parseable() {
        let outcome = RunOutcome {
            report: report(),
            output: TargetOutput::Incomplete {
                reason: String::from("1 task(s) failed"),
            },
        };
        let json = OutputFormatter::new(OutputFormat::Json).format_outcome(&outcome);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["report"]["tasks"]["vpc"]["status"], "failed");
        assert_eq!(value["output"]["kind"], "incomplete");
    }

    #[test]
    fn test_addresses_table() {
        colored::control::set_override(false);
        let mut addresses = BTreeMap::new();
        addresses.insert(String::from("api"), vec![String::from("api-1.example")]);
        let text = OutputFormatter::new(OutputFormat::Text).format_addresses(&addresses);
        assert!(text.contains("api-1.example"));
    }
}
