//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::graph::Value;
use crate::planner::{OperationKind, OperationStatus, Plan};
use crate::reconciler::RunReport;
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Operation result row for table display.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when formatting JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nExecution Plan\n");
        let _ = write!(output, "   Config hash: {}\n\n", short(&plan.config_hash));

        let rows: Vec<PlanRow> = plan
            .operations
            .iter()
            .filter(|op| op.kind != OperationKind::NoOp)
            .enumerate()
            .map(|(i, op)| PlanRow {
                index: i + 1,
                action: Self::format_kind(op.kind),
                resource: op.resource_id.to_string(),
                reason: truncate(&op.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for op in plan.operations.iter().filter(|op| !op.diff.is_empty()) {
                let _ = writeln!(output, "   {}", op.resource_id);
                for (attr, change) in &op.diff {
                    let _ = writeln!(output, "     {attr}: {change}");
                }
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.delete.to_string().red(),
            summary.unchanged
        );
        output
    }

    /// Formats the outcome of an apply or destroy run.
    #[must_use]
    pub fn format_run(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_run_text(report),
        }
    }

    fn format_run_text(report: &RunReport) -> String {
        let mut output = String::new();

        let rows: Vec<StatusRow> = report
            .results
            .iter()
            .map(|r| StatusRow {
                resource: if r.deposed {
                    format!("{} (deposed)", r.resource_id)
                } else {
                    r.resource_id.to_string()
                },
                action: Self::format_kind(r.kind),
                status: Self::format_status(r.status),
                attempts: r.attempts,
                id: r.provider_id.clone().unwrap_or_default(),
                error: truncate(r.error.as_deref().unwrap_or_default(), 48),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let headline = if report.is_success() {
            format!("{} {} complete", "✓".green(), report.operation)
        } else {
            format!("{} {} incomplete", "✗".red(), report.operation)
        };
        let _ = write!(
            output,
            "\n{headline}: {} succeeded, {} unchanged, {} failed, {} skipped, {} cancelled\n",
            report.count(OperationStatus::Succeeded),
            report.count(OperationStatus::NoOp),
            report.count(OperationStatus::Failed),
            report.count(OperationStatus::Skipped),
            report.count(OperationStatus::Cancelled)
        );

        if !report.outputs.is_empty() {
            output.push_str("\nOutputs:\n");
            for (name, value) in &report.outputs {
                match value {
                    Some(v) => {
                        let _ = writeln!(output, "   {name} = {v}");
                    }
                    None => {
                        let _ = writeln!(output, "   {name} = {}", "(unavailable)".dimmed());
                    }
                }
            }
        }
        output
    }

    /// Formats recorded outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, Value>) -> String {
        match self.format {
            OutputFormat::Json => to_json(outputs),
            OutputFormat::Text => {
                if outputs.is_empty() {
                    return String::from("No outputs recorded.\n");
                }
                let mut output = String::new();
                for (name, value) in outputs {
                    let _ = writeln!(output, "{name} = {value}");
                }
                output
            }
        }
    }

    /// Formats the state snapshot.
    #[must_use]
    pub fn format_state(&self, snapshot: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => to_json(snapshot),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    snapshot.project, snapshot.environment
                );
                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Config hash: {}", short(&snapshot.config_hash));
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", snapshot.len());

                let rows: Vec<ResourceRow> = snapshot
                    .resources
                    .iter()
                    .map(|(id, r)| ResourceRow {
                        resource: id.to_string(),
                        id: r.provider_id.clone(),
                        dependencies: r
                            .dependencies
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} succeeded, {} failed)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.succeeded,
                            entry.failed
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats validation findings.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "  - {error}");
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, lock) => to_json(&lock),
            (OutputFormat::Text, None) => String::from("State is not locked.\n"),
            (OutputFormat::Text, Some(lock)) => format!(
                "State locked: {}\n   Holder: {}\n   Operation: {}\n   Expires in: {}s\n",
                lock.lock_id,
                lock.holder,
                lock.operation,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats an operation kind with color.
    fn format_kind(kind: OperationKind) -> String {
        match kind {
            OperationKind::Create => "+create".green().to_string(),
            OperationKind::Update => "~update".yellow().to_string(),
            OperationKind::Replace => "-/+replace".magenta().to_string(),
            OperationKind::Delete => "-delete".red().to_string(),
            OperationKind::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Formats an operation status with color.
    fn format_status(status: OperationStatus) -> String {
        match status {
            OperationStatus::Succeeded => "succeeded".green().to_string(),
            OperationStatus::NoOp => "no-op".dimmed().to_string(),
            OperationStatus::Failed => "failed".red().to_string(),
            OperationStatus::Skipped => "skipped".yellow().to_string(),
            OperationStatus::Cancelled => "cancelled".yellow().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// First eight characters of a hash.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    summary: crate::planner::PlanSummary,
    operations: Vec<OperationJson>,
}

#[derive(Serialize)]
struct OperationJson {
    resource: String,
    kind: OperationKind,
    reason: String,
    depends_on: Vec<usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    deposed: bool,
    changes: BTreeMap<String, String>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            summary: plan.summary(),
            operations: plan
                .operations
                .iter()
                .map(|op| OperationJson {
                    resource: op.resource_id.to_string(),
                    kind: op.kind,
                    reason: op.reason.clone(),
                    depends_on: op.dependencies.clone(),
                    deposed: op.deposed,
                    changes: op
                        .diff
                        .iter()
                        .map(|(k, d)| (k.clone(), d.to_string()))
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, build_graph};
    use crate::planner::Planner;

    fn plan() -> Plan {
        let config = ConfigParser::new()
            .parse_yaml(
                r#"
project:
  name: web
resources:
  - type: network
    name: main
    attributes:
      cidr_block: "10.0.0.0/16"
  - type: subnet
    name: public
    attributes:
      network_id: "${network.main.id}"
"#,
                None,
            )
            .expect("valid config");
        let graph = build_graph(&config).expect("graph");
        Planner::default()
            .plan(&graph, &StateSnapshot::new("web", "dev"), "0123456789abcdef")
            .expect("plan")
    }

    #[test]
    fn test_plan_json_lists_operations_in_order() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("json");

        assert_eq!(parsed["config_hash"], "0123456789abcdef");
        assert_eq!(parsed["summary"]["create"], 2);
        assert_eq!(parsed["operations"][0]["resource"], "network.main");
        assert_eq!(parsed["operations"][1]["kind"], "create");
        assert_eq!(parsed["operations"][1]["depends_on"][0], 0);
    }

    #[test]
    fn test_plan_text_shows_hash_and_resources() {
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);
        assert!(text.contains("01234567"));
        assert!(text.contains("subnet.public"));
        assert!(text.contains("network_id"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("é".repeat(20).as_str(), 6), "ééé...");
        assert_eq!(short("abc"), "abc");
    }
}
