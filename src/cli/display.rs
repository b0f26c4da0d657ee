//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use std::path::Path;

use super::commands::{RenderSummary, ValidationResult};
use crate::reconcile::{ReconcileReport, StepStatus};
use crate::topology::{ClusterPlan, FirewallRule, RoleFirewall};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    trim_line_end(&mut output);

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        trim_line_end(&mut output);
    }

    output
}

/// Drop the last column's padding and end the line
fn trim_line_end(output: &mut String) {
    while output.ends_with(' ') {
        output.pop();
    }
    output.push('\n');
}

// ============================================================================
// Plan display
// ============================================================================

/// Format a cluster plan: summary, nodes, firewalls and join order
pub fn format_plan(plan: &ClusterPlan) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Cluster {} ({}, {})\n",
        plan.cluster, plan.environment, plan.location
    ));
    output.push_str(&format!(
        "Network {} [management {}, application {}]\n",
        plan.network.cidr, plan.network.management_subnet, plan.network.application_subnet
    ));
    output.push_str(&format!(
        "Primary manager: {} (tolerates {} manager failure{})\n\n",
        plan.primary_manager,
        plan.quorum_tolerance,
        if plan.quorum_tolerance == 1 { "" } else { "s" }
    ));

    output.push_str(&format_node_table(plan));
    output.push('\n');
    output.push_str(&format_firewall_table(&plan.firewalls));
    output.push('\n');

    output.push_str("Join order:\n");
    for (i, step) in plan.join_order.iter().enumerate() {
        output.push_str(&format!("  {:>3}. {}\n", i + 1, step));
    }

    output
}

/// Format the node list of a plan
pub fn format_node_table(plan: &ClusterPlan) -> String {
    let headers = &["NAME", "ROLE", "PRIVATE IP", "PUBLIC", "TYPE", "RULES"];
    let rows: Vec<Vec<String>> = plan
        .nodes
        .iter()
        .map(|node| {
            vec![
                node.name.clone(),
                node.role.to_string(),
                node.private_ip.to_string(),
                if node.public_ip { "yes" } else { "no" }.to_string(),
                node.server_type.clone(),
                node.firewall_rules
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ]
        })
        .collect();

    format_table(headers, rows)
}

fn rule_port(rule: &FirewallRule) -> String {
    match rule.port {
        Some(port) => format!("{}/{}", port, rule.protocol.as_str()),
        None => rule.protocol.as_str().to_string(),
    }
}

/// Format per-role firewalls, one row per expanded rule
pub fn format_firewall_table(firewalls: &[RoleFirewall]) -> String {
    let headers = &["FIREWALL", "RULE", "PORT", "SOURCES", "NODES"];
    let mut rows = Vec::new();
    for firewall in firewalls {
        for rule in &firewall.rules {
            rows.push(vec![
                firewall.name.clone(),
                rule.rule.to_string(),
                rule_port(rule),
                rule.source_ips.join(","),
                firewall.applies_to.len().to_string(),
            ]);
        }
    }

    format_table(headers, rows)
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, path: &Path) -> String {
    let mut output = String::new();

    if result.valid {
        output.push_str(&format!("✓ {} is valid\n\n", path.display()));
        output.push_str(&format!("  Nodes:            {}\n", result.nodes));
        output.push_str(&format!(
            "  Quorum tolerance: {}\n",
            result.quorum_tolerance
        ));
        if let Some(ref fingerprint) = result.fingerprint {
            output.push_str(&format!("  Fingerprint:      {}\n", fingerprint));
        }
    } else {
        output.push_str(&format!("✗ {} is invalid\n\n", path.display()));
        if let Some(ref error) = result.error {
            output.push_str(&format!("  Error: {}\n", error));
        }
    }

    output
}

// ============================================================================
// Render display
// ============================================================================

pub fn format_render_summary(summary: &RenderSummary) -> String {
    let mut output = String::new();
    if summary.written {
        output.push_str(&format!("Wrote {} files:\n", summary.files.len()));
    } else {
        output.push_str(&format!(
            "Dry run, would write {} files:\n",
            summary.files.len()
        ));
    }
    for file in &summary.files {
        output.push_str(&format!("  {}\n", file.display()));
    }
    output
}

// ============================================================================
// Reconcile display
// ============================================================================

fn status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Skipped => "skipped",
        StepStatus::Planned => "planned",
        StepStatus::Applied => "applied",
    }
}

/// Format the outcome of an apply run
pub fn format_reconcile_report(report: &ReconcileReport) -> String {
    let headers = &["#", "STEP", "NODE", "STATUS", "ATTEMPTS"];
    let rows: Vec<Vec<String>> = report
        .outcomes
        .iter()
        .enumerate()
        .map(|(i, outcome)| {
            vec![
                (i + 1).to_string(),
                outcome.step.kind().to_string(),
                outcome.step.node().to_string(),
                status_str(outcome.status).to_string(),
                outcome.attempts.to_string(),
            ]
        })
        .collect();

    let mut output = format!(
        "Run {} (plan {})\n\n",
        report.run_id,
        short_fingerprint(&report.plan_fingerprint)
    );
    output.push_str(&format_table(headers, rows));

    let elapsed = report.finished_at - report.started_at;
    output.push_str(&format!(
        "\n{} applied, {} skipped, {} planned in {:.1}s\n",
        report.count(StepStatus::Applied),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Planned),
        elapsed.num_milliseconds() as f64 / 1000.0
    ));
    output
}

fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
