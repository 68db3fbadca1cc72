//! Markdown and JSON report generation.
//!
//! Turns a forest snapshot and its audit into a readable report: summary
//! numbers, the tree with totals and exclusive times, and any problems.

use crate::analysis::{audit, depth_first, exclusive_times, AuditReport};
use crate::models::{format_duration, Report, ReportMetadata, ReportNode, Trace};
use anyhow::Result;
use chrono::Duration;

/// Options controlling what the Markdown report shows.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub include_estimates: bool,
    pub include_timers: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            include_estimates: true,
            include_timers: true,
        }
    }
}

/// Assemble a report from a forest snapshot.
pub fn build_report(metadata: ReportMetadata, traces: &[Trace], failures: Vec<String>) -> Report {
    let exclusive = exclusive_times(traces);

    let nodes = depth_first(traces)
        .into_iter()
        .map(|(depth, trace)| ReportNode {
            id: trace.id().clone(),
            parent_id: trace.parent_id().cloned(),
            depth,
            estimated: trace.estimated(),
            actual: trace.actual(),
            exclusive: exclusive
                .get(trace.id())
                .copied()
                .unwrap_or_else(Duration::zero),
            started_at: trace.started_at(),
        })
        .collect();

    Report {
        metadata,
        nodes,
        audit: audit(traces),
        failures,
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, options: RenderOptions) -> String {
    let mut output = String::new();

    output.push_str("# Trace Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.audit, options));
    output.push_str(&generate_tree_section(&report.nodes, options));
    output.push_str(&generate_problems_section(&report.audit, &report.failures));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Script:** `{}`\n", metadata.script));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Events Applied:** {}\n", metadata.events_applied));
    if metadata.events_failed > 0 {
        section.push_str(&format!("- **Events Failed:** {}\n", metadata.events_failed));
    }
    section.push_str(&format!(
        "- **Replay Duration:** {:.3}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_summary_section(audit: &AuditReport, options: RenderOptions) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Nodes | Roots | Max Depth | Total Actual |");
    if options.include_estimates {
        section.push_str(" Total Estimated |");
    }
    section.push('\n');
    section.push_str("|:---:|:---:|:---:|:---:|");
    if options.include_estimates {
        section.push_str(":---:|");
    }
    section.push('\n');
    section.push_str(&format!(
        "| {} | {} | {} | {} |",
        audit.node_count,
        audit.root_count,
        audit.max_depth,
        format_duration(audit.total_actual)
    ));
    if options.include_estimates {
        section.push_str(&format!(" {} |", format_duration(audit.total_estimated)));
    }
    section.push_str("\n\n");

    if options.include_timers && !audit.running_timers.is_empty() {
        section.push_str(&format!(
            "Running timers: {}\n\n",
            audit
                .running_timers
                .iter()
                .map(|id| format!("`{}`", id))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    section
}

fn generate_tree_section(nodes: &[ReportNode], options: RenderOptions) -> String {
    let mut section = String::new();

    section.push_str("## Forest\n\n");

    if nodes.is_empty() {
        section.push_str("No traces recorded.\n\n");
        return section;
    }

    for node in nodes {
        section.push_str(&generate_node_line(node, options));
    }
    section.push('\n');

    section
}

fn generate_node_line(node: &ReportNode, options: RenderOptions) -> String {
    let mut line = format!(
        "{}- **{}**: {} (own {})",
        "  ".repeat(node.depth),
        node.id,
        format_duration(node.actual),
        format_duration(node.exclusive)
    );

    if options.include_estimates && node.estimated > Duration::zero() {
        line.push_str(&format!(", estimated {}", format_duration(node.estimated)));
    }
    if options.include_timers {
        if let Some(started_at) = node.started_at {
            line.push_str(&format!(
                ", running since {}",
                started_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
    }
    line.push('\n');

    line
}

fn generate_problems_section(audit: &AuditReport, failures: &[String]) -> String {
    let mut section = String::new();

    section.push_str("## Problems\n\n");

    if audit.is_clean() && failures.is_empty() {
        section.push_str("Every total matches its subtree.\n\n");
        return section;
    }

    if !audit.is_clean() {
        section.push_str("### Invariant Violations\n\n");
        for violation in &audit.violations {
            section.push_str(&format!("- {}\n", violation.describe()));
        }
        section.push('\n');
    }

    if !failures.is_empty() {
        section.push_str("### Rejected Events\n\n");
        for failure in failures {
            section.push_str(&format!("- {}\n", failure));
        }
        section.push('\n');
    }

    section
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by focus-trace v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
