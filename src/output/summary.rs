use std::fmt::Write;

use comfy_table::{Cell, Color as TableColor};

use crate::lark::types::PerformanceMetrics;
use crate::tree::{Forest, ForestStats};

use super::styling::{bright, bright_yellow, cyan, dim, Tone};
use super::tables::{create_table, fault_cell, header, latency_cell, rate_cell};

const MAX_REJECTED_ROWS: usize = 10;

/// Prints a human-readable summary of a story forest to stdout.
///
/// Sections:
/// - Overview: title, record counts, validity rate, shape of the forest
/// - Validation: records dropped per reason and orphaned parents
/// - Levels: node count per depth level
/// - Rejected Records: the first rejected rows with their reason
/// - API Performance: request and credential statistics, when available
pub fn print_summary(forest: &Forest, metrics: Option<&PerformanceMetrics>) {
    println!("{}", render_summary(forest, metrics));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn validity_rate(stats: &ForestStats) -> f64 {
    if stats.total_records == 0 {
        return 100.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rate = stats.valid_records as f64 / stats.total_records as f64 * 100.0;
    rate
}

pub(crate) fn render_summary(forest: &Forest, metrics: Option<&PerformanceMetrics>) -> String {
    let mut output = String::new();
    let stats = &forest.stats;

    add_section_header(&mut output, "📊", "Overview");

    let rate = validity_rate(stats);
    let _ = write!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Story map:"),
        cyan(forest.title().unwrap_or("-")),
        dim("Records:"),
        bright_yellow(stats.total_records),
        dim("Valid stories:"),
        Tone::for_rate(rate).paint(format!("{} ({rate:.1}%)", stats.valid_records)),
        dim("Roots / leaves:"),
        bright_yellow(format!("{} / {}", stats.root_nodes, stats.leaf_nodes)),
        dim("Max depth:"),
        bright_yellow(stats.max_depth),
        dim("With criteria / tickets:"),
        bright_yellow(format!("{} / {}", stats.criteria_nodes, stats.ticket_links)),
        dim("Built at:"),
        dim(forest.metadata.built_at.format("%Y-%m-%d %H:%M UTC"))
    );

    if stats.valid_records == 0 {
        let _ = writeln!(output, "{}", bright_yellow("No valid stories found."));
    }

    add_section_header(&mut output, "🧹", "Validation");
    let mut validation = create_table();
    validation.set_header(header(&["Check", "Records"]));
    for (label, count) in [
        ("Empty story number", stats.empty_story_no),
        ("Invalid story number format", stats.invalid_format),
        ("Missing record id", stats.missing_record_id),
        ("Duplicate record id", stats.duplicate_record_id),
        ("Orphaned parent reference", stats.orphan_nodes),
    ] {
        validation.add_row(vec![Cell::new(label), fault_cell(count)]);
    }
    let _ = writeln!(output, "{validation}\n");
    let _ = writeln!(output, "  {} {}\n", dim("Pattern:"), dim(&forest.metadata.story_pattern));

    if !stats.level_distribution.is_empty() {
        add_section_header(&mut output, "📈", "Levels");
        let mut levels = create_table();
        levels.set_header(header(&["Level", "Nodes", "Share"]));
        for (level, count) in &stats.level_distribution {
            #[allow(clippy::cast_precision_loss)]
            let share = *count as f64 / stats.valid_records.max(1) as f64 * 100.0;
            levels.add_row(vec![
                Cell::new(level),
                Cell::new(count),
                Cell::new(format!("{share:.1}%")),
            ]);
        }
        let _ = writeln!(output, "{levels}\n");
    }

    if !forest.rejected.is_empty() {
        add_section_header(&mut output, "⚠️", "Rejected Records");
        let mut rejected = create_table();
        rejected.set_header(header(&["Record", "Story No", "Reason"]));
        for entry in forest.rejected.iter().take(MAX_REJECTED_ROWS) {
            rejected.add_row(vec![
                Cell::new(if entry.record_id.is_empty() {
                    "-"
                } else {
                    entry.record_id.as_str()
                }),
                Cell::new(entry.story_no.as_deref().unwrap_or("-")),
                Cell::new(entry.reason).fg(TableColor::Yellow),
            ]);
        }
        if forest.rejected.len() > MAX_REJECTED_ROWS {
            rejected.add_row(vec![
                Cell::new(format!(
                    "... and {} more",
                    forest.rejected.len() - MAX_REJECTED_ROWS
                ))
                .fg(TableColor::DarkGrey),
                Cell::new(""),
                Cell::new(""),
            ]);
        }
        let _ = writeln!(output, "{rejected}\n");
    }

    if let Some(metrics) = metrics {
        add_section_header(&mut output, "🌐", "API Performance");
        let mut perf = create_table();
        perf.set_header(header(&[
            "Requests",
            "Failed",
            "Success",
            "Avg Latency",
            "Token Refreshes",
            "Rate Waits",
            "Window Use",
        ]));
        perf.add_row(vec![
            Cell::new(metrics.requests_total),
            Cell::new(metrics.requests_failed),
            rate_cell(metrics.success_rate * 100.0),
            latency_cell(metrics.avg_response_time),
            Cell::new(metrics.auth_refreshes),
            Cell::new(metrics.rate_limit_hits),
            Cell::new(format!("{:.0}%", metrics.rate_limit_utilization * 100.0)),
        ]);
        let _ = writeln!(output, "{perf}\n");
    }

    output
}
