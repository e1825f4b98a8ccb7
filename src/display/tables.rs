//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::display::theme::ScoreBand;
use crate::query::SearchResponse;
use crate::service::{ServiceStats, VerifyReport};

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        Self { table: new_table() }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn score_color(score: f32) -> Color {
    match ScoreBand::of(score) {
        ScoreBand::Strong => Color::Green,
        ScoreBand::Moderate => Color::Yellow,
        ScoreBand::Weak => Color::DarkGrey,
    }
}

/// Ranked search hits with their most useful metadata.
pub fn create_results_table(response: &SearchResponse) -> String {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold),
        Cell::new("Video").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Channel").add_attribute(Attribute::Bold),
    ]);

    for (rank, hit) in response.hits.iter().enumerate() {
        let meta = |key: &str| hit.metadata.get(key).cloned().unwrap_or_default();
        table.add_row(vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(hit.video_id.as_str()),
            Cell::new(format!("{:.4}", hit.score)).fg(score_color(hit.score)),
            Cell::new(meta("title")),
            Cell::new(meta("channel_title")),
        ]);
    }

    table.to_string()
}

/// Two-column overview of a service.
pub fn create_stats_table(stats: &ServiceStats) -> String {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Metric").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);

    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    let rows = [
        ("State", stats.state.clone()),
        ("Generation", stats.generation.to_string()),
        ("Metric", format!("{} ({} dims)", stats.metric, stats.dimension)),
        ("Segment", optional(stats.segment_id.map(|id| id.to_string()))),
        ("Segment size", stats.segment_size.to_string()),
        (
            "Lists",
            format!("{} (largest {})", stats.nlist, stats.largest_list),
        ),
        ("Quantization", optional(stats.quantization.clone())),
        (
            "Segment memory",
            format!("{:.1} MiB", stats.segment_memory_bytes as f64 / 1_048_576.0),
        ),
        ("Delta size", stats.delta_size.to_string()),
        ("Tombstones", stats.tombstone_count.to_string()),
        ("Live videos", stats.live_count.to_string()),
        ("Store records", stats.store_size.to_string()),
        ("Store bytes", optional(stats.store_bytes.map(|b| b.to_string()))),
        ("Last rebuild", optional(stats.last_rebuild_timestamp.clone())),
        (
            "Rebuild duration",
            optional(stats.last_rebuild_duration_ms.map(|ms| format!("{ms:.1} ms"))),
        ),
        (
            "Rebuilds",
            format!(
                "{} completed, {} failed",
                stats.rebuilds_completed, stats.rebuilds_failed
            ),
        ),
        ("Retired segments alive", stats.retired_segments_alive.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }

    if let Some(error) = &stats.last_error {
        table.add_row(vec![
            Cell::new("Last error"),
            Cell::new(error).fg(Color::Red),
        ]);
    }

    table.to_string()
}

/// Differences found by a consistency check, one row per id.
pub fn create_verify_table(report: &VerifyReport) -> String {
    let mut builder = TableBuilder::new().set_headers(vec!["Problem", "Video"]);
    let problems = [
        ("missing from index", &report.missing_from_index),
        ("stale in index", &report.stale_in_index),
        ("orphaned in index", &report.orphaned_in_index),
    ];
    for (problem, ids) in problems {
        for id in ids {
            builder = builder.add_row(vec![problem.to_string(), id.to_string()]);
        }
    }
    builder.build()
}
