use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use super::styling::Tone;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn rate_cell(rate: f64) -> Cell {
    Cell::new(format!("{rate:.1}%")).fg(Tone::for_rate(rate).table_color())
}

pub fn fault_cell(count: usize) -> Cell {
    Cell::new(count).fg(Tone::for_faults(count).table_color())
}

/// Milliseconds, green up to 500ms, yellow up to 2s.
pub fn latency_cell(seconds: f64) -> Cell {
    let millis = seconds * 1000.0;
    let tone = if millis <= 500.0 {
        Tone::Good
    } else if millis <= 2000.0 {
        Tone::Warning
    } else {
        Tone::Critical
    };
    Cell::new(format!("{millis:.0}ms")).fg(tone.table_color())
}
