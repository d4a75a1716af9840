//! Shared formatting helpers for the diagnostic subcommands.

use comfy_table::{Attribute, Cell, Table};

/// Prints a table with the first row treated as a bold header.
pub fn format_table(rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::NOTHING);

    if let Some(header) = rows.first() {
        let header_cells: Vec<Cell> = header
            .iter()
            .map(|cell| Cell::new(cell).add_attribute(Attribute::Bold))
            .collect();
        table.set_header(header_cells);
    }
    for row in rows.iter().skip(1) {
        table.add_row(row);
    }
    println!("{table}");
}

/// Formats a nanosecond timestamp as seconds with nanosecond precision,
/// plus a UTC calendar rendering when it falls within the last 20 years.
pub fn format_time_ns(time_ns: u64) -> String {
    let seconds = time_ns / 1_000_000_000;
    let nanos = time_ns % 1_000_000_000;
    let decimal = format!("{seconds}.{nanos:09}");

    let now = chrono::Utc::now().timestamp() as u64;
    let twenty_years_secs = 20 * 365 * 24 * 3600;
    if now > twenty_years_secs && seconds > now - twenty_years_secs {
        match chrono::DateTime::<chrono::Utc>::from_timestamp(seconds as i64, nanos as u32) {
            Some(dt) => format!("{} ({decimal})", dt.format("%Y-%m-%dT%H:%M:%S%.9fZ")),
            None => decimal,
        }
    } else {
        decimal
    }
}
