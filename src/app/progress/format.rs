//! Human readable byte sizes and rates

use crate::constants::progress::SIZE_UNITS;

/// Format a byte count: `1536` -> `"1.5 KB"`
///
/// Divides by 1024 while the value rounded to one decimal is at least 1000,
/// so sizes read `"1.0 KB"` rather than `"1023.0 bytes"`.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while round1(value) >= 1000.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, SIZE_UNITS[unit])
}

/// Format a per-second rate: `1_572_864` -> `"1.5 MB/s"`
pub fn format_rate(bytes_per_second: u64) -> String {
    format!("{}/s", format_size(bytes_per_second))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
