//! Human-readable byte and speed quantities.
//!
//! rsync prints sizes like `2,506,567` or `2.39M` and speeds like `42.84MB/s`.
//! Everything here is binary (1024-based) and never fails: unparseable input
//! decodes to zero.

use std::sync::LazyLock;

use regex::Regex;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.]+)\s*([kKmMgGtT]?)B/s$").expect("valid speed regex"));

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d,.]+)\s*([kKmMgGtT]?)B?$").expect("valid size regex"));

fn multiplier(unit: &str) -> f64 {
    match unit.to_ascii_uppercase().as_str() {
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        "T" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

/// Decode `<number><unit>B/s` into bytes per second. Returns 0.0 on anything else.
pub fn parse_speed(text: &str) -> f64 {
    let Some(caps) = SPEED_RE.captures(text.trim()) else {
        return 0.0;
    };

    let value: f64 = caps[1].parse().unwrap_or(0.0);
    value * multiplier(&caps[2])
}

/// Decode a transferred-amount token (`2506567`, `2,506,567`, `2.39M`, `2.39MB`).
pub fn parse_size(text: &str) -> u64 {
    let Some(caps) = SIZE_RE.captures(text.trim()) else {
        return 0;
    };

    let value: f64 = caps[1].replace(',', "").parse().unwrap_or(0.0);
    (value * multiplier(&caps[2])).round() as u64
}

fn scale(mut value: f64) -> (f64, &'static str) {
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, UNITS[unit])
}

/// Format a byte count, e.g. `2506567` -> `2.39MB`.
pub fn format_bytes(bytes: u64) -> String {
    let (value, unit) = scale(bytes as f64);
    format!("{:.2}{}", value, unit)
}

/// Format a rate, e.g. `44921405.44` -> `42.84MB/s`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    let (value, unit) = scale(bytes_per_sec.max(0.0));
    format!("{:.2}{}/s", value, unit)
}
