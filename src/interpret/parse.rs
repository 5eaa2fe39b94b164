//! Numeric extraction from operator-entered result text.

use std::sync::LazyLock;

use regex::Regex;

/// Accepts an optional comparator prefix, then a plain decimal number.
static RE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:<=|>=|<|>|≤|≥)?\s*([-+]?\d+(?:\.\d+)?)\s*$").unwrap()
});

/// Parse a raw result entry into a number.
///
/// Tolerates comparator prefixes ("<0.01", ">= 5"), thousands separators
/// and surrounding whitespace. Returns `None` for anything else; missing
/// numeric input is not an error, it flags as `Unknown` downstream.
pub fn parse_value(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "");
    let caps = RE_VALUE.captures(&cleaned)?;
    caps.get(1)?.as_str().parse::<f64>().ok()
}

/// Format a value for display: two decimals, trailing zeros trimmed.
pub fn format_value(v: f64) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
