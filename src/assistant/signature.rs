//! Row-set fingerprinting for debounce and stale-response detection.

use crate::models::ResultRow;

/// Deterministic fingerprint over `(test_id, value)` pairs.
///
/// Sorted by test id, so row insertion order never changes the
/// signature; a missing value is distinct from any numeric value.
pub fn signature_of<'a>(pairs: impl Iterator<Item = (&'a str, Option<f64>)>) -> String {
    let mut entries: Vec<String> = pairs
        .map(|(id, value)| match value {
            Some(v) => format!("{id}={v}"),
            None => format!("{id}=-"),
        })
        .collect();
    entries.sort_unstable();
    entries.join(";")
}

/// Fingerprint of a ledger row set.
pub fn row_signature(rows: &[ResultRow]) -> String {
    signature_of(rows.iter().map(|r| (r.test_id.as_str(), r.value_si)))
}
