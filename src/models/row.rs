use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ResultFlag, Trend};

/// One working result entry for a single test within an order.
///
/// The stored value is always in the test's canonical (SI) unit; the
/// display unit only affects how it is rendered. The flag is computed by
/// the interpretation engine and never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: Uuid,
    pub test_id: String,
    /// Text exactly as entered by the operator.
    pub raw_text: String,
    /// Parsed value in the canonical unit. `None` until a numeric value
    /// is entered (or derived).
    pub value_si: Option<f64>,
    /// Unit currently selected for display.
    pub display_unit: String,
    /// Value from the previous encounter, for trend display. Read-only.
    pub prior_value_si: Option<f64>,
    pub flag: ResultFlag,
    /// Set on value edits, cleared only by an explicit save.
    pub dirty: bool,
}

impl ResultRow {
    /// A blank row for a test: no value, `Unknown` flag, not dirty.
    pub fn blank(test_id: &str, canonical_unit: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id: test_id.to_string(),
            raw_text: String::new(),
            value_si: None,
            display_unit: canonical_unit.to_string(),
            prior_value_si: None,
            flag: ResultFlag::Unknown,
            dirty: false,
        }
    }

    /// Direction of the current value relative to the prior encounter.
    /// `None` when either value is missing.
    pub fn trend(&self, tolerance: f64) -> Option<Trend> {
        let current = self.value_si?;
        let prior = self.prior_value_si?;
        let delta = current - prior;
        if delta.abs() <= tolerance {
            Some(Trend::Stable)
        } else if delta > 0.0 {
            Some(Trend::Rising)
        } else {
            Some(Trend::Falling)
        }
    }
}
