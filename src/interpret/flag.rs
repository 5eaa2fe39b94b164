//! Flag classification for a canonical-unit value.

use crate::catalog::{CriticalRange, ReferenceRange};
use crate::models::enums::ResultFlag;

/// Classify a value against a patient's reference interval and the test's
/// critical thresholds.
///
/// Critical classification is checked first and takes precedence over the
/// plain reference range even when the thresholds disagree with each
/// other. An open reference range cannot produce `Normal`; it degrades to
/// `Unknown` unless a critical bound is met.
pub fn compute_flag(
    value_si: Option<f64>,
    range: &ReferenceRange,
    criticals: &[CriticalRange],
) -> ResultFlag {
    let value = match value_si {
        Some(v) if v.is_finite() => v,
        _ => return ResultFlag::Unknown,
    };

    if criticals.iter().any(|c| c.contains(value)) {
        return ResultFlag::Critical;
    }

    if range.is_unknown() {
        return ResultFlag::Unknown;
    }

    if let Some(low) = range.low {
        if value < low {
            return ResultFlag::AbnormalLow;
        }
    }
    if let Some(high) = range.high {
        if value > high {
            return ResultFlag::AbnormalHigh;
        }
    }

    ResultFlag::Normal
}
