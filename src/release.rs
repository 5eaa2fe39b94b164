//! Release policy for finalizing an order's results.
//!
//! Unresolved critical values are a hard, non-bypassable block. Unsaved
//! dirty rows do not block release; that permissive policy is
//! intentional, the released snapshot is built from current values.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::SampleTracker;
use crate::ledger::ResultLedger;
use crate::models::enums::ResultFlag;
use crate::models::ResultRow;

#[derive(Debug, Clone, Error)]
pub enum ReleaseError {
    #[error("{count} unresolved critical value(s) block release")]
    CriticalUnacknowledged { count: usize },
}

/// Outcome of a pre-release validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseDecision {
    ReadyToRelease,
    BlockedCritical(usize),
}

/// One finalized result in a released snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasedResult {
    pub test_id: String,
    pub name: String,
    pub value_si: Option<f64>,
    pub display_unit: String,
    pub display_value: Option<String>,
    pub flag: ResultFlag,
}

/// Immutable finalized view of an order, handed to external persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasedSnapshot {
    pub released_at: NaiveDateTime,
    pub results: Vec<ReleasedResult>,
}

/// Check whether the row set may be finalized.
pub fn validate(rows: &[ResultRow]) -> ReleaseDecision {
    let criticals = rows
        .iter()
        .filter(|r| r.flag == ResultFlag::Critical)
        .count();
    if criticals > 0 {
        ReleaseDecision::BlockedCritical(criticals)
    } else {
        ReleaseDecision::ReadyToRelease
    }
}

/// Tests with a result row but no collected specimen. Surfaced to the
/// operator before finalization; it does not block release.
pub fn uncollected_tests(rows: &[ResultRow], tracker: &SampleTracker) -> Vec<String> {
    rows.iter()
        .filter(|r| !tracker.is_collected(&r.test_id))
        .map(|r| r.test_id.clone())
        .collect()
}

/// Finalize the ledger into an immutable snapshot.
///
/// Fails while any row is flagged critical; dirty state is irrelevant.
pub fn release(ledger: &ResultLedger) -> Result<ReleasedSnapshot, ReleaseError> {
    if let ReleaseDecision::BlockedCritical(count) = validate(ledger.rows()) {
        tracing::info!(count, "Release blocked on critical values");
        return Err(ReleaseError::CriticalUnacknowledged { count });
    }

    let results = ledger
        .rows()
        .iter()
        .map(|row| ReleasedResult {
            test_id: row.test_id.clone(),
            name: ledger
                .catalog()
                .lookup(&row.test_id)
                .map(|d| d.name.clone())
                .unwrap_or_else(|_| row.test_id.clone()),
            value_si: row.value_si,
            display_unit: row.display_unit.clone(),
            display_value: ledger.display_value(row.id).ok().flatten(),
            flag: row.flag.clone(),
        })
        .collect::<Vec<_>>();

    tracing::info!(results = results.len(), "Order results released");
    Ok(ReleasedSnapshot {
        released_at: chrono::Local::now().naive_local(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::TestCatalog;
    use crate::models::enums::Sex;
    use crate::models::PatientContext;

    fn make_ledger() -> ResultLedger {
        ResultLedger::new(
            Arc::new(TestCatalog::load_test()),
            PatientContext::new(34, Sex::Female),
        )
    }

    #[test]
    fn critical_value_blocks_release() {
        let mut ledger = make_ledger();
        let id = ledger.add_test("troponin_i").unwrap();
        ledger.update_value(id, "0.85").unwrap();

        assert_eq!(validate(ledger.rows()), ReleaseDecision::BlockedCritical(1));
        match release(&ledger) {
            Err(ReleaseError::CriticalUnacknowledged { count }) => assert_eq!(count, 1),
            other => panic!("Expected CriticalUnacknowledged, got: {other:?}"),
        }
    }

    #[test]
    fn block_independent_of_dirty_state() {
        let mut ledger = make_ledger();
        let id = ledger.add_test("troponin_i").unwrap();
        ledger.update_value(id, "0.85").unwrap();
        ledger.mark_all_saved();

        // Saved or not, the critical flag alone decides.
        assert!(release(&ledger).is_err());
    }

    #[test]
    fn release_permitted_with_unsaved_rows() {
        let mut ledger = make_ledger();
        let id = ledger.add_test("potassium").unwrap();
        ledger.update_value(id, "4.2").unwrap();
        assert_eq!(ledger.dirty_rows().len(), 1);

        let snapshot = release(&ledger).unwrap();
        assert_eq!(snapshot.results.len(), 1);
        let result = &snapshot.results[0];
        assert_eq!(result.name, "Potassium");
        assert_eq!(result.value_si, Some(4.2));
        assert_eq!(result.flag, ResultFlag::Normal);
        assert_eq!(result.display_value.as_deref(), Some("4.2"));
    }

    #[test]
    fn blank_rows_release_as_unknown() {
        let mut ledger = make_ledger();
        ledger.add_test("sodium").unwrap();

        let snapshot = release(&ledger).unwrap();
        assert_eq!(snapshot.results[0].value_si, None);
        assert_eq!(snapshot.results[0].flag, ResultFlag::Unknown);
        assert_eq!(snapshot.results[0].display_value, None);
    }

    #[test]
    fn uncollected_tests_reported_but_not_blocking() {
        let mut ledger = make_ledger();
        let k = ledger.add_test("potassium").unwrap();
        ledger.add_test("hemoglobin").unwrap();
        ledger.update_value(k, "4.2").unwrap();

        let mut tracker = SampleTracker::new();
        tracker
            .collect_sample(&["potassium".to_string()], "Blood", "Tech A")
            .unwrap();

        let missing = uncollected_tests(ledger.rows(), &tracker);
        assert_eq!(missing, vec!["hemoglobin"]);
        assert!(release(&ledger).is_ok());
    }

    #[test]
    fn resolving_the_critical_unblocks() {
        let mut ledger = make_ledger();
        let id = ledger.add_test("potassium").unwrap();
        ledger.update_value(id, "6.5").unwrap();
        assert!(release(&ledger).is_err());

        // Corrected entry back inside the interval.
        ledger.update_value(id, "4.8").unwrap();
        assert_eq!(validate(ledger.rows()), ReleaseDecision::ReadyToRelease);
        assert!(release(&ledger).is_ok());
    }
}
