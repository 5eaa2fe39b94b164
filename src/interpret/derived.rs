//! Derived-value recomputation pass.
//!
//! Invoked explicitly (order load or a recalculate action), never on
//! every keystroke, so a derived value is never silently overwritten
//! mid-edit.

use std::collections::HashMap;

use crate::catalog::{CatalogError, TestCatalog};
use crate::models::enums::ResultFlag;
use crate::models::{PatientContext, ResultRow};

use super::flag::compute_flag;
use super::parse::format_value;

/// Recompute every derived row from its sibling values.
///
/// Inputs are gathered from the row set as it stood when the pass
/// started; a derived row whose required inputs are incomplete is
/// blanked with an `Unknown` flag. Returns the number of rows whose
/// value changed.
pub fn recalculate_derived(
    rows: &mut [ResultRow],
    catalog: &TestCatalog,
    ctx: &PatientContext,
    tolerance: f64,
) -> Result<usize, CatalogError> {
    let values: HashMap<String, f64> = rows
        .iter()
        .filter_map(|r| r.value_si.map(|v| (r.test_id.clone(), v)))
        .collect();

    let mut changed = 0;
    for row in rows.iter_mut() {
        let def = catalog.lookup(&row.test_id)?;
        let Some(expr) = &def.derived else {
            continue;
        };

        let range = catalog.reference_range(&def.id, ctx.age_years, &ctx.sex)?;
        let new_value = expr.eval(ctx, &values);

        match new_value {
            Some(v) => {
                let unchanged = row
                    .value_si
                    .is_some_and(|old| (old - v).abs() <= tolerance);
                row.flag = compute_flag(Some(v), &range, &def.critical_ranges);
                if !unchanged {
                    row.value_si = Some(v);
                    row.raw_text = format_value(v);
                    row.dirty = true;
                    changed += 1;
                    tracing::debug!(test_id = %def.id, value = v, "Derived value recomputed");
                }
            }
            None => {
                if row.value_si.is_some() {
                    changed += 1;
                    tracing::debug!(test_id = %def.id, "Derived inputs incomplete, blanking");
                }
                row.value_si = None;
                row.raw_text.clear();
                row.flag = ResultFlag::Unknown;
            }
        }
    }

    Ok(changed)
}
