//! Per-order working set of result rows.
//!
//! The ledger owns every mutation of the row set and delegates all
//! classification to the interpretation engine; a row's flag is never
//! set directly. One ledger per active order, single-writer.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{CatalogError, TestCatalog};
use crate::config::FLOAT_TOLERANCE;
use crate::interpret::{self, InterpretError};
use crate::models::enums::{ResultFlag, Trend};
use crate::models::{PatientContext, ResultRow};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("A result row for test {test_id} already exists")]
    DuplicateTest { test_id: String },

    #[error("Result row not found: {0}")]
    RowNotFound(Uuid),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Interpret(#[from] InterpretError),
}

/// The mutable result working set for one order.
pub struct ResultLedger {
    catalog: Arc<TestCatalog>,
    ctx: PatientContext,
    rows: Vec<ResultRow>,
}

impl ResultLedger {
    pub fn new(catalog: Arc<TestCatalog>, ctx: PatientContext) -> Self {
        Self {
            catalog,
            ctx,
            rows: Vec::new(),
        }
    }

    pub fn patient(&self) -> &PatientContext {
        &self.ctx
    }

    pub fn catalog(&self) -> &Arc<TestCatalog> {
        &self.catalog
    }

    // ── Commands ────────────────────────────────────────────

    /// Insert a blank row for a test. At most one row per test id.
    pub fn add_test(&mut self, test_id: &str) -> Result<Uuid, LedgerError> {
        let def = self.catalog.lookup(test_id)?;
        if self.rows.iter().any(|r| r.test_id == test_id) {
            return Err(LedgerError::DuplicateTest {
                test_id: test_id.to_string(),
            });
        }

        let row = ResultRow::blank(test_id, &def.canonical_unit);
        let id = row.id;
        self.rows.push(row);
        tracing::debug!(test_id, "Result row added");
        Ok(id)
    }

    /// Add every member of a panel that is not already present.
    /// Used on order load; existing rows are left alone.
    pub fn add_panel(&mut self, panel_id: &str) -> Result<Vec<Uuid>, LedgerError> {
        let member_ids: Vec<String> = self
            .catalog
            .tests_by_panel(panel_id)?
            .iter()
            .map(|d| d.id.clone())
            .collect();

        let mut added = Vec::new();
        for test_id in member_ids {
            if self.row_by_test(&test_id).is_none() {
                added.push(self.add_test(&test_id)?);
            }
        }
        Ok(added)
    }

    /// Record an operator entry for a row.
    ///
    /// Parses the text, converts from the row's display unit to the
    /// canonical unit, recomputes the flag, and marks the row dirty.
    /// Non-numeric text is not an error: the value clears and the flag
    /// degrades to `Unknown`. The prior value is never touched.
    pub fn update_value(&mut self, row_id: Uuid, raw_text: &str) -> Result<(), LedgerError> {
        let idx = self.index_of(row_id)?;
        let test_id = self.rows[idx].test_id.clone();
        let display_unit = self.rows[idx].display_unit.clone();

        let def = self.catalog.lookup(&test_id)?;
        let value_si = match interpret::parse_value(raw_text) {
            Some(v) => Some(interpret::to_canonical(v, &display_unit, def)?),
            None => None,
        };
        let range = self
            .catalog
            .reference_range(&test_id, self.ctx.age_years, &self.ctx.sex)?;
        let flag = interpret::compute_flag(value_si, &range, &def.critical_ranges);

        let row = &mut self.rows[idx];
        row.raw_text = raw_text.to_string();
        row.value_si = value_si;
        row.flag = flag.clone();
        row.dirty = true;

        tracing::debug!(test_id = %test_id, value = ?value_si, flag = flag.as_str(), "Result value updated");
        Ok(())
    }

    /// Change the unit a row is displayed in.
    ///
    /// Display-only: the stored canonical value and the computed flag are
    /// invariant to this. Fails for a unit not registered for the test.
    pub fn update_unit(&mut self, row_id: Uuid, new_unit: &str) -> Result<(), LedgerError> {
        let idx = self.index_of(row_id)?;
        let def = self.catalog.lookup(&self.rows[idx].test_id)?;
        if !def.has_unit(new_unit) {
            return Err(InterpretError::UnitMismatch {
                test_id: def.id.clone(),
                unit: new_unit.to_string(),
            }
            .into());
        }
        self.rows[idx].display_unit = new_unit.to_string();
        Ok(())
    }

    /// Delete a row. No-op (returns false) if absent.
    pub fn remove_test(&mut self, row_id: Uuid) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.id != row_id);
        let removed = self.rows.len() < before;
        if removed {
            tracing::debug!(%row_id, "Result row removed");
        }
        removed
    }

    /// Recompute every derived row from current sibling values.
    ///
    /// A derived test with no row yet gets one when all its formula
    /// inputs are present, so a calculated result appears without a
    /// direct entry.
    pub fn recalculate_derived(&mut self) -> Result<usize, LedgerError> {
        let present: HashMap<String, f64> = self
            .rows
            .iter()
            .filter_map(|r| r.value_si.map(|v| (r.test_id.clone(), v)))
            .collect();

        let missing: Vec<String> = self
            .catalog
            .derived_tests()
            .filter(|def| self.row_by_test(&def.id).is_none())
            .filter(|def| {
                def.derived
                    .as_ref()
                    .is_some_and(|e| e.required_tests().iter().all(|t| present.contains_key(t)))
            })
            .map(|def| def.id.clone())
            .collect();
        for test_id in missing {
            self.add_test(&test_id)?;
        }

        let changed =
            interpret::recalculate_derived(&mut self.rows, &self.catalog, &self.ctx, FLOAT_TOLERANCE)?;
        if changed > 0 {
            tracing::debug!(changed, "Derived rows recalculated");
        }
        Ok(changed)
    }

    /// Seed prior-encounter values for the trend column. Rows without a
    /// matching entry are left untouched.
    pub fn apply_priors(&mut self, priors: &HashMap<String, f64>) {
        for row in &mut self.rows {
            if let Some(v) = priors.get(&row.test_id) {
                row.prior_value_si = Some(*v);
            }
        }
    }

    /// Clear dirty on all rows without altering values.
    pub fn mark_all_saved(&mut self) {
        let count = self.rows.iter().filter(|r| r.dirty).count();
        for row in &mut self.rows {
            row.dirty = false;
        }
        tracing::debug!(rows = count, "Ledger marked saved");
    }

    // ── Projections ─────────────────────────────────────────

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn row(&self, row_id: Uuid) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn row_by_test(&self, test_id: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.test_id == test_id)
    }

    /// Rows filtered to a panel in catalog order, or all rows in
    /// insertion order when `panel_id` is `None`.
    pub fn rows_by_panel(&self, panel_id: Option<&str>) -> Result<Vec<&ResultRow>, CatalogError> {
        match panel_id {
            None => Ok(self.rows.iter().collect()),
            Some(pid) => {
                let members = self.catalog.tests_by_panel(pid)?;
                Ok(members
                    .iter()
                    .filter_map(|def| self.row_by_test(&def.id))
                    .collect())
            }
        }
    }

    /// Number of rows belonging to a panel.
    pub fn panel_row_count(&self, panel_id: &str) -> Result<usize, CatalogError> {
        Ok(self.rows_by_panel(Some(panel_id))?.len())
    }

    pub fn has_critical_values(&self) -> bool {
        self.rows.iter().any(|r| r.flag == ResultFlag::Critical)
    }

    pub fn dirty_rows(&self) -> Vec<&ResultRow> {
        self.rows.iter().filter(|r| r.dirty).collect()
    }

    /// The row's value re-expressed in its display unit, formatted.
    pub fn display_value(&self, row_id: Uuid) -> Result<Option<String>, LedgerError> {
        let row = self.row(row_id).ok_or(LedgerError::RowNotFound(row_id))?;
        let Some(value) = row.value_si else {
            return Ok(None);
        };
        let def = self.catalog.lookup(&row.test_id)?;
        let shown = interpret::from_canonical(value, &row.display_unit, def)?;
        Ok(Some(interpret::parse::format_value(shown)))
    }

    /// The patient's reference interval re-expressed in the row's display
    /// unit, as shown next to the entry field.
    pub fn reference_range_text(&self, row_id: Uuid) -> Result<String, LedgerError> {
        let row = self.row(row_id).ok_or(LedgerError::RowNotFound(row_id))?;
        let def = self.catalog.lookup(&row.test_id)?;
        let range = self
            .catalog
            .reference_range(&row.test_id, self.ctx.age_years, &self.ctx.sex)?;

        let low = range
            .low
            .map(|v| interpret::from_canonical(v, &row.display_unit, def))
            .transpose()?;
        let high = range
            .high
            .map(|v| interpret::from_canonical(v, &row.display_unit, def))
            .transpose()?;

        Ok(crate::catalog::ReferenceRange { low, high }.display(&row.display_unit))
    }

    pub fn trend(&self, row_id: Uuid) -> Option<Trend> {
        self.row(row_id)?.trend(FLOAT_TOLERANCE)
    }

    fn index_of(&self, row_id: Uuid) -> Result<usize, LedgerError> {
        self.rows
            .iter()
            .position(|r| r.id == row_id)
            .ok_or(LedgerError::RowNotFound(row_id))
    }
}
