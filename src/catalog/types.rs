use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::formula::Expr;
use crate::models::enums::Sex;

/// Conversion factor for an alternate unit: multiply a value expressed in
/// `unit` by `to_canonical` to get the canonical-unit value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFactor {
    pub unit: String,
    pub to_canonical: f64,
}

/// A demographic band for a reference interval. `None` bounds are open;
/// a band with no demographic constraints is the general fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceBand {
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    pub sex: Option<Sex>,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl ReferenceBand {
    pub fn matches(&self, age: u32, sex: &Sex) -> bool {
        if let Some(min) = self.age_min {
            if age < min {
                return false;
            }
        }
        if let Some(max) = self.age_max {
            if age > max {
                return false;
            }
        }
        match &self.sex {
            Some(s) => s == sex,
            None => true,
        }
    }

    /// Width of the age window, for narrowest-band selection.
    pub fn age_span(&self) -> u32 {
        self.age_max.unwrap_or(u32::MAX) - self.age_min.unwrap_or(0)
    }
}

/// Resolved reference interval for one patient. Both bounds absent means
/// the catalog has no applicable band; flagging degrades to `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl ReferenceRange {
    pub fn unknown() -> Self {
        Self {
            low: None,
            high: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }

    /// Human-readable interval in the given unit, e.g. "3.5-5.0 mmol/L".
    pub fn display(&self, unit: &str) -> String {
        match (self.low, self.high) {
            (Some(low), Some(high)) => format!("{low}-{high} {unit}"),
            (Some(low), None) => format!(">= {low} {unit}"),
            (None, Some(high)) => format!("<= {high} {unit}"),
            (None, None) => "no reference".to_string(),
        }
    }
}

/// A life-threatening threshold. Either bound may be absent for a
/// one-sided threshold; meeting a bound (inclusive) classifies the value
/// as critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl CriticalRange {
    pub fn contains(&self, value: f64) -> bool {
        if let Some(low) = self.low {
            if value <= low {
                return true;
            }
        }
        if let Some(high) = self.high {
            if value >= high {
                return true;
            }
        }
        false
    }
}

/// Immutable definition of one diagnostic test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    pub name: String,
    /// LOINC-style code, when the dataset carries one.
    pub code: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub panel_id: Option<String>,
    /// Canonical (SI) unit all stored values are kept in.
    pub canonical_unit: String,
    #[serde(default)]
    pub alternate_units: Vec<UnitFactor>,
    #[serde(default)]
    pub reference_bands: Vec<ReferenceBand>,
    #[serde(default)]
    pub critical_ranges: Vec<CriticalRange>,
    /// Present for derived tests computed from sibling results.
    pub derived: Option<Expr>,
    pub notes: Option<String>,
}

impl TestDefinition {
    pub fn is_derived(&self) -> bool {
        self.derived.is_some()
    }

    /// True when `unit` is the canonical unit or a registered alternate.
    pub fn has_unit(&self, unit: &str) -> bool {
        self.canonical_unit == unit || self.alternate_units.iter().any(|u| u.unit == unit)
    }
}

/// An ordered grouping of tests as displayed by the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    pub id: String,
    pub label: String,
    pub test_ids: Vec<String>,
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Test not found in catalog: {0}")]
    TestNotFound(String),

    #[error("Panel not found in catalog: {0}")]
    PanelNotFound(String),

    #[error("Catalog load failed ({0}): {1}")]
    Load(String, String),

    #[error("Catalog parse failed: {0}")]
    Parse(String),

    #[error("Catalog inconsistent: {0}")]
    Inconsistent(String),
}
