//! Immutable test reference dataset.
//!
//! Loaded once per session from a bundled JSON file and shared by
//! reference (`Arc`) into every component that needs lookups. Never
//! mutated after construction.

pub mod formula;
pub mod types;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use formula::Expr;
pub use types::{
    CatalogError, CriticalRange, Panel, ReferenceBand, ReferenceRange, TestDefinition, UnitFactor,
};

use crate::models::enums::Sex;

/// On-disk shape of the catalog dataset.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    tests: Vec<TestDefinition>,
    panels: Vec<Panel>,
}

/// Loaded reference data for result interpretation.
pub struct TestCatalog {
    tests: Vec<TestDefinition>,
    panels: Vec<Panel>,
}

impl TestCatalog {
    /// Load the catalog from a JSON dataset file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Load(path.display().to_string(), e.to_string()))?;
        let file: CatalogFile =
            serde_json::from_str(&json).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let catalog = Self::from_parts(file.tests, file.panels)?;
        tracing::info!(
            tests = catalog.tests.len(),
            panels = catalog.panels.len(),
            "Test catalog loaded"
        );
        Ok(catalog)
    }

    /// Build a catalog from already-parsed parts, validating cross-references.
    pub fn from_parts(tests: Vec<TestDefinition>, panels: Vec<Panel>) -> Result<Self, CatalogError> {
        let catalog = Self { tests, panels };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for test in &self.tests {
            if test.canonical_unit.is_empty() {
                return Err(CatalogError::Inconsistent(format!(
                    "test {} has no canonical unit",
                    test.id
                )));
            }
            for factor in &test.alternate_units {
                if !factor.to_canonical.is_finite() || factor.to_canonical == 0.0 {
                    return Err(CatalogError::Inconsistent(format!(
                        "test {} unit {} has unusable factor {}",
                        test.id, factor.unit, factor.to_canonical
                    )));
                }
            }
            if let Some(expr) = &test.derived {
                for input in expr.required_tests() {
                    if self.find_test(&input).is_none() {
                        return Err(CatalogError::Inconsistent(format!(
                            "derived test {} references unknown input {}",
                            test.id, input
                        )));
                    }
                }
            }
        }
        for panel in &self.panels {
            for member in &panel.test_ids {
                if self.find_test(member).is_none() {
                    return Err(CatalogError::Inconsistent(format!(
                        "panel {} references unknown test {}",
                        panel.id, member
                    )));
                }
            }
        }
        Ok(())
    }

    fn find_test(&self, test_id: &str) -> Option<&TestDefinition> {
        self.tests.iter().find(|t| t.id == test_id)
    }

    /// Look up a test definition by id.
    pub fn lookup(&self, test_id: &str) -> Result<&TestDefinition, CatalogError> {
        self.find_test(test_id)
            .ok_or_else(|| CatalogError::TestNotFound(test_id.to_string()))
    }

    /// Member tests of a panel, in catalog-defined order.
    pub fn tests_by_panel(&self, panel_id: &str) -> Result<Vec<&TestDefinition>, CatalogError> {
        let panel = self
            .panels
            .iter()
            .find(|p| p.id == panel_id)
            .ok_or_else(|| CatalogError::PanelNotFound(panel_id.to_string()))?;

        panel.test_ids.iter().map(|id| self.lookup(id)).collect()
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn tests(&self) -> &[TestDefinition] {
        &self.tests
    }

    /// Definitions that carry a derived-value formula.
    pub fn derived_tests(&self) -> impl Iterator<Item = &TestDefinition> {
        self.tests.iter().filter(|t| t.is_derived())
    }

    /// Reference interval for a test under the given demographics.
    ///
    /// Selects the narrowest matching band: smallest age window wins, a
    /// sex-specific band beats a sex-neutral one of the same width. When
    /// no band matches, the range is open so flagging degrades to
    /// `Unknown` rather than `Normal`.
    pub fn reference_range(
        &self,
        test_id: &str,
        age: u32,
        sex: &Sex,
    ) -> Result<ReferenceRange, CatalogError> {
        let test = self.lookup(test_id)?;

        let best = test
            .reference_bands
            .iter()
            .filter(|b| b.matches(age, sex))
            .min_by_key(|b| (b.age_span(), b.sex.is_none()));

        Ok(match best {
            Some(band) => ReferenceRange {
                low: band.low,
                high: band.high,
            },
            None => {
                tracing::debug!(test_id, age, sex = sex.as_str(), "No reference band matches");
                ReferenceRange::unknown()
            }
        })
    }

    /// Critical thresholds for a test. Empty when none are defined.
    pub fn critical_ranges(&self, test_id: &str) -> Result<&[CriticalRange], CatalogError> {
        Ok(&self.lookup(test_id)?.critical_ranges)
    }

    /// Create catalog data for tests (no file I/O).
    ///
    /// A compact but realistic dataset: a basic metabolic panel with two
    /// derived tests, a CBC subset with sex-specific bands, and a cardiac
    /// marker with a one-sided critical threshold.
    pub fn load_test() -> Self {
        let mdrd_egfr = Expr::Mul {
            args: vec![
                Expr::constant(186.0),
                Expr::Pow {
                    base: Box::new(Expr::test("creatinine")),
                    exp: -1.154,
                },
                Expr::Pow {
                    base: Box::new(Expr::Age),
                    exp: -0.203,
                },
                Expr::SexFactor {
                    female: 0.742,
                    male: 1.0,
                },
            ],
        };
        let anion_gap = Expr::Sub {
            left: Box::new(Expr::Sub {
                left: Box::new(Expr::test("sodium")),
                right: Box::new(Expr::test("chloride")),
            }),
            right: Box::new(Expr::test("co2")),
        };

        let tests = vec![
            TestDefinition {
                id: "sodium".into(),
                name: "Sodium".into(),
                code: Some("2951-2".into()),
                synonyms: vec!["Na".into()],
                panel_id: Some("bmp".into()),
                canonical_unit: "mmol/L".into(),
                alternate_units: vec![],
                reference_bands: vec![band(None, None, None, Some(135.0), Some(145.0))],
                critical_ranges: vec![CriticalRange {
                    low: Some(120.0),
                    high: Some(160.0),
                }],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "potassium".into(),
                name: "Potassium".into(),
                code: Some("2823-3".into()),
                synonyms: vec!["K".into()],
                panel_id: Some("bmp".into()),
                canonical_unit: "mmol/L".into(),
                // 1 mg/dL of K+ = 0.2558 mmol/L
                alternate_units: vec![UnitFactor {
                    unit: "mg/dL".into(),
                    to_canonical: 0.2558,
                }],
                reference_bands: vec![band(None, None, None, Some(3.5), Some(5.0))],
                critical_ranges: vec![CriticalRange {
                    low: Some(2.5),
                    high: Some(6.2),
                }],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "chloride".into(),
                name: "Chloride".into(),
                code: Some("2075-0".into()),
                synonyms: vec!["Cl".into()],
                panel_id: Some("bmp".into()),
                canonical_unit: "mmol/L".into(),
                alternate_units: vec![],
                reference_bands: vec![band(None, None, None, Some(98.0), Some(107.0))],
                critical_ranges: vec![],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "co2".into(),
                name: "Carbon Dioxide".into(),
                code: Some("2028-9".into()),
                synonyms: vec!["Bicarbonate".into(), "HCO3".into()],
                panel_id: Some("bmp".into()),
                canonical_unit: "mmol/L".into(),
                alternate_units: vec![],
                reference_bands: vec![band(None, None, None, Some(22.0), Some(29.0))],
                critical_ranges: vec![],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "creatinine".into(),
                name: "Creatinine".into(),
                code: Some("2160-0".into()),
                synonyms: vec!["SCr".into()],
                panel_id: Some("bmp".into()),
                canonical_unit: "mg/dL".into(),
                // 1 umol/L = 1/88.42 mg/dL
                alternate_units: vec![UnitFactor {
                    unit: "umol/L".into(),
                    to_canonical: 0.011312,
                }],
                reference_bands: vec![
                    band(Some(0), Some(12), None, Some(0.3), Some(0.7)),
                    band(Some(13), None, Some(Sex::Female), Some(0.6), Some(1.1)),
                    band(Some(13), None, Some(Sex::Male), Some(0.7), Some(1.3)),
                ],
                critical_ranges: vec![CriticalRange {
                    low: None,
                    high: Some(7.0),
                }],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "glucose".into(),
                name: "Glucose".into(),
                code: Some("2345-7".into()),
                synonyms: vec![],
                panel_id: Some("bmp".into()),
                canonical_unit: "mg/dL".into(),
                // 1 mmol/L = 18.016 mg/dL
                alternate_units: vec![UnitFactor {
                    unit: "mmol/L".into(),
                    to_canonical: 18.016,
                }],
                reference_bands: vec![band(None, None, None, Some(70.0), Some(99.0))],
                critical_ranges: vec![CriticalRange {
                    low: Some(40.0),
                    high: Some(500.0),
                }],
                derived: None,
                notes: Some("Fasting reference interval.".into()),
            },
            TestDefinition {
                id: "egfr".into(),
                name: "eGFR".into(),
                code: Some("33914-3".into()),
                synonyms: vec!["Estimated GFR".into()],
                panel_id: Some("bmp".into()),
                canonical_unit: "mL/min/1.73m2".into(),
                alternate_units: vec![],
                reference_bands: vec![band(None, None, None, Some(60.0), None)],
                critical_ranges: vec![],
                derived: Some(mdrd_egfr),
                notes: Some("MDRD estimate from serum creatinine.".into()),
            },
            TestDefinition {
                id: "anion_gap".into(),
                name: "Anion Gap".into(),
                code: Some("33037-3".into()),
                synonyms: vec![],
                panel_id: Some("bmp".into()),
                canonical_unit: "mmol/L".into(),
                alternate_units: vec![],
                reference_bands: vec![band(None, None, None, Some(8.0), Some(16.0))],
                critical_ranges: vec![],
                derived: Some(anion_gap),
                notes: None,
            },
            TestDefinition {
                id: "hemoglobin".into(),
                name: "Hemoglobin".into(),
                code: Some("718-7".into()),
                synonyms: vec!["Hgb".into()],
                panel_id: Some("cbc".into()),
                canonical_unit: "g/dL".into(),
                alternate_units: vec![UnitFactor {
                    unit: "g/L".into(),
                    to_canonical: 0.1,
                }],
                reference_bands: vec![
                    band(None, None, Some(Sex::Female), Some(12.0), Some(15.5)),
                    band(None, None, Some(Sex::Male), Some(13.5), Some(17.5)),
                ],
                critical_ranges: vec![CriticalRange {
                    low: Some(7.0),
                    high: Some(20.0),
                }],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "wbc".into(),
                name: "White Blood Cell Count".into(),
                code: Some("6690-2".into()),
                synonyms: vec!["WBC".into(), "Leukocytes".into()],
                panel_id: Some("cbc".into()),
                canonical_unit: "10^9/L".into(),
                alternate_units: vec![],
                reference_bands: vec![band(None, None, None, Some(4.5), Some(11.0))],
                critical_ranges: vec![CriticalRange {
                    low: Some(1.0),
                    high: Some(30.0),
                }],
                derived: None,
                notes: None,
            },
            TestDefinition {
                id: "troponin_i".into(),
                name: "Troponin I".into(),
                code: Some("10839-9".into()),
                synonyms: vec!["cTnI".into()],
                panel_id: Some("cardiac".into()),
                canonical_unit: "ng/mL".into(),
                alternate_units: vec![UnitFactor {
                    unit: "ng/L".into(),
                    to_canonical: 0.001,
                }],
                reference_bands: vec![band(None, None, None, None, Some(0.04))],
                critical_ranges: vec![CriticalRange {
                    low: None,
                    high: Some(0.4),
                }],
                derived: None,
                notes: None,
            },
        ];

        let panels = vec![
            Panel {
                id: "bmp".into(),
                label: "Basic Metabolic Panel".into(),
                test_ids: vec![
                    "sodium".into(),
                    "potassium".into(),
                    "chloride".into(),
                    "co2".into(),
                    "creatinine".into(),
                    "glucose".into(),
                    "egfr".into(),
                    "anion_gap".into(),
                ],
            },
            Panel {
                id: "cbc".into(),
                label: "Complete Blood Count".into(),
                test_ids: vec!["hemoglobin".into(), "wbc".into()],
            },
            Panel {
                id: "cardiac".into(),
                label: "Cardiac Markers".into(),
                test_ids: vec!["troponin_i".into()],
            },
        ];

        Self::from_parts(tests, panels).expect("built-in test catalog is consistent")
    }
}

fn band(
    age_min: Option<u32>,
    age_max: Option<u32>,
    sex: Option<Sex>,
    low: Option<f64>,
    high: Option<f64>,
) -> ReferenceBand {
    ReferenceBand {
        age_min,
        age_max,
        sex,
        low,
        high,
    }
}
