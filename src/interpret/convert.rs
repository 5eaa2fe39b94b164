//! Unit conversion against a test's registered factors.

use crate::catalog::TestDefinition;

use super::InterpretError;

fn factor_to_canonical(def: &TestDefinition, unit: &str) -> Result<f64, InterpretError> {
    if unit == def.canonical_unit {
        return Ok(1.0);
    }
    def.alternate_units
        .iter()
        .find(|u| u.unit == unit)
        .map(|u| u.to_canonical)
        .ok_or_else(|| InterpretError::UnitMismatch {
            test_id: def.id.clone(),
            unit: unit.to_string(),
        })
}

/// Convert `value` between any two units registered for a test.
pub fn convert(
    value: f64,
    from_unit: &str,
    to_unit: &str,
    def: &TestDefinition,
) -> Result<f64, InterpretError> {
    let canonical = value * factor_to_canonical(def, from_unit)?;
    Ok(canonical / factor_to_canonical(def, to_unit)?)
}

/// Express a value entered in `unit` in the test's canonical unit.
pub fn to_canonical(value: f64, unit: &str, def: &TestDefinition) -> Result<f64, InterpretError> {
    convert(value, unit, &def.canonical_unit, def)
}

/// Re-express a canonical value in a display unit.
pub fn from_canonical(value: f64, unit: &str, def: &TestDefinition) -> Result<f64, InterpretError> {
    convert(value, &def.canonical_unit, unit, def)
}
