use serde::{Deserialize, Serialize};

use super::enums::Sex;

/// Demographic context for an order. Immutable input to every
/// reference-range lookup for the order's duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientContext {
    pub age_years: u32,
    pub sex: Sex,
}

impl PatientContext {
    pub fn new(age_years: u32, sex: Sex) -> Self {
        Self { age_years, sex }
    }
}
