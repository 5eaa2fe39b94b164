//! Derived-test formulas as data.
//!
//! A derived test (eGFR, anion gap, calculated LDL) is computed from
//! sibling results rather than entered directly. Formulas live in the
//! catalog dataset, so they are expressed as a small serde-tagged
//! expression tree instead of code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::enums::Sex;
use crate::models::PatientContext;

/// Arithmetic expression over sibling test values and patient demographics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Const { value: f64 },
    /// Canonical-unit value of a sibling test in the same order.
    Test { test_id: String },
    /// Patient age in years.
    Age,
    /// Sex-dependent multiplier.
    SexFactor { female: f64, male: f64 },
    Add { args: Vec<Expr> },
    Sub { left: Box<Expr>, right: Box<Expr> },
    Mul { args: Vec<Expr> },
    Div { num: Box<Expr>, den: Box<Expr> },
    Pow { base: Box<Expr>, exp: f64 },
}

impl Expr {
    /// Evaluate against the sibling values gathered from the order.
    ///
    /// Returns `None` when any required input is missing or the result is
    /// not a finite number (division by zero, negative base powers).
    pub fn eval(&self, ctx: &PatientContext, values: &HashMap<String, f64>) -> Option<f64> {
        let result = match self {
            Self::Const { value } => *value,
            Self::Test { test_id } => *values.get(test_id)?,
            Self::Age => ctx.age_years as f64,
            Self::SexFactor { female, male } => match ctx.sex {
                Sex::Female => *female,
                Sex::Male => *male,
            },
            Self::Add { args } => {
                let mut sum = 0.0;
                for arg in args {
                    sum += arg.eval(ctx, values)?;
                }
                sum
            }
            Self::Sub { left, right } => left.eval(ctx, values)? - right.eval(ctx, values)?,
            Self::Mul { args } => {
                let mut product = 1.0;
                for arg in args {
                    product *= arg.eval(ctx, values)?;
                }
                product
            }
            Self::Div { num, den } => {
                let den = den.eval(ctx, values)?;
                if den == 0.0 {
                    return None;
                }
                num.eval(ctx, values)? / den
            }
            Self::Pow { base, exp } => base.eval(ctx, values)?.powf(*exp),
        };

        result.is_finite().then_some(result)
    }

    /// Sibling test ids this formula reads. Duplicates removed.
    pub fn required_tests(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_tests(&mut ids);
        ids.dedup();
        ids
    }

    fn collect_tests(&self, out: &mut Vec<String>) {
        match self {
            Self::Test { test_id } => {
                if !out.contains(test_id) {
                    out.push(test_id.clone());
                }
            }
            Self::Add { args } | Self::Mul { args } => {
                for arg in args {
                    arg.collect_tests(out);
                }
            }
            Self::Sub { left, right } => {
                left.collect_tests(out);
                right.collect_tests(out);
            }
            Self::Div { num, den } => {
                num.collect_tests(out);
                den.collect_tests(out);
            }
            Self::Pow { base, .. } => base.collect_tests(out),
            Self::Const { .. } | Self::Age | Self::SexFactor { .. } => {}
        }
    }
}

/// Shorthand constructors used by the built-in test catalog.
impl Expr {
    pub fn test(id: &str) -> Self {
        Self::Test {
            test_id: id.to_string(),
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::Const { value }
    }
}
