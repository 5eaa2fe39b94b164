//! Flag & conversion engine.
//!
//! Pure computation over the catalog: unit conversion, flag
//! classification, derived-value recomputation, numeric parsing. No
//! state, no I/O; everything here is a function of its arguments.

pub mod convert;
pub mod derived;
pub mod flag;
pub mod parse;

use thiserror::Error;

pub use convert::{convert, from_canonical, to_canonical};
pub use derived::recalculate_derived;
pub use flag::compute_flag;
pub use parse::parse_value;

#[derive(Debug, Clone, Error)]
pub enum InterpretError {
    #[error("No conversion registered for test {test_id} and unit {unit}")]
    UnitMismatch { test_id: String, unit: String },
}
