//! Mamdani-style fuzzy inference.
//!
//! The [`scheme`] module holds the calibratable parameter object (factors,
//! triangular fuzzy sets, rule responses); the [`evaluator`] module applies a
//! scheme to a dataset cell by cell.

pub mod evaluator;
pub mod scheme;

pub use evaluator::{FuzzyModel, FuzzyModelOptions};
pub use scheme::{Factor, FuzzyInferenceScheme, FuzzySet, Response, SetPosition, INFINITE_WIDTH};
