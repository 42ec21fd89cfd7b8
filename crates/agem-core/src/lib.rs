//! Core building blocks for agricultural greenhouse-gas emission models.
//!
//! This crate provides the calibratable-model core shared by the AGEM tools:
//!
//! - `dataset`: a cell-oriented container of named, typed value arrays
//! - `parameter`: the [`Calibratable`](parameter::Calibratable) contract with
//!   random perturbation and LIFO rollback
//! - `fuzzy`: a Mamdani-style fuzzy inference system with triangular
//!   membership functions and weighted-average defuzzification
//! - `weighting`: per-category multiplicative modifiers applied downstream
//!   of another model
//! - `pipeline`: the [`Model`](pipeline::Model) trait and the linear
//!   [`MetaModel`](pipeline::MetaModel) chain driven by the calibrator
//! - `metrics`: dataset comparison used as the calibration error
//! - `xml`: persistence of parameter objects as XML documents
//!
//! The simulated-annealing calibrator itself lives in `agem-calibrate`; the
//! RothC soil-carbon model and its equilibrium driver live in `agem-rothc`.

pub mod dataset;
pub mod errors;
pub mod fuzzy;
pub mod metrics;
pub mod parameter;
pub mod pipeline;
pub mod weighting;
pub mod xml;

pub use dataset::{DataArray, DataSet, TemporalDataSet};
pub use errors::{AgemError, AgemResult};
pub use parameter::Calibratable;

/// Default sentinel marking a missing value in datasets and model output.
pub const DEFAULT_NULL_VALUE: f64 = -999999.0;
