//! RothC soil organic carbon turnover and its equilibrium driver.
//!
//! The model follows RothC-26.3: four active carbon pools (DPM, RPM, BIO,
//! HUM) plus inert organic matter, decomposed monthly under temperature,
//! moisture and soil cover rate modifiers. The crate provides:
//!
//! - `parameters`: the calibratable [`RothCParameters`] object
//! - `model`: monthly pool dynamics over cell-oriented climate datasets
//! - `brent`: a bracketed root finder driven through an inverted control
//!   flow, so the caller owns the objective evaluation
//! - `equilibrium`: a per-cell search for the annual plant input that
//!   reproduces a target soil organic carbon at steady state
//! - `xml`: persistence of the parameter object as an XML document

pub mod brent;
pub mod equilibrium;
pub mod model;
pub mod parameters;
pub mod xml;

pub use brent::BrentSolver;
pub use equilibrium::{run_equilibrium, EquilibriumOptions, EquilibriumResult};
pub use model::{Pools, RothCModel};
pub use parameters::{RothCParameters, ScalarParameter, SplitFractions};
pub use xml::{read_rothc, write_rothc};
