//! Parameter search for AGEM model pipelines.
//!
//! The central entry point is [`SimulatedAnnealing`], a temperature and
//! step-width scheduled random search over the calibratable scalars of a
//! [`MetaModel`](agem_core::pipeline::MetaModel). It retains the best fit
//! seen (XML parameter snapshot plus output dataset) rather than the final
//! state, and weights the raw comparison error with an AIC/BIC-style
//! complexity penalty from the [`assessment`] module.
//!
//! [`selection`] adds an optional outer loop: sequential forward selection
//! over a pool of candidate input factors, calibrating each candidate
//! configuration from scratch and keeping additions while the BIC-weighted
//! score improves.

pub mod annealer;
pub mod assessment;
pub mod selection;

pub use annealer::{AnnealingConfig, CalibrationResult, SimulatedAnnealing};
pub use assessment::Assessment;
pub use selection::{select, FactorCandidate, SelectionConfig, SelectionResult};
