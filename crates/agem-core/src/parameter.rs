//! The calibratable-parameter contract.
//!
//! Every parameter object (fuzzy inference scheme, weighting scheme, RothC
//! parameters) exposes its non-constant scalars through a flat index space so
//! that the calibrator can mutate them without knowing their structure. A
//! LIFO rollback stack records modifications; the calibrator undoes a
//! rejected move with [`Calibratable::restore_last_modified`].

use rand::distributions::Distribution;
use rand::{Rng, RngCore};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// One undo record: which calibratable scalar changed and its prior value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub index: usize,
    pub previous: f64,
}

/// A bounded LIFO stack of rollback records.
///
/// In practice a single record is outstanding at a time because the
/// calibrator always evaluates before the next mutation, but a bounded stack
/// is kept for multi-step proposals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStack {
    records: Vec<RollbackRecord>,
    capacity: usize,
}

impl Default for RollbackStack {
    fn default() -> Self {
        Self::with_capacity(16)
    }
}

impl RollbackStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
        }
    }

    /// Push a record, dropping the oldest one when the stack is full.
    pub fn push(&mut self, index: usize, previous: f64) {
        if self.records.len() == self.capacity {
            self.records.remove(0);
        }
        self.records.push(RollbackRecord { index, previous });
    }

    pub fn pop(&mut self) -> Option<RollbackRecord> {
        self.records.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// A parameter object whose scalars can be searched by the calibrator.
///
/// Implementors expose the number of calibratable scalars (those with
/// `const = false`), their values and bounds, and support clamped
/// modification with rollback. Structural invariants (e.g. fuzzy-set
/// ordering) are enforced inside [`modify_parameter`](Self::modify_parameter):
/// a violating proposal returns `false` and pushes no rollback record.
pub trait Calibratable {
    /// Count of scalar values available for calibration.
    fn num_calibratable(&self) -> usize;

    /// Current value of the i-th calibratable scalar.
    fn parameter_value(&self, index: usize) -> f64;

    /// Lower bound of the i-th calibratable scalar.
    fn parameter_min(&self, index: usize) -> f64;

    /// Upper bound of the i-th calibratable scalar.
    fn parameter_max(&self, index: usize) -> f64;

    /// Set the i-th calibratable scalar, clamping to its bounds.
    ///
    /// Returns `false` (and records nothing) when the proposal violates a
    /// structural invariant of the parameter object.
    fn modify_parameter(&mut self, index: usize, value: f64) -> bool;

    /// Undo the most recent successful modification.
    ///
    /// Returns `false` when no modification is outstanding.
    fn restore_last_modified(&mut self) -> bool;

    /// Perturb one randomly chosen calibratable scalar.
    ///
    /// The scalar is picked uniformly; the perturbation is drawn from
    /// `Normal(0, sigma)` scaled to the scalar's range. Returns `false` if
    /// no calibratable scalars exist or the proposal was rejected.
    fn modify_parameter_randomly(&mut self, sigma: f64, rng: &mut dyn RngCore) -> bool {
        let n = self.num_calibratable();
        if n == 0 {
            return false;
        }
        let index = rng.gen_range(0..n);
        let range = self.parameter_max(index) - self.parameter_min(index);
        let normal = match Normal::new(0.0, sigma) {
            Ok(normal) => normal,
            Err(_) => return false,
        };
        let delta = normal.sample(rng) * range;
        self.modify_parameter(index, self.parameter_value(index) + delta)
    }
}

/// Clamp a proposed scalar value to `[min, max]`.
pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}
