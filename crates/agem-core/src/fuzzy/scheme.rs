//! The fuzzy inference scheme parameter object.
//!
//! A scheme consists of ordered factors, each covering `[min, max]` with an
//! ordered list of triangular fuzzy sets, and one response per rule. The set
//! of rules is the Cartesian product of fuzzy-set indices across factors,
//! enumerated row-major with the last factor varying fastest.

use crate::errors::{AgemError, AgemResult};
use crate::parameter::{clamp, Calibratable, RollbackStack};
use serde::{Deserialize, Serialize};

/// Any side width at or above this value is treated as infinite.
///
/// Historical parameter files use 9999 or 222222 as the sentinel; both are
/// accepted.
pub const INFINITE_WIDTH: f64 = 1e3;

/// Placement of a fuzzy set within its factor.
///
/// The outermost sets saturate outward: a `Left` set has membership 1 for
/// any input at or below its center, a `Right` set for any input at or above
/// its center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetPosition {
    Left,
    Intermediate,
    Right,
}

/// A triangular membership shape over one factor.
///
/// Membership is 1 at the center and falls off linearly on each side,
/// reaching 0.5 at the side width and 0 at twice the side width. With side
/// widths equal to half the center spacing, adjacent sets form an exact
/// partition of unity between their centers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FuzzySet {
    pub center: f64,
    pub left_width: f64,
    pub right_width: f64,
    pub position: SetPosition,
    /// Tie-break ordering carried through from the parameter document.
    pub priority: u32,
    /// Fixed under calibration.
    pub constant: bool,
}

impl FuzzySet {
    pub fn new(center: f64, left_width: f64, right_width: f64, position: SetPosition) -> Self {
        Self {
            center,
            left_width,
            right_width,
            position,
            priority: 0,
            constant: false,
        }
    }

    /// Whether the left slope is treated as infinite.
    pub fn left_is_infinite(&self) -> bool {
        self.position == SetPosition::Left || self.left_width >= INFINITE_WIDTH
    }

    /// Whether the right slope is treated as infinite.
    pub fn right_is_infinite(&self) -> bool {
        self.position == SetPosition::Right || self.right_width >= INFINITE_WIDTH
    }

    /// Membership of `x` in this set, in `[0, 1]`.
    pub fn membership(&self, x: f64) -> f64 {
        let d = x - self.center;
        if d < 0.0 {
            if self.left_is_infinite() {
                1.0
            } else if self.left_width <= 0.0 {
                0.0
            } else {
                (1.0 + d / (2.0 * self.left_width)).max(0.0)
            }
        } else if d > 0.0 {
            if self.right_is_infinite() {
                1.0
            } else if self.right_width <= 0.0 {
                0.0
            } else {
                (1.0 - d / (2.0 * self.right_width)).max(0.0)
            }
        } else {
            1.0
        }
    }
}

/// A named input axis covering `[min, max]` with ordered fuzzy sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    /// Input port index in the parameter document.
    pub port_id: u32,
    pub min: f64,
    pub max: f64,
    pub sets: Vec<FuzzySet>,
}

impl Factor {
    pub fn new(name: impl Into<String>, min: f64, max: f64, sets: Vec<FuzzySet>) -> Self {
        Self {
            name: name.into(),
            port_id: 0,
            min,
            max,
            sets,
        }
    }

    /// Build a factor with `num_sets` evenly spaced sets over `[min, max]`.
    ///
    /// Centers are spaced `(max - min) / (num_sets - 1)` apart; finite side
    /// widths are half the spacing, so the sets partition unity between the
    /// outer centers.
    pub fn with_uniform_sets(
        name: impl Into<String>,
        min: f64,
        max: f64,
        num_sets: usize,
    ) -> AgemResult<Self> {
        if num_sets < 2 {
            return Err(AgemError::Invariant(format!(
                "a factor needs at least 2 fuzzy sets, got {}",
                num_sets
            )));
        }
        if max <= min {
            return Err(AgemError::Invariant(format!(
                "factor range [{}, {}] is empty",
                min, max
            )));
        }

        let spacing = (max - min) / (num_sets - 1) as f64;
        let width = spacing / 2.0;
        let mut sets = Vec::with_capacity(num_sets);
        for k in 0..num_sets {
            let position = if k == 0 {
                SetPosition::Left
            } else if k == num_sets - 1 {
                SetPosition::Right
            } else {
                SetPosition::Intermediate
            };
            let left = if k == 0 { INFINITE_WIDTH * 10.0 } else { width };
            let right = if k == num_sets - 1 {
                INFINITE_WIDTH * 10.0
            } else {
                width
            };
            sets.push(FuzzySet::new(min + k as f64 * spacing, left, right, position));
        }
        Ok(Self::new(name, min, max, sets))
    }

    /// Check set ordering and shape constraints.
    pub fn validate(&self) -> AgemResult<()> {
        if self.sets.len() < 2 {
            return Err(AgemError::Invariant(format!(
                "factor '{}' has {} fuzzy sets, at least 2 required",
                self.name,
                self.sets.len()
            )));
        }
        for (k, set) in self.sets.iter().enumerate() {
            let expected = if k == 0 {
                SetPosition::Left
            } else if k == self.sets.len() - 1 {
                SetPosition::Right
            } else {
                SetPosition::Intermediate
            };
            if set.position != expected {
                return Err(AgemError::Invariant(format!(
                    "factor '{}': fuzzy set {} has position {:?}, expected {:?}",
                    self.name, k, set.position, expected
                )));
            }
            if set.center < self.min || set.center > self.max {
                return Err(AgemError::Invariant(format!(
                    "factor '{}': fuzzy set {} center {} outside [{}, {}]",
                    self.name, k, set.center, self.min, self.max
                )));
            }
            if k > 0 && set.center < self.sets[k - 1].center {
                return Err(AgemError::Invariant(format!(
                    "factor '{}': fuzzy set centers not ordered at index {}",
                    self.name, k
                )));
            }
            if set.left_width < 0.0 || set.right_width < 0.0 {
                return Err(AgemError::Invariant(format!(
                    "factor '{}': fuzzy set {} has a negative width",
                    self.name, k
                )));
            }
        }
        Ok(())
    }
}

/// The scalar consequent attached to one rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Response {
    pub value: f64,
    /// Per-rule observation standard deviation, used for the sigma output.
    pub sd: f64,
    /// Fixed under calibration.
    pub constant: bool,
}

impl Response {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            sd: 0.0,
            constant: false,
        }
    }
}

/// Locates one calibratable scalar inside the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarRef {
    Center { factor: usize, set: usize },
    LeftWidth { factor: usize, set: usize },
    RightWidth { factor: usize, set: usize },
    Response(usize),
}

/// A complete fuzzy inference scheme: factors, sets and rule responses.
///
/// Fuzzy-set shape scalars enumerate before response values in the
/// calibratable index space; within a set the order is center, left width,
/// right width, with constant sets and the infinite sides of outer sets
/// skipped. This keeps the index-to-scalar mapping stable across mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyInferenceScheme {
    pub name: String,
    pub factors: Vec<Factor>,
    pub responses: Vec<Response>,
    pub response_min: f64,
    pub response_max: f64,
    #[serde(skip)]
    rollback: RollbackStack,
}

impl FuzzyInferenceScheme {
    pub fn new(
        name: impl Into<String>,
        factors: Vec<Factor>,
        responses: Vec<Response>,
        response_min: f64,
        response_max: f64,
    ) -> Self {
        Self {
            name: name.into(),
            factors,
            responses,
            response_min,
            response_max,
            rollback: RollbackStack::default(),
        }
    }

    /// Build a scheme with uniform partitions per factor and all responses
    /// initialised to the middle of the response range.
    ///
    /// `factors` lists `(name, min, max, num_sets)` per input axis.
    pub fn with_uniform_partition(
        name: impl Into<String>,
        factors: &[(&str, f64, f64, usize)],
        response_min: f64,
        response_max: f64,
    ) -> AgemResult<Self> {
        let factors = factors
            .iter()
            .map(|&(fname, min, max, k)| Factor::with_uniform_sets(fname, min, max, k))
            .collect::<AgemResult<Vec<_>>>()?;
        let num_rules: usize = factors.iter().map(|f| f.sets.len()).product();
        let midpoint = 0.5 * (response_min + response_max);
        let responses = vec![Response::new(midpoint); num_rules];
        let scheme = Self::new(name, factors, responses, response_min, response_max);
        scheme.validate()?;
        Ok(scheme)
    }

    /// Number of rules: the product of per-factor set counts.
    pub fn num_rules(&self) -> usize {
        self.factors.iter().map(|f| f.sets.len()).product()
    }

    /// Decompose rule index `r` into per-factor set indices.
    ///
    /// Row-major: the last factor varies fastest.
    pub fn rule_indices(&self, r: usize, indices: &mut Vec<usize>) {
        indices.clear();
        indices.resize(self.factors.len(), 0);
        let mut rest = r;
        for (f, factor) in self.factors.iter().enumerate().rev() {
            indices[f] = rest % factor.sets.len();
            rest /= factor.sets.len();
        }
    }

    /// Check all structural invariants of the scheme.
    pub fn validate(&self) -> AgemResult<()> {
        if self.factors.is_empty() {
            return Err(AgemError::Invariant(
                "scheme has no factors".to_string(),
            ));
        }
        for factor in &self.factors {
            factor.validate()?;
        }
        if self.responses.len() != self.num_rules() {
            return Err(AgemError::Invariant(format!(
                "scheme '{}' has {} responses but {} rules",
                self.name,
                self.responses.len(),
                self.num_rules()
            )));
        }
        for (r, response) in self.responses.iter().enumerate() {
            if response.value < self.response_min || response.value > self.response_max {
                return Err(AgemError::Invariant(format!(
                    "response {} value {} outside [{}, {}]",
                    r, response.value, self.response_min, self.response_max
                )));
            }
        }
        Ok(())
    }

    /// Enumerate the calibratable scalars in their index order.
    fn calibratable_scalars(&self) -> Vec<ScalarRef> {
        let mut scalars = Vec::new();
        for (f, factor) in self.factors.iter().enumerate() {
            for (k, set) in factor.sets.iter().enumerate() {
                if set.constant {
                    continue;
                }
                scalars.push(ScalarRef::Center { factor: f, set: k });
                if !set.left_is_infinite() {
                    scalars.push(ScalarRef::LeftWidth { factor: f, set: k });
                }
                if !set.right_is_infinite() {
                    scalars.push(ScalarRef::RightWidth { factor: f, set: k });
                }
            }
        }
        for (r, response) in self.responses.iter().enumerate() {
            if !response.constant {
                scalars.push(ScalarRef::Response(r));
            }
        }
        scalars
    }

    fn scalar_value(&self, scalar: ScalarRef) -> f64 {
        match scalar {
            ScalarRef::Center { factor, set } => self.factors[factor].sets[set].center,
            ScalarRef::LeftWidth { factor, set } => self.factors[factor].sets[set].left_width,
            ScalarRef::RightWidth { factor, set } => self.factors[factor].sets[set].right_width,
            ScalarRef::Response(r) => self.responses[r].value,
        }
    }

    fn set_scalar(&mut self, scalar: ScalarRef, value: f64) {
        match scalar {
            ScalarRef::Center { factor, set } => {
                self.factors[factor].sets[set].center = value;
            }
            ScalarRef::LeftWidth { factor, set } => {
                self.factors[factor].sets[set].left_width = value;
            }
            ScalarRef::RightWidth { factor, set } => {
                self.factors[factor].sets[set].right_width = value;
            }
            ScalarRef::Response(r) => {
                self.responses[r].value = value;
            }
        }
    }

    fn scalar_min(&self, scalar: ScalarRef) -> f64 {
        match scalar {
            ScalarRef::Center { factor, .. } => self.factors[factor].min,
            ScalarRef::LeftWidth { .. } | ScalarRef::RightWidth { .. } => 0.0,
            ScalarRef::Response(_) => self.response_min,
        }
    }

    fn scalar_max(&self, scalar: ScalarRef) -> f64 {
        match scalar {
            ScalarRef::Center { factor, .. } => self.factors[factor].max,
            // Capped below the sentinel so a mutation cannot flip a finite
            // side to infinite and shift the calibratable index mapping.
            ScalarRef::LeftWidth { factor, .. } | ScalarRef::RightWidth { factor, .. } => {
                (self.factors[factor].max - self.factors[factor].min).min(INFINITE_WIDTH - 1.0)
            }
            ScalarRef::Response(_) => self.response_max,
        }
    }

    /// The window a set center may move in without breaking ordering:
    /// bounded by the neighbouring centers, the factor range at the ends.
    fn center_window(&self, factor: usize, set: usize) -> (f64, f64) {
        let sets = &self.factors[factor].sets;
        let lower = if set == 0 {
            self.factors[factor].min
        } else {
            sets[set - 1].center
        };
        let upper = if set == sets.len() - 1 {
            self.factors[factor].max
        } else {
            sets[set + 1].center
        };
        (lower, upper)
    }
}

impl Calibratable for FuzzyInferenceScheme {
    fn num_calibratable(&self) -> usize {
        self.calibratable_scalars().len()
    }

    fn parameter_value(&self, index: usize) -> f64 {
        self.scalar_value(self.calibratable_scalars()[index])
    }

    fn parameter_min(&self, index: usize) -> f64 {
        self.scalar_min(self.calibratable_scalars()[index])
    }

    fn parameter_max(&self, index: usize) -> f64 {
        self.scalar_max(self.calibratable_scalars()[index])
    }

    fn modify_parameter(&mut self, index: usize, value: f64) -> bool {
        let scalars = self.calibratable_scalars();
        let scalar = match scalars.get(index) {
            Some(scalar) => *scalar,
            None => return false,
        };
        let clamped = clamp(value, self.scalar_min(scalar), self.scalar_max(scalar));

        // Center moves must preserve the per-factor ordering; a proposal
        // outside the neighbour window is rejected without a rollback record.
        if let ScalarRef::Center { factor, set } = scalar {
            let (lower, upper) = self.center_window(factor, set);
            if clamped < lower || clamped > upper {
                return false;
            }
        }

        let previous = self.scalar_value(scalar);
        self.set_scalar(scalar, clamped);
        self.rollback.push(index, previous);
        true
    }

    fn restore_last_modified(&mut self) -> bool {
        let record = match self.rollback.pop() {
            Some(record) => record,
            None => return false,
        };
        let scalars = self.calibratable_scalars();
        match scalars.get(record.index) {
            Some(scalar) => {
                self.set_scalar(*scalar, record.previous);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_set_factor() -> Factor {
        Factor::new(
            "x",
            0.0,
            100.0,
            vec![
                FuzzySet::new(0.0, 9999.0, 40.0, SetPosition::Left),
                FuzzySet::new(100.0, 40.0, 9999.0, SetPosition::Right),
            ],
        )
    }

    #[test]
    fn membership_triangular_shape() {
        let set = FuzzySet::new(50.0, 10.0, 20.0, SetPosition::Intermediate);
        assert_relative_eq!(set.membership(50.0), 1.0);
        assert_relative_eq!(set.membership(40.0), 0.5);
        assert_relative_eq!(set.membership(30.0), 0.0);
        assert_relative_eq!(set.membership(70.0), 0.5);
        assert_relative_eq!(set.membership(90.0), 0.0);
        assert_relative_eq!(set.membership(200.0), 0.0);
    }

    #[test]
    fn outer_sets_saturate() {
        let factor = two_set_factor();
        assert_relative_eq!(factor.sets[0].membership(-50.0), 1.0);
        assert_relative_eq!(factor.sets[1].membership(150.0), 1.0);
    }

    #[test]
    fn sentinel_width_is_infinite() {
        let set = FuzzySet::new(50.0, 222222.0, 10.0, SetPosition::Intermediate);
        assert_relative_eq!(set.membership(0.0), 1.0);
        let set = FuzzySet::new(50.0, 1e3, 10.0, SetPosition::Intermediate);
        assert_relative_eq!(set.membership(0.0), 1.0);
    }

    #[test]
    fn uniform_partition_sums_to_one_between_outer_centers() {
        let factor = Factor::with_uniform_sets("x", 0.0, 100.0, 3).unwrap();
        for i in 0..=100 {
            let x = i as f64;
            let sum: f64 = factor.sets.iter().map(|s| s.membership(x)).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn rule_enumeration_is_row_major() {
        let scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 1.0, 2), ("b", 0.0, 1.0, 3)],
            0.0,
            1.0,
        )
        .unwrap();
        assert_eq!(scheme.num_rules(), 6);

        let mut indices = Vec::new();
        scheme.rule_indices(0, &mut indices);
        assert_eq!(indices, vec![0, 0]);
        scheme.rule_indices(1, &mut indices);
        assert_eq!(indices, vec![0, 1]);
        scheme.rule_indices(3, &mut indices);
        assert_eq!(indices, vec![1, 0]);
        scheme.rule_indices(5, &mut indices);
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn validate_rejects_wrong_response_count() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 1.0, 2)],
            0.0,
            1.0,
        )
        .unwrap();
        scheme.responses.pop();
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn validate_rejects_unordered_centers() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 100.0, 3)],
            0.0,
            1.0,
        )
        .unwrap();
        scheme.factors[0].sets[1].center = 0.0;
        scheme.factors[0].sets[0].center = 50.0;
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn calibratable_count_skips_constants_and_infinite_sides() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 100.0, 3)],
            0.0,
            10.0,
        )
        .unwrap();
        // Left set: center + right width. Intermediate: center + both widths.
        // Right set: center + left width. Plus 3 responses.
        assert_eq!(scheme.num_calibratable(), 2 + 3 + 2 + 3);

        scheme.factors[0].sets[1].constant = true;
        assert_eq!(scheme.num_calibratable(), 2 + 2 + 3);

        scheme.responses[0].constant = true;
        assert_eq!(scheme.num_calibratable(), 2 + 2 + 2);
    }

    #[test]
    fn center_move_outside_neighbour_window_is_rejected() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 100.0, 3)],
            0.0,
            10.0,
        )
        .unwrap();
        // Index 2 is the center of the intermediate set (at 50).
        assert_eq!(scheme.parameter_value(2), 50.0);

        // Beyond the right neighbour's center: rejected, nothing to undo.
        assert!(!scheme.modify_parameter(2, 150.0));
        assert_eq!(scheme.factors[0].sets[1].center, 50.0);
        assert!(!scheme.restore_last_modified());

        // Within the window: accepted and undoable.
        assert!(scheme.modify_parameter(2, 60.0));
        assert_eq!(scheme.factors[0].sets[1].center, 60.0);
        assert!(scheme.restore_last_modified());
        assert_eq!(scheme.factors[0].sets[1].center, 50.0);
    }

    #[test]
    fn random_perturbation_keeps_scheme_valid() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 100.0, 4), ("b", -1.0, 1.0, 2)],
            0.0,
            10.0,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..2000 {
            scheme.modify_parameter_randomly(0.2, &mut rng);
            scheme.validate().unwrap();
        }
    }

    #[test]
    fn perturb_then_restore_is_bit_identical() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "test",
            &[("a", 0.0, 100.0, 3)],
            0.0,
            10.0,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        for _ in 0..500 {
            let before = scheme.clone();
            if scheme.modify_parameter_randomly(0.5, &mut rng) {
                scheme.restore_last_modified();
            }
            for i in 0..scheme.num_calibratable() {
                assert_eq!(scheme.parameter_value(i), before.parameter_value(i));
            }
        }
    }
}
