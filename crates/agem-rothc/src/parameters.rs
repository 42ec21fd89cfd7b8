//! The RothC parameter object: pool kinetics, rate-modifier coefficients
//! and input split fractions, all calibratable.
//!
//! Default values follow the RothC-26.3 description (Coleman & Jenkinson).

use agem_core::errors::{AgemError, AgemResult};
use agem_core::parameter::{Calibratable, RollbackStack};
use serde::{Deserialize, Serialize};

/// One bounded scalar with a calibration lock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalarParameter {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// Fixed under calibration.
    pub constant: bool,
}

impl ScalarParameter {
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        Self {
            value,
            min,
            max,
            constant: false,
        }
    }

    /// A scalar excluded from calibration.
    pub fn fixed(value: f64, min: f64, max: f64) -> Self {
        Self {
            value,
            min,
            max,
            constant: true,
        }
    }
}

/// DPM/RPM/HUM split of a carbon input stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitFractions {
    pub dpm: ScalarParameter,
    pub rpm: ScalarParameter,
    pub hum: ScalarParameter,
}

impl SplitFractions {
    /// Fractions are locked for calibration by default: perturbing one
    /// independently would break the sum-to-one invariant.
    pub fn new(dpm: f64, rpm: f64, hum: f64) -> Self {
        Self {
            dpm: ScalarParameter::fixed(dpm, 0.0, 1.0),
            rpm: ScalarParameter::fixed(rpm, 0.0, 1.0),
            hum: ScalarParameter::fixed(hum, 0.0, 1.0),
        }
    }

    fn sum(&self) -> f64 {
        self.dpm.value + self.rpm.value + self.hum.value
    }
}

/// All RothC coefficients.
///
/// Kinetic scalars carry the names used in the XML document: the
/// temperature factor coefficients `a.a1..a.a3`, the moisture factor
/// coefficients `b.b1..b.b3`, the soil cover factors `c.covered` and
/// `c.bare`, the CO₂ partition coefficients `x.x1..x.x3` and the pool
/// decay constants `k.dpm`, `k.rpm`, `k.bio`, `k.hum` (per year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RothCParameters {
    pub name: String,
    pub plant: SplitFractions,
    pub fertilizer: SplitFractions,
    pub a1: ScalarParameter,
    pub a2: ScalarParameter,
    pub a3: ScalarParameter,
    pub b1: ScalarParameter,
    pub b2: ScalarParameter,
    pub b3: ScalarParameter,
    pub c_covered: ScalarParameter,
    pub c_bare: ScalarParameter,
    pub x1: ScalarParameter,
    pub x2: ScalarParameter,
    pub x3: ScalarParameter,
    pub k_dpm: ScalarParameter,
    pub k_rpm: ScalarParameter,
    pub k_bio: ScalarParameter,
    pub k_hum: ScalarParameter,
    #[serde(skip)]
    rollback: RollbackStack,
}

impl Default for RothCParameters {
    fn default() -> Self {
        Self {
            name: "RothC".to_string(),
            // Agricultural crops: DPM/RPM ratio 1.44.
            plant: SplitFractions::new(0.59, 0.41, 0.0),
            // Farmyard manure.
            fertilizer: SplitFractions::new(0.49, 0.49, 0.02),
            a1: ScalarParameter::new(47.91, 40.0, 60.0),
            a2: ScalarParameter::new(106.06, 90.0, 120.0),
            a3: ScalarParameter::new(18.27, 10.0, 25.0),
            b1: ScalarParameter::new(0.2, 0.0, 1.0),
            b2: ScalarParameter::new(1.0, 0.5, 1.0),
            b3: ScalarParameter::new(0.444, 0.1, 1.0),
            c_covered: ScalarParameter::new(0.6, 0.3, 1.0),
            c_bare: ScalarParameter::fixed(1.0, 1.0, 1.0),
            x1: ScalarParameter::new(1.67, 1.0, 2.5),
            x2: ScalarParameter::new(1.85, 1.0, 2.5),
            x3: ScalarParameter::new(1.60, 1.0, 2.5),
            k_dpm: ScalarParameter::new(10.0, 5.0, 15.0),
            k_rpm: ScalarParameter::new(0.3, 0.1, 0.6),
            k_bio: ScalarParameter::new(0.66, 0.3, 1.0),
            k_hum: ScalarParameter::new(0.02, 0.005, 0.05),
            rollback: RollbackStack::default(),
        }
    }
}

impl RothCParameters {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Check split sums and scalar bounds.
    pub fn validate(&self) -> AgemResult<()> {
        for (label, fractions) in [("plant", &self.plant), ("fertilizer", &self.fertilizer)] {
            if (fractions.sum() - 1.0).abs() > 1e-9 {
                return Err(AgemError::Invariant(format!(
                    "{} fractions sum to {}, expected 1",
                    label,
                    fractions.sum()
                )));
            }
        }
        for (name, scalar) in self.scalars() {
            if scalar.min > scalar.max {
                return Err(AgemError::Invariant(format!(
                    "parameter '{}': min {} exceeds max {}",
                    name, scalar.min, scalar.max
                )));
            }
            if scalar.value < scalar.min || scalar.value > scalar.max {
                return Err(AgemError::Invariant(format!(
                    "parameter '{}': value {} outside [{}, {}]",
                    name, scalar.value, scalar.min, scalar.max
                )));
            }
        }
        Ok(())
    }

    /// All scalars with their document names, in the calibratable
    /// enumeration order.
    pub fn scalars(&self) -> Vec<(&'static str, &ScalarParameter)> {
        vec![
            ("plant.dpm", &self.plant.dpm),
            ("plant.rpm", &self.plant.rpm),
            ("plant.hum", &self.plant.hum),
            ("fertilizer.dpm", &self.fertilizer.dpm),
            ("fertilizer.rpm", &self.fertilizer.rpm),
            ("fertilizer.hum", &self.fertilizer.hum),
            ("a.a1", &self.a1),
            ("a.a2", &self.a2),
            ("a.a3", &self.a3),
            ("b.b1", &self.b1),
            ("b.b2", &self.b2),
            ("b.b3", &self.b3),
            ("c.covered", &self.c_covered),
            ("c.bare", &self.c_bare),
            ("x.x1", &self.x1),
            ("x.x2", &self.x2),
            ("x.x3", &self.x3),
            ("k.dpm", &self.k_dpm),
            ("k.rpm", &self.k_rpm),
            ("k.bio", &self.k_bio),
            ("k.hum", &self.k_hum),
        ]
    }

    fn scalars_mut(&mut self) -> Vec<&mut ScalarParameter> {
        vec![
            &mut self.plant.dpm,
            &mut self.plant.rpm,
            &mut self.plant.hum,
            &mut self.fertilizer.dpm,
            &mut self.fertilizer.rpm,
            &mut self.fertilizer.hum,
            &mut self.a1,
            &mut self.a2,
            &mut self.a3,
            &mut self.b1,
            &mut self.b2,
            &mut self.b3,
            &mut self.c_covered,
            &mut self.c_bare,
            &mut self.x1,
            &mut self.x2,
            &mut self.x3,
            &mut self.k_dpm,
            &mut self.k_rpm,
            &mut self.k_bio,
            &mut self.k_hum,
        ]
    }

    /// Look up a scalar by its document name.
    pub fn scalar_mut(&mut self, name: &str) -> Option<&mut ScalarParameter> {
        let index = self.scalars().iter().position(|(n, _)| *n == name)?;
        Some(self.scalars_mut().swap_remove(index))
    }

    /// Indices of the non-constant scalars.
    fn calibratable_indices(&self) -> Vec<usize> {
        self.scalars()
            .iter()
            .enumerate()
            .filter(|(_, (_, s))| !s.constant)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Calibratable for RothCParameters {
    fn num_calibratable(&self) -> usize {
        self.calibratable_indices().len()
    }

    fn parameter_value(&self, index: usize) -> f64 {
        let flat = self.calibratable_indices()[index];
        self.scalars()[flat].1.value
    }

    fn parameter_min(&self, index: usize) -> f64 {
        let flat = self.calibratable_indices()[index];
        self.scalars()[flat].1.min
    }

    fn parameter_max(&self, index: usize) -> f64 {
        let flat = self.calibratable_indices()[index];
        self.scalars()[flat].1.max
    }

    fn modify_parameter(&mut self, index: usize, value: f64) -> bool {
        let flat = self.calibratable_indices()[index];
        let (min, max) = {
            let scalar = self.scalars()[flat].1;
            (scalar.min, scalar.max)
        };
        let clamped = value.clamp(min, max);
        let scalar = &mut self.scalars_mut()[flat];
        let previous = scalar.value;
        scalar.value = clamped;
        self.rollback.push(index, previous);
        true
    }

    fn restore_last_modified(&mut self) -> bool {
        let record = match self.rollback.pop() {
            Some(record) => record,
            None => return false,
        };
        let flat = self.calibratable_indices()[record.index];
        self.scalars_mut()[flat].value = record.previous;
        true
    }
}
