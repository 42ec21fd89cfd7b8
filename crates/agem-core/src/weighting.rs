//! Per-category weighting of an upstream model result.
//!
//! A [`WeightingScheme`] holds one weight per category id; the
//! [`WeightingModel`] multiplies the upstream active scalar by the weight
//! whose id matches the cell's category. Inactive or missing ids multiply
//! by 1, null upstream values stay null.

use crate::dataset::{DataArray, DataSet};
use crate::errors::{AgemError, AgemResult};
use crate::parameter::{clamp, Calibratable, RollbackStack};
use crate::pipeline::{Model, Stage};
use crate::xml;
use crate::DEFAULT_NULL_VALUE;
use serde::{Deserialize, Serialize};

/// One per-category multiplier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weight {
    pub id: i64,
    pub min: f64,
    pub max: f64,
    pub value: f64,
    /// Fixed under calibration.
    pub constant: bool,
    /// Disabled entries act as a weight of 1.
    pub active: bool,
}

impl Weight {
    pub fn new(id: i64, min: f64, max: f64, value: f64) -> Self {
        Self {
            id,
            min,
            max,
            value,
            constant: false,
            active: true,
        }
    }
}

/// The weighting parameter object: a category factor plus ordered weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingScheme {
    pub name: String,
    /// Name of the input array holding the per-cell category id.
    pub factor_name: String,
    pub weights: Vec<Weight>,
    #[serde(skip)]
    rollback: RollbackStack,
}

impl WeightingScheme {
    pub fn new(
        name: impl Into<String>,
        factor_name: impl Into<String>,
        weights: Vec<Weight>,
    ) -> Self {
        Self {
            name: name.into(),
            factor_name: factor_name.into(),
            weights,
            rollback: RollbackStack::default(),
        }
    }

    /// Build a scheme with `num_weights` entries for ids `0..num_weights`,
    /// all initialised to the middle of `[min, max]`.
    pub fn with_uniform_weights(
        name: impl Into<String>,
        factor_name: impl Into<String>,
        num_weights: usize,
        min: f64,
        max: f64,
    ) -> Self {
        let weights = (0..num_weights)
            .map(|id| Weight::new(id as i64, min, max, 0.5 * (min + max)))
            .collect();
        Self::new(name, factor_name, weights)
    }

    /// Look up the multiplier for a category id.
    pub fn multiplier(&self, id: i64) -> f64 {
        self.weights
            .iter()
            .find(|w| w.id == id && w.active)
            .map(|w| w.value)
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> AgemResult<()> {
        for weight in &self.weights {
            if weight.min > weight.max {
                return Err(AgemError::Invariant(format!(
                    "weight {}: min {} exceeds max {}",
                    weight.id, weight.min, weight.max
                )));
            }
            if weight.value < weight.min || weight.value > weight.max {
                return Err(AgemError::Invariant(format!(
                    "weight {}: value {} outside [{}, {}]",
                    weight.id, weight.value, weight.min, weight.max
                )));
            }
        }
        Ok(())
    }

    fn calibratable_indices(&self) -> Vec<usize> {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.constant)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Calibratable for WeightingScheme {
    fn num_calibratable(&self) -> usize {
        self.calibratable_indices().len()
    }

    fn parameter_value(&self, index: usize) -> f64 {
        self.weights[self.calibratable_indices()[index]].value
    }

    fn parameter_min(&self, index: usize) -> f64 {
        self.weights[self.calibratable_indices()[index]].min
    }

    fn parameter_max(&self, index: usize) -> f64 {
        self.weights[self.calibratable_indices()[index]].max
    }

    fn modify_parameter(&mut self, index: usize, value: f64) -> bool {
        let indices = self.calibratable_indices();
        let slot = match indices.get(index) {
            Some(slot) => *slot,
            None => return false,
        };
        let weight = &mut self.weights[slot];
        let previous = weight.value;
        weight.value = clamp(value, weight.min, weight.max);
        self.rollback.push(index, previous);
        true
    }

    fn restore_last_modified(&mut self) -> bool {
        let record = match self.rollback.pop() {
            Some(record) => record,
            None => return false,
        };
        let indices = self.calibratable_indices();
        match indices.get(record.index) {
            Some(slot) => {
                self.weights[*slot].value = record.previous;
                true
            }
            None => false,
        }
    }
}

/// Runtime options of the weighting model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingModelOptions {
    /// Name of the emitted result array.
    pub result_name: String,
    /// Upstream array to weight; the active scalar when `None`.
    pub input_name: Option<String>,
    pub null_value: f64,
}

impl Default for WeightingModelOptions {
    fn default() -> Self {
        Self {
            result_name: "Result".to_string(),
            input_name: None,
            null_value: DEFAULT_NULL_VALUE,
        }
    }
}

/// A weighting scheme bound to model options, usable as a pipeline stage.
pub struct WeightingModel {
    scheme: WeightingScheme,
    options: WeightingModelOptions,
}

impl WeightingModel {
    pub fn new(scheme: WeightingScheme, options: WeightingModelOptions) -> Self {
        Self { scheme, options }
    }

    pub fn scheme(&self) -> &WeightingScheme {
        &self.scheme
    }
}

impl Model for WeightingModel {
    fn result_name(&self) -> &str {
        &self.options.result_name
    }

    fn run(&self, input: &DataSet) -> AgemResult<DataSet> {
        let upstream = match &self.options.input_name {
            Some(name) => input.array(name)?,
            None => input.active_scalar()?,
        };
        let categories = input.array(&self.scheme.factor_name)?;

        let mut values = Vec::with_capacity(input.num_cells());
        for cell in 0..input.num_cells() {
            let value = upstream.get(cell);
            if value == self.options.null_value {
                values.push(value);
            } else {
                values.push(value * self.scheme.multiplier(categories.get_int(cell)));
            }
        }

        let mut dataset = input.clone();
        dataset.add_array(DataArray::from_values(
            self.options.result_name.clone(),
            values,
        ))?;
        dataset.set_active_scalar(&self.options.result_name)?;
        Ok(dataset)
    }
}

impl Calibratable for WeightingModel {
    fn num_calibratable(&self) -> usize {
        self.scheme.num_calibratable()
    }

    fn parameter_value(&self, index: usize) -> f64 {
        self.scheme.parameter_value(index)
    }

    fn parameter_min(&self, index: usize) -> f64 {
        self.scheme.parameter_min(index)
    }

    fn parameter_max(&self, index: usize) -> f64 {
        self.scheme.parameter_max(index)
    }

    fn modify_parameter(&mut self, index: usize, value: f64) -> bool {
        self.scheme.modify_parameter(index, value)
    }

    fn restore_last_modified(&mut self) -> bool {
        self.scheme.restore_last_modified()
    }
}

impl Stage for WeightingModel {
    fn parameter_xml(&self) -> AgemResult<String> {
        xml::write_weighting_scheme(&self.scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn categorized_dataset() -> DataSet {
        let mut ds = DataSet::new(4);
        ds.add_array(DataArray::from_values("Upstream", vec![2.0, 2.0, 2.0, 2.0]))
            .unwrap();
        ds.add_array(DataArray::from_int_values("Category", vec![0, 1, 2, 7]))
            .unwrap();
        ds.set_active_scalar("Upstream").unwrap();
        ds
    }

    fn three_weight_scheme() -> WeightingScheme {
        WeightingScheme::new(
            "w",
            "Category",
            vec![
                Weight::new(0, 0.0, 10.0, 0.5),
                Weight::new(1, 0.0, 10.0, 2.0),
                Weight::new(2, 0.0, 10.0, 3.0),
            ],
        )
    }

    #[test]
    fn multiplies_by_matching_weight() {
        let model = WeightingModel::new(three_weight_scheme(), WeightingModelOptions::default());
        let output = model.run(&categorized_dataset()).unwrap();
        let result = output.array("Result").unwrap();
        assert_relative_eq!(result.get(0), 1.0);
        assert_relative_eq!(result.get(1), 4.0);
        assert_relative_eq!(result.get(2), 6.0);
        // Unknown id 7 multiplies by 1.
        assert_relative_eq!(result.get(3), 2.0);
    }

    #[test]
    fn inactive_weight_acts_as_one() {
        let mut scheme = three_weight_scheme();
        scheme.weights[1].active = false;
        let model = WeightingModel::new(scheme, WeightingModelOptions::default());
        let output = model.run(&categorized_dataset()).unwrap();
        assert_relative_eq!(output.array("Result").unwrap().get(1), 2.0);
    }

    #[test]
    fn null_upstream_stays_null() {
        let mut ds = categorized_dataset();
        ds.array_mut("Upstream").unwrap().set(2, DEFAULT_NULL_VALUE);
        let model = WeightingModel::new(three_weight_scheme(), WeightingModelOptions::default());
        let output = model.run(&ds).unwrap();
        assert_eq!(output.array("Result").unwrap().get(2), DEFAULT_NULL_VALUE);
    }

    #[test]
    fn constant_weights_are_not_calibratable() {
        let mut scheme = three_weight_scheme();
        assert_eq!(scheme.num_calibratable(), 3);
        scheme.weights[0].constant = true;
        assert_eq!(scheme.num_calibratable(), 2);
        // Index 0 now maps to weight id 1.
        assert_relative_eq!(scheme.parameter_value(0), 2.0);
    }

    #[test]
    fn modification_clamps_and_restores() {
        let mut scheme = three_weight_scheme();
        assert!(scheme.modify_parameter(0, 42.0));
        assert_relative_eq!(scheme.weights[0].value, 10.0);
        assert!(scheme.restore_last_modified());
        assert_relative_eq!(scheme.weights[0].value, 0.5);
    }

    #[test]
    fn missing_category_array_is_name_binding_error() {
        let model = WeightingModel::new(
            WeightingScheme::new("w", "Nope", vec![]),
            WeightingModelOptions::default(),
        );
        assert!(model.run(&categorized_dataset()).is_err());
    }
}
