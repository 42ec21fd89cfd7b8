//! Per-cell evaluation of a fuzzy inference scheme.
//!
//! For every cell the evaluator fuzzifies the factor inputs, computes the
//! degree of fulfillment (DOF) of each rule as the product of memberships,
//! and defuzzifies by the DOF-weighted average of the rule responses.
//! Evaluation is deterministic and O(rules x factors) per cell; the per-cell
//! loop may be sharded across rayon workers.

use crate::dataset::{DataArray, DataSet};
use crate::errors::AgemResult;
use crate::fuzzy::scheme::FuzzyInferenceScheme;
use crate::parameter::Calibratable;
use crate::pipeline::{Model, Stage};
use crate::xml;
use crate::DEFAULT_NULL_VALUE;
use log::{debug, warn};
use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Defuzzification guard: a DOF sum at or below this is treated as zero.
const DOF_EPSILON: f64 = 1e-15;

/// Runtime options of the fuzzy evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyModelOptions {
    /// Name of the emitted result array.
    pub result_name: String,
    /// Sentinel marking missing values on input and output.
    pub null_value: f64,
    /// Emit a per-cell `Sigma` array from the per-rule standard deviations.
    pub with_sigma: bool,
    /// Emit per-rule `DOF<r>` arrays with each cell's degrees of fulfillment.
    pub with_dof: bool,
    /// Shard the per-cell loop across rayon workers.
    pub parallel: bool,
}

impl Default for FuzzyModelOptions {
    fn default() -> Self {
        Self {
            result_name: "Result".to_string(),
            null_value: DEFAULT_NULL_VALUE,
            with_sigma: false,
            with_dof: false,
            parallel: false,
        }
    }
}

/// Output of one cell evaluation.
struct CellOutput {
    result: f64,
    sigma: f64,
    dofs: Vec<f64>,
    /// All inputs were valid but the DOF sum vanished.
    degenerate: bool,
}

/// A fuzzy inference scheme bound to evaluator options, usable as a
/// pipeline stage.
pub struct FuzzyModel {
    scheme: FuzzyInferenceScheme,
    options: FuzzyModelOptions,
}

impl FuzzyModel {
    pub fn new(scheme: FuzzyInferenceScheme, options: FuzzyModelOptions) -> Self {
        Self { scheme, options }
    }

    pub fn scheme(&self) -> &FuzzyInferenceScheme {
        &self.scheme
    }

    pub fn options(&self) -> &FuzzyModelOptions {
        &self.options
    }

    /// Precompute the rule table: per-factor set indices for every rule.
    fn rule_table(&self) -> Vec<Vec<usize>> {
        let mut table = Vec::with_capacity(self.scheme.num_rules());
        let mut indices = Vec::new();
        for r in 0..self.scheme.num_rules() {
            self.scheme.rule_indices(r, &mut indices);
            table.push(indices.clone());
        }
        table
    }

    /// Evaluate one cell given its factor inputs.
    ///
    /// `memberships` is a scratch buffer holding one value per fuzzy set,
    /// laid out factor by factor at `offsets`.
    fn evaluate_cell(
        &self,
        inputs: &[f64],
        table: &[Vec<usize>],
        offsets: &[usize],
        memberships: &mut [f64],
    ) -> CellOutput {
        let null = self.options.null_value;
        let num_rules = table.len();

        // Null propagation: any null input nulls the whole cell.
        if inputs.iter().any(|&x| x == null) {
            return CellOutput {
                result: null,
                sigma: null,
                dofs: vec![0.0; num_rules],
                degenerate: false,
            };
        }

        // Fuzzification.
        for (f, factor) in self.scheme.factors.iter().enumerate() {
            for (k, set) in factor.sets.iter().enumerate() {
                memberships[offsets[f] + k] = set.membership(inputs[f]);
            }
        }

        // Inference and defuzzification.
        let mut dofs = vec![0.0; num_rules];
        let mut dof_sum = 0.0;
        let mut weighted_sum = 0.0;
        let mut weighted_var = 0.0;
        for (r, rule) in table.iter().enumerate() {
            let mut dof = 1.0;
            for (f, &k) in rule.iter().enumerate() {
                dof *= memberships[offsets[f] + k];
            }
            dofs[r] = dof;
            dof_sum += dof;
            weighted_sum += dof * self.scheme.responses[r].value;
            weighted_var += dof * self.scheme.responses[r].sd * self.scheme.responses[r].sd;
        }

        if dof_sum <= DOF_EPSILON {
            return CellOutput {
                result: null,
                sigma: null,
                dofs,
                degenerate: true,
            };
        }

        // Rounding can push the variance sum marginally negative.
        let sigma = (weighted_var / dof_sum).max(0.0).sqrt();
        CellOutput {
            result: weighted_sum / dof_sum,
            sigma,
            dofs,
            degenerate: false,
        }
    }
}

impl Model for FuzzyModel {
    fn result_name(&self) -> &str {
        &self.options.result_name
    }

    fn run(&self, input: &DataSet) -> AgemResult<DataSet> {
        let num_cells = input.num_cells();

        // Bind the factor arrays up front so a missing name fails fast.
        let factor_arrays = self
            .scheme
            .factors
            .iter()
            .map(|factor| input.array(&factor.name))
            .collect::<AgemResult<Vec<&DataArray>>>()?;

        let table = self.rule_table();
        let mut offsets = Vec::with_capacity(self.scheme.factors.len());
        let mut total_sets = 0;
        for factor in &self.scheme.factors {
            offsets.push(total_sets);
            total_sets += factor.sets.len();
        }

        let eval = |inputs: &mut Vec<f64>, memberships: &mut Vec<f64>, cell: usize| {
            inputs.clear();
            inputs.extend(factor_arrays.iter().map(|array| array.get(cell)));
            self.evaluate_cell(inputs, &table, &offsets, memberships)
        };

        let outputs: Vec<CellOutput> = if self.options.parallel {
            (0..num_cells)
                .into_par_iter()
                .map_init(
                    || (Vec::new(), vec![0.0; total_sets]),
                    |(inputs, memberships), cell| eval(inputs, memberships, cell),
                )
                .collect()
        } else {
            let mut inputs = Vec::new();
            let mut memberships = vec![0.0; total_sets];
            (0..num_cells)
                .map(|cell| eval(&mut inputs, &mut memberships, cell))
                .collect()
        };

        let degenerate = outputs.iter().filter(|o| o.degenerate).count();
        if degenerate > 0 {
            warn!(
                "fuzzy model '{}': {} of {} cells had a vanishing DOF sum, null emitted",
                self.scheme.name, degenerate, num_cells
            );
        }
        debug!(
            "fuzzy model '{}' evaluated {} cells over {} rules",
            self.scheme.name,
            num_cells,
            table.len()
        );

        let mut dataset = input.clone();
        dataset.add_array(DataArray::from_values(
            self.options.result_name.clone(),
            outputs.iter().map(|o| o.result).collect(),
        ))?;
        if self.options.with_sigma {
            dataset.add_array(DataArray::from_values(
                "Sigma",
                outputs.iter().map(|o| o.sigma).collect(),
            ))?;
        }
        if self.options.with_dof {
            for r in 0..table.len() {
                dataset.add_array(DataArray::from_values(
                    format!("DOF{}", r),
                    outputs.iter().map(|o| o.dofs[r]).collect(),
                ))?;
            }
        }
        dataset.set_active_scalar(&self.options.result_name)?;
        Ok(dataset)
    }
}

impl Calibratable for FuzzyModel {
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

    fn modify_parameter_randomly(&mut self, sigma: f64, rng: &mut dyn RngCore) -> bool {
        self.scheme.modify_parameter_randomly(sigma, rng)
    }

    fn restore_last_modified(&mut self) -> bool {
        self.scheme.restore_last_modified()
    }
}

impl Stage for FuzzyModel {
    fn parameter_xml(&self) -> AgemResult<String> {
        xml::write_fuzzy_scheme(&self.scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::scheme::{Factor, FuzzySet, Response, SetPosition};
    use approx::assert_relative_eq;

    /// One factor over [0, 100] with the two-set layout used by the
    /// end-to-end scenarios: left set (center 0, right width 40) and right
    /// set (center 100, left width 40).
    fn two_set_scheme(responses: [f64; 2]) -> FuzzyInferenceScheme {
        let factor = Factor::new(
            "x",
            0.0,
            100.0,
            vec![
                FuzzySet::new(0.0, 9999.0, 40.0, SetPosition::Left),
                FuzzySet::new(100.0, 40.0, 9999.0, SetPosition::Right),
            ],
        );
        let responses = responses.iter().map(|&v| Response::new(v)).collect();
        FuzzyInferenceScheme::new("test", vec![factor], responses, 0.0, 10.0)
    }

    fn ramp_dataset(n: usize) -> DataSet {
        let mut ds = DataSet::new(n);
        let step = 100.0 / (n - 1) as f64;
        ds.add_array(DataArray::from_values(
            "x",
            (0..n).map(|i| i as f64 * step).collect(),
        ))
        .unwrap();
        ds
    }

    #[test]
    fn constant_responses_give_constant_output() {
        let model = FuzzyModel::new(two_set_scheme([5.0, 5.0]), FuzzyModelOptions::default());
        let output = model.run(&ramp_dataset(101)).unwrap();
        let result = output.array("Result").unwrap();
        for i in 0..101 {
            assert_relative_eq!(result.get(i), 5.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn two_sets_interpolate_piecewise_linearly() {
        let model = FuzzyModel::new(two_set_scheme([0.0, 10.0]), FuzzyModelOptions::default());
        let output = model.run(&ramp_dataset(101)).unwrap();
        let result = output.array("Result").unwrap();
        assert_relative_eq!(result.get(0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(result.get(50), 5.0, epsilon = 1e-12);
        assert_relative_eq!(result.get(100), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let model = FuzzyModel::new(two_set_scheme([2.0, 8.0]), FuzzyModelOptions::default());
        let input = ramp_dataset(50);
        let first = model.run(&input).unwrap();
        let second = model.run(&input).unwrap();
        for i in 0..50 {
            assert_eq!(
                first.array("Result").unwrap().get(i),
                second.array("Result").unwrap().get(i)
            );
        }
    }

    #[test]
    fn null_input_propagates() {
        let model = FuzzyModel::new(
            two_set_scheme([0.0, 10.0]),
            FuzzyModelOptions {
                with_sigma: true,
                ..Default::default()
            },
        );
        let mut ds = DataSet::new(3);
        ds.add_array(DataArray::from_values(
            "x",
            vec![50.0, DEFAULT_NULL_VALUE, 70.0],
        ))
        .unwrap();
        let output = model.run(&ds).unwrap();
        assert_eq!(output.array("Result").unwrap().get(1), DEFAULT_NULL_VALUE);
        assert_eq!(output.array("Sigma").unwrap().get(1), DEFAULT_NULL_VALUE);
        assert_ne!(output.array("Result").unwrap().get(0), DEFAULT_NULL_VALUE);
    }

    #[test]
    fn vanishing_dof_sum_emits_null() {
        // Narrow sets leave a coverage gap in the middle of the range.
        let factor = Factor::new(
            "x",
            0.0,
            100.0,
            vec![
                FuzzySet::new(0.0, 9999.0, 5.0, SetPosition::Left),
                FuzzySet::new(100.0, 5.0, 9999.0, SetPosition::Right),
            ],
        );
        let scheme = FuzzyInferenceScheme::new(
            "gap",
            vec![factor],
            vec![Response::new(0.0), Response::new(10.0)],
            0.0,
            10.0,
        );
        let model = FuzzyModel::new(scheme, FuzzyModelOptions::default());

        let mut ds = DataSet::new(1);
        ds.add_array(DataArray::from_values("x", vec![50.0])).unwrap();
        let output = model.run(&ds).unwrap();
        assert_eq!(output.array("Result").unwrap().get(0), DEFAULT_NULL_VALUE);
    }

    #[test]
    fn sigma_is_dof_weighted() {
        let mut scheme = two_set_scheme([0.0, 10.0]);
        scheme.responses[0].sd = 1.0;
        scheme.responses[1].sd = 3.0;
        let model = FuzzyModel::new(
            scheme,
            FuzzyModelOptions {
                with_sigma: true,
                ..Default::default()
            },
        );
        let mut ds = DataSet::new(2);
        ds.add_array(DataArray::from_values("x", vec![0.0, 100.0]))
            .unwrap();
        let output = model.run(&ds).unwrap();
        // At the outer centers only one rule fires.
        assert_relative_eq!(output.array("Sigma").unwrap().get(0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(output.array("Sigma").unwrap().get(1), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn dof_arrays_are_emitted() {
        let model = FuzzyModel::new(
            two_set_scheme([0.0, 10.0]),
            FuzzyModelOptions {
                with_dof: true,
                ..Default::default()
            },
        );
        let mut ds = DataSet::new(1);
        ds.add_array(DataArray::from_values("x", vec![0.0])).unwrap();
        let output = model.run(&ds).unwrap();
        assert_relative_eq!(output.array("DOF0").unwrap().get(0), 1.0);
        assert_relative_eq!(output.array("DOF1").unwrap().get(0), 0.0);
    }

    #[test]
    fn parallel_matches_serial() {
        let serial = FuzzyModel::new(two_set_scheme([1.0, 9.0]), FuzzyModelOptions::default());
        let parallel = FuzzyModel::new(
            two_set_scheme([1.0, 9.0]),
            FuzzyModelOptions {
                parallel: true,
                ..Default::default()
            },
        );
        let input = ramp_dataset(1000);
        let a = serial.run(&input).unwrap();
        let b = parallel.run(&input).unwrap();
        for i in 0..1000 {
            assert_eq!(
                a.array("Result").unwrap().get(i),
                b.array("Result").unwrap().get(i)
            );
        }
    }

    #[test]
    fn missing_factor_array_is_name_binding_error() {
        let model = FuzzyModel::new(two_set_scheme([0.0, 10.0]), FuzzyModelOptions::default());
        let ds = DataSet::new(3);
        assert!(model.run(&ds).is_err());
    }

    #[test]
    fn two_factor_scheme_multiplies_memberships() {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "product",
            &[("a", 0.0, 1.0, 2), ("b", 0.0, 1.0, 2)],
            0.0,
            1.0,
        )
        .unwrap();
        // Responses row-major over (a, b): (0,0) (0,1) (1,0) (1,1).
        scheme.responses[0].value = 0.0;
        scheme.responses[1].value = 0.0;
        scheme.responses[2].value = 0.0;
        scheme.responses[3].value = 1.0;
        let model = FuzzyModel::new(scheme, FuzzyModelOptions::default());

        let mut ds = DataSet::new(1);
        ds.add_array(DataArray::from_values("a", vec![0.5])).unwrap();
        ds.add_array(DataArray::from_values("b", vec![0.5])).unwrap();
        let output = model.run(&ds).unwrap();
        // Uniform partitions are a partition of unity, so the four DOFs are
        // 0.25 each and the weighted average is exactly the (1,1) share.
        assert_relative_eq!(
            output.array("Result").unwrap().get(0),
            0.25,
            epsilon = 1e-12
        );
    }
}
