//! Simulated annealing over the calibratable scalars of a model pipeline.

use crate::assessment::{aic, bic, Assessment};
use agem_core::dataset::DataSet;
use agem_core::errors::{AgemError, AgemResult};
use agem_core::metrics::{compare_datasets, num_compared_pairs};
use agem_core::pipeline::MetaModel;
use agem_core::DEFAULT_NULL_VALUE;
use log::{info, warn};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Error threshold above which a run is considered diverged.
const DIVERGENCE_LIMIT: f64 = 1e20;

/// Iterations to allow before the divergence guard kicks in.
const DIVERGENCE_GRACE: usize = 100;

/// Schedule and stopping parameters for [`SimulatedAnnealing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealingConfig {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Initial acceptance temperature.
    pub t_init: f64,
    /// Initial relative standard deviation of parameter proposals.
    pub sd_init: f64,
    /// Divisor applied to the temperature when a poor move is accepted.
    /// Must be at least 1.
    pub t_minimizer: f64,
    /// Divisor applied to the proposal deviation when the best fit improves.
    /// Must be at least 1.
    pub sd_minimizer: f64,
    /// Stop once the best weighted error falls below this value.
    pub break_criteria: f64,
    /// Complexity penalty applied to the raw comparison error.
    pub assessment: Assessment,
    /// Log a progress line every N iterations; 0 disables progress output.
    pub progress_every: usize,
    /// Sentinel marking missing values in the compared datasets.
    pub null_value: f64,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            t_init: 1.0,
            sd_init: 0.5,
            t_minimizer: 1.0,
            sd_minimizer: 1.0,
            break_criteria: 0.0,
            assessment: Assessment::default(),
            progress_every: 100,
            null_value: DEFAULT_NULL_VALUE,
        }
    }
}

impl AnnealingConfig {
    fn validate(&self) -> AgemResult<()> {
        if self.max_iterations == 0 {
            return Err(AgemError::Invariant(
                "max_iterations must be positive".to_string(),
            ));
        }
        if self.t_minimizer < 1.0 {
            return Err(AgemError::Invariant(format!(
                "t_minimizer must be >= 1, got {}",
                self.t_minimizer
            )));
        }
        if self.sd_minimizer < 1.0 {
            return Err(AgemError::Invariant(format!(
                "sd_minimizer must be >= 1, got {}",
                self.sd_minimizer
            )));
        }
        if !(self.t_init > 0.0) || !(self.sd_init > 0.0) {
            return Err(AgemError::Invariant(format!(
                "t_init and sd_init must be positive, got {} and {}",
                self.t_init, self.sd_init
            )));
        }
        Ok(())
    }
}

/// The persisted outcome of a calibration run: the best fit seen, not the
/// final state of the pipeline.
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// Best weighted error (raw comparison error times assessment factor).
    pub best_error: f64,
    /// Raw comparison error of the best fit.
    pub best_raw_error: f64,
    /// Assessment factor in effect when the best fit was taken.
    pub best_assessment_factor: f64,
    /// Per-stage XML parameter snapshots of the best fit, in chain order.
    pub best_xml: Vec<String>,
    /// Pipeline output of the best fit.
    pub best_output: DataSet,
    /// Akaike information criterion of the best fit.
    pub aic: f64,
    /// Bayesian information criterion of the best fit.
    pub bic: f64,
    /// Iterations actually run.
    pub iterations: usize,
    /// Accepted moves (improvements plus accepted poor moves).
    pub accepted: usize,
    /// The run tripped the divergence guard; the best fit is still the
    /// best seen, but callers should treat the calibration as failed.
    pub diverged: bool,
}

/// Temperature/σ-scheduled random search with best-fit retention.
///
/// Each iteration picks one stage with probability proportional to its
/// calibratable count, perturbs one of its scalars, re-runs the pipeline
/// and applies the Metropolis acceptance rule to the penalty-weighted
/// comparison error. Rejected moves are rolled back through the stage's
/// parameter rollback stack.
pub struct SimulatedAnnealing {
    config: AnnealingConfig,
}

impl SimulatedAnnealing {
    pub fn new(config: AnnealingConfig) -> AgemResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnnealingConfig {
        &self.config
    }

    /// Calibrate `model` against `reference`, reading inputs from `input`.
    ///
    /// The reference dataset must have an active scalar designated; the
    /// comparison pairs it with the terminal stage's result per cell.
    ///
    /// # Returns
    ///
    /// The best fit seen across all iterations. The model pipeline is left
    /// in its final (not necessarily best) state.
    pub fn calibrate(
        &self,
        model: &mut MetaModel,
        input: &DataSet,
        reference: &DataSet,
        rng: &mut dyn RngCore,
    ) -> AgemResult<CalibrationResult> {
        let counts = model.calibratable_counts();
        let total: usize = counts.iter().sum();
        if total == 0 {
            return Err(AgemError::Invariant(
                "the pipeline has no calibratable scalars".to_string(),
            ));
        }

        let mut output = model.run(input)?;
        let n = num_compared_pairs(&output, reference, self.config.null_value)?;
        let factor = self.config.assessment.factor(n, total);

        let raw = compare_datasets(&output, reference, true, self.config.null_value, false)?;
        let mut e_last = raw * factor;
        let mut best = BestFit {
            error: e_last,
            raw_error: raw,
            xml: model.snapshot_xml()?,
            output: output.clone(),
        };

        let mut temperature = self.config.t_init;
        let mut sigma = self.config.sd_init;
        let mut accepted = 0usize;
        let mut iterations = 0usize;
        let mut diverged = false;

        for iteration in 0..self.config.max_iterations {
            iterations = iteration + 1;

            let stage_index = pick_stage(&counts, total, rng);
            if !model
                .stage_mut(stage_index)
                .modify_parameter_randomly(sigma, rng)
            {
                // Proposal violated a shape invariant, nothing to roll back.
                continue;
            }

            output = model.run(input)?;
            let raw = compare_datasets(&output, reference, true, self.config.null_value, false)?;
            let e_new = raw * factor;
            let delta = e_new - e_last;

            if delta <= 0.0 {
                accepted += 1;
                e_last = e_new;
                if e_new < best.error {
                    best = BestFit {
                        error: e_new,
                        raw_error: raw,
                        xml: model.snapshot_xml()?,
                        output: output.clone(),
                    };
                    sigma /= self.config.sd_minimizer;
                }
            } else if rng.gen::<f64>() <= (-delta / temperature).exp() {
                accepted += 1;
                e_last = e_new;
                temperature /= self.config.t_minimizer;
            } else {
                model.stage_mut(stage_index).restore_last_modified();
            }

            if self.config.progress_every > 0 && iterations % self.config.progress_every == 0 {
                info!(
                    "iteration {}/{}: E {:e}, E_best {:e}, T {:e}, sigma {:e}, accepted {}",
                    iterations,
                    self.config.max_iterations,
                    e_last,
                    best.error,
                    temperature,
                    sigma,
                    accepted
                );
            }

            if best.error < self.config.break_criteria {
                info!(
                    "break criteria {:e} reached after {} iterations",
                    self.config.break_criteria, iterations
                );
                break;
            }
            if iterations >= DIVERGENCE_GRACE && best.error > DIVERGENCE_LIMIT {
                diverged = true;
                warn!(
                    "calibration diverged (E_best {:e} after {} iterations), returning best fit so far",
                    best.error, iterations
                );
                break;
            }
        }

        // The comparison error is √(Σd²)/n, so Σd² = (error·n)².
        let rss = (best.raw_error * n as f64).powi(2);
        let result = CalibrationResult {
            best_error: best.error,
            best_raw_error: best.raw_error,
            best_assessment_factor: factor,
            best_xml: best.xml,
            best_output: best.output,
            aic: aic(n, total, rss),
            bic: bic(n, total, rss),
            iterations,
            accepted,
            diverged,
        };
        info!(
            "calibration finished: E_best {:e}, AIC {:.4}, BIC {:.4}, assessment factor {:.6}, {} of {} moves accepted",
            result.best_error, result.aic, result.bic, result.best_assessment_factor, accepted, iterations
        );
        Ok(result)
    }
}

struct BestFit {
    error: f64,
    raw_error: f64,
    xml: Vec<String>,
    output: DataSet,
}

/// Pick a stage with probability proportional to its calibratable count.
fn pick_stage(counts: &[usize], total: usize, rng: &mut dyn RngCore) -> usize {
    let mut draw = rng.gen_range(0..total);
    for (index, &count) in counts.iter().enumerate() {
        if draw < count {
            return index;
        }
        draw -= count;
    }
    counts.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use agem_core::dataset::DataArray;
    use agem_core::weighting::{Weight, WeightingModel, WeightingModelOptions, WeightingScheme};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn one_weight_pipeline(initial: f64) -> MetaModel {
        let scheme = WeightingScheme::new(
            "scale",
            "Category",
            vec![Weight::new(0, 0.0, 10.0, initial)],
        );
        let mut meta = MetaModel::new();
        meta.push_stage(Box::new(WeightingModel::new(
            scheme,
            WeightingModelOptions {
                input_name: Some("Base".to_string()),
                ..Default::default()
            },
        )));
        meta
    }

    fn scale_problem(target_weight: f64) -> (DataSet, DataSet) {
        let num_cells = 20;
        let mut input = DataSet::new(num_cells);
        input
            .add_array(DataArray::from_int_values("Category", vec![0; num_cells]))
            .unwrap();
        input
            .add_array(DataArray::from_values(
                "Base",
                (0..num_cells).map(|i| 1.0 + i as f64 * 0.1).collect(),
            ))
            .unwrap();

        let mut reference = DataSet::new(num_cells);
        reference
            .add_array(DataArray::from_values(
                "Observed",
                (0..num_cells)
                    .map(|i| (1.0 + i as f64 * 0.1) * target_weight)
                    .collect(),
            ))
            .unwrap();
        reference.set_active_scalar("Observed").unwrap();
        (input, reference)
    }

    #[test]
    fn recovers_a_single_scale_factor() {
        let mut meta = one_weight_pipeline(5.0);
        let (input, reference) = scale_problem(2.0);
        let annealer = SimulatedAnnealing::new(AnnealingConfig {
            max_iterations: 3000,
            sd_init: 0.3,
            sd_minimizer: 1.05,
            t_minimizer: 1.05,
            break_criteria: 1e-6,
            progress_every: 0,
            ..Default::default()
        })
        .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let result = annealer
            .calibrate(&mut meta, &input, &reference, &mut rng)
            .unwrap();

        assert!(result.best_error < 1e-3, "E_best = {}", result.best_error);
        assert!(!result.diverged);
        let recovered = agem_core::xml::read_weighting_scheme(&result.best_xml[0]).unwrap();
        assert!((recovered.weights[0].value - 2.0).abs() < 0.05);
    }

    #[test]
    fn unreachable_reference_flags_divergence() {
        // The weight is bounded in [0, 10], so the error can never drop
        // below the divergence limit against this reference.
        let mut meta = one_weight_pipeline(5.0);
        let (input, mut reference) = scale_problem(2.0);
        let unreachable =
            DataArray::filled("Observed", reference.num_cells(), 1e25);
        reference.add_array(unreachable).unwrap();
        reference.set_active_scalar("Observed").unwrap();

        let annealer = SimulatedAnnealing::new(AnnealingConfig {
            max_iterations: 1000,
            progress_every: 0,
            ..Default::default()
        })
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let result = annealer
            .calibrate(&mut meta, &input, &reference, &mut rng)
            .unwrap();

        assert!(result.diverged);
        assert_eq!(result.iterations, 100);
        assert!(result.best_error > 1e20);
        // The best fit is still reported alongside the flag.
        assert_eq!(result.best_xml.len(), 1);
    }

    #[test]
    fn best_fit_never_worse_than_initial() {
        let mut meta = one_weight_pipeline(2.0);
        let (input, reference) = scale_problem(2.0);

        let initial_output = meta.run(&input).unwrap();
        let initial_error =
            compare_datasets(&initial_output, &reference, true, DEFAULT_NULL_VALUE, false).unwrap();

        let annealer = SimulatedAnnealing::new(AnnealingConfig {
            max_iterations: 200,
            progress_every: 0,
            ..Default::default()
        })
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let result = annealer
            .calibrate(&mut meta, &input, &reference, &mut rng)
            .unwrap();

        assert!(result.best_raw_error <= initial_error + 1e-12);
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        let mut meta = MetaModel::new();
        let (input, reference) = scale_problem(1.0);
        let annealer = SimulatedAnnealing::new(AnnealingConfig::default()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(matches!(
            annealer.calibrate(&mut meta, &input, &reference, &mut rng),
            Err(AgemError::Invariant(_))
        ));
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        assert!(SimulatedAnnealing::new(AnnealingConfig {
            t_minimizer: 0.5,
            ..Default::default()
        })
        .is_err());
        assert!(SimulatedAnnealing::new(AnnealingConfig {
            sd_minimizer: 0.0,
            ..Default::default()
        })
        .is_err());
        assert!(SimulatedAnnealing::new(AnnealingConfig {
            max_iterations: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn stage_pick_is_proportional() {
        let counts = vec![1, 0, 3];
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut hits = [0usize; 3];
        for _ in 0..4000 {
            hits[pick_stage(&counts, 4, &mut rng)] += 1;
        }
        assert_eq!(hits[1], 0);
        assert!(hits[2] > hits[0] * 2);
    }
}
