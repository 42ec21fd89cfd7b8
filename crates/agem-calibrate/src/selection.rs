//! Sequential forward selection of model input factors.
//!
//! Starting from an empty factor list, each round tries every remaining
//! pool factor at every candidate set count, calibrates the resulting
//! fuzzy inference scheme from scratch and keeps the addition with the
//! lowest BIC of the calibrated fit. Rounds continue while the score
//! improves, up to a configurable search depth.

use crate::annealer::{AnnealingConfig, CalibrationResult, SimulatedAnnealing};
use agem_core::dataset::DataSet;
use agem_core::errors::{AgemError, AgemResult};
use agem_core::fuzzy::{FuzzyInferenceScheme, FuzzyModel, FuzzyModelOptions};
use agem_core::pipeline::MetaModel;
use log::{debug, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// One input factor available to the selection search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorCandidate {
    /// Name of the input array in the dataset.
    pub name: String,
    pub min: f64,
    pub max: f64,
}

/// Configuration of the forward-selection search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Fuzzy set counts tried for each candidate factor.
    pub set_counts: Vec<usize>,
    /// Maximum number of factors added to the model.
    pub search_depth: usize,
    /// Response range of the candidate schemes.
    pub response_min: f64,
    pub response_max: f64,
    /// Annealing schedule used to calibrate each candidate.
    pub annealing: AnnealingConfig,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            set_counts: vec![2, 3, 4, 5],
            search_depth: 4,
            response_min: 0.0,
            response_max: 1.0,
            annealing: AnnealingConfig::default(),
        }
    }
}

/// Outcome of the forward-selection search.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// Chosen factors with their set counts, in the order they were added.
    pub factors: Vec<(FactorCandidate, usize)>,
    /// BIC of the winning configuration.
    pub best_score: f64,
    /// The calibrated winning scheme.
    pub scheme: FuzzyInferenceScheme,
    /// Full calibration outcome of the winning configuration.
    pub calibration: CalibrationResult,
}

/// Run sequential forward selection over `pool`.
///
/// # Arguments
///
/// * `pool` - Candidate input factors; each must name an array in `input`
/// * `input` - Input dataset shared by all candidate calibrations
/// * `reference` - Reference dataset with an active scalar to fit against
/// * `config` - Search and annealing configuration
/// * `rng` - Randomness source, consumed sequentially across candidates
pub fn select(
    pool: &[FactorCandidate],
    input: &DataSet,
    reference: &DataSet,
    config: &SelectionConfig,
    rng: &mut dyn RngCore,
) -> AgemResult<SelectionResult> {
    if pool.is_empty() {
        return Err(AgemError::Invariant(
            "factor selection requires a non-empty candidate pool".to_string(),
        ));
    }
    if config.set_counts.is_empty() {
        return Err(AgemError::Invariant(
            "factor selection requires at least one candidate set count".to_string(),
        ));
    }
    let annealer = SimulatedAnnealing::new(config.annealing.clone())?;

    let mut chosen: Vec<(FactorCandidate, usize)> = Vec::new();
    let mut best: Option<(f64, FuzzyInferenceScheme, CalibrationResult)> = None;

    for round in 0..config.search_depth.min(pool.len()) {
        let mut round_best: Option<(f64, usize, usize, FuzzyInferenceScheme, CalibrationResult)> =
            None;

        for (pool_index, candidate) in pool.iter().enumerate() {
            if chosen.iter().any(|(c, _)| c.name == candidate.name) {
                continue;
            }
            for &num_sets in &config.set_counts {
                let mut layout: Vec<(&str, f64, f64, usize)> = chosen
                    .iter()
                    .map(|(c, k)| (c.name.as_str(), c.min, c.max, *k))
                    .collect();
                layout.push((candidate.name.as_str(), candidate.min, candidate.max, num_sets));

                let scheme = FuzzyInferenceScheme::with_uniform_partition(
                    "selection",
                    &layout,
                    config.response_min,
                    config.response_max,
                )?;
                let mut meta = MetaModel::new();
                meta.push_stage(Box::new(FuzzyModel::new(
                    scheme,
                    FuzzyModelOptions {
                        null_value: config.annealing.null_value,
                        ..Default::default()
                    },
                )));

                let calibration = annealer.calibrate(&mut meta, input, reference, rng)?;
                let score = calibration.bic;
                debug!(
                    "candidate '{}' with {} sets: BIC {:.4}, E_best {:e}",
                    candidate.name, num_sets, score, calibration.best_error
                );

                if round_best.as_ref().map_or(true, |(s, ..)| score < *s) {
                    let scheme =
                        agem_core::xml::read_fuzzy_scheme(&calibration.best_xml[0])?;
                    round_best = Some((score, pool_index, num_sets, scheme, calibration));
                }
            }
        }

        let (score, pool_index, num_sets, scheme, calibration) = match round_best {
            Some(found) => found,
            None => break,
        };
        if let Some((best_score, ..)) = &best {
            if score >= *best_score {
                info!(
                    "selection stopped after round {}: no addition improves BIC {:.4}",
                    round + 1,
                    best_score
                );
                break;
            }
        }

        info!(
            "round {}: added factor '{}' with {} sets, BIC {:.4}",
            round + 1,
            pool[pool_index].name,
            num_sets,
            score
        );
        chosen.push((pool[pool_index].clone(), num_sets));
        best = Some((score, scheme, calibration));
    }

    let (best_score, scheme, calibration) = best.ok_or_else(|| {
        AgemError::Error("factor selection produced no calibrated candidate".to_string())
    })?;
    Ok(SelectionResult {
        factors: chosen,
        best_score,
        scheme,
        calibration,
    })
}
