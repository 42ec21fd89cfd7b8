//! Dataset comparison metrics used as the calibration error.
//!
//! The calibrator reduces a model/reference dataset pair to one scalar:
//! `sqrt(sum((m_i - r_i)^2)) / n` over the non-null cell pairs of the two
//! active scalars. Temporal datasets compare step by step and average.

use crate::dataset::{DataArray, DataSet, TemporalDataSet};
use crate::errors::{AgemError, AgemResult};
use log::debug;

/// Arithmetic mean of the non-null values of an array.
pub fn mean(array: &DataArray, null_value: f64) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in array.iter() {
        if value != null_value {
            sum += value;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Two-pass sample variance of the non-null values of an array.
pub fn variance(array: &DataArray, null_value: f64) -> f64 {
    let m = mean(array, null_value);
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in array.iter() {
        if value != null_value {
            sum += (value - m) * (value - m);
            count += 1;
        }
    }
    if count < 2 {
        0.0
    } else {
        sum / (count - 1) as f64
    }
}

/// Sample standard deviation of the non-null values of an array.
pub fn std_dev(array: &DataArray, null_value: f64) -> f64 {
    variance(array, null_value).sqrt()
}

/// Compare two arrays cell by cell: `sqrt(sum(d^2)) / n` over non-null pairs.
pub fn compare_arrays(model: &DataArray, reference: &DataArray, null_value: f64) -> AgemResult<f64> {
    if model.len() != reference.len() {
        return Err(AgemError::Topology {
            expected: reference.len(),
            actual: model.len(),
        });
    }

    let mut squared_sum = 0.0;
    let mut count = 0usize;
    for i in 0..model.len() {
        let m = model.get(i);
        let r = reference.get(i);
        if m == null_value || r == null_value {
            continue;
        }
        squared_sum += (m - r) * (m - r);
        count += 1;
    }

    if count == 0 {
        return Err(AgemError::Numerical(
            "no comparable cell pairs, every pair has a null side".to_string(),
        ));
    }
    Ok(squared_sum.sqrt() / count as f64)
}

/// Compare one scalar array of each dataset.
///
/// With `use_active_scalar` set the designated active scalars are paired;
/// otherwise each dataset contributes its first array. With `verbose` set,
/// the per-comparison statistics are logged.
pub fn compare_datasets(
    model: &DataSet,
    reference: &DataSet,
    use_active_scalar: bool,
    null_value: f64,
    verbose: bool,
) -> AgemResult<f64> {
    if model.num_cells() != reference.num_cells() {
        return Err(AgemError::Topology {
            expected: reference.num_cells(),
            actual: model.num_cells(),
        });
    }
    let model_array = scalar_for_comparison(model, use_active_scalar)?;
    let reference_array = scalar_for_comparison(reference, use_active_scalar)?;
    let error = compare_arrays(model_array, reference_array, null_value)?;
    if verbose {
        debug!(
            "compared '{}' against '{}': error {:e}, model mean {:.6}, reference mean {:.6}",
            model_array.name(),
            reference_array.name(),
            error,
            mean(model_array, null_value),
            mean(reference_array, null_value),
        );
    }
    Ok(error)
}

fn scalar_for_comparison(dataset: &DataSet, use_active_scalar: bool) -> AgemResult<&DataArray> {
    if use_active_scalar {
        return dataset.active_scalar();
    }
    let name = dataset
        .array_names()
        .next()
        .ok_or_else(|| AgemError::Numerical("cannot compare an empty dataset".to_string()))?;
    dataset.array(name)
}

/// Count the cell pairs that enter a dataset comparison.
pub fn num_compared_pairs(model: &DataSet, reference: &DataSet, null_value: f64) -> AgemResult<usize> {
    let model_array = model.active_scalar()?;
    let reference_array = reference.active_scalar()?;
    let mut count = 0usize;
    for i in 0..model_array.len().min(reference_array.len()) {
        if model_array.get(i) != null_value && reference_array.get(i) != null_value {
            count += 1;
        }
    }
    Ok(count)
}

/// Compare two temporal datasets: the mean of the per-step errors.
pub fn compare_temporal(
    model: &TemporalDataSet,
    reference: &TemporalDataSet,
    null_value: f64,
) -> AgemResult<f64> {
    if model.num_steps() != reference.num_steps() {
        return Err(AgemError::Topology {
            expected: reference.num_steps(),
            actual: model.num_steps(),
        });
    }
    if model.num_steps() == 0 {
        return Err(AgemError::Numerical(
            "cannot compare empty temporal datasets".to_string(),
        ));
    }

    let mut sum = 0.0;
    for (m, r) in model.iter().zip(reference.iter()) {
        sum += compare_datasets(m, r, true, null_value, false)?;
    }
    Ok(sum / model.num_steps() as f64)
}
