//! Model pipeline plumbing.
//!
//! A [`MetaModel`] is an ordered list of stages forming a linear chain: each
//! stage reads the accumulated dataset (the input plus every upstream
//! stage's output arrays) and appends its own result, which becomes the
//! active scalar for the next stage. The terminal stage's output is what the
//! calibrator compares against the reference.

use crate::dataset::DataSet;
use crate::errors::AgemResult;
use crate::parameter::Calibratable;

/// A parameterized model that maps a dataset to a dataset.
///
/// `run` must not mutate existing arrays of the input; it returns a copy of
/// the input with its result arrays appended and the result designated as
/// the active scalar. Two consecutive runs with unchanged parameters produce
/// identical output.
pub trait Model {
    /// Name of the result array this model emits.
    fn result_name(&self) -> &str;

    /// Evaluate the model over all cells.
    fn run(&self, input: &DataSet) -> AgemResult<DataSet>;
}

/// A pipeline stage: a model whose parameters the calibrator can search.
pub trait Stage: Model + Calibratable {
    /// XML representation of the stage's parameter object, used for
    /// best-fit snapshots.
    fn parameter_xml(&self) -> AgemResult<String>;
}

/// An ordered chain of calibratable stages with one terminal output.
#[derive(Default)]
pub struct MetaModel {
    stages: Vec<Box<dyn Stage>>,
}

impl MetaModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage to the end of the chain.
    pub fn push_stage(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, index: usize) -> &dyn Stage {
        self.stages[index].as_ref()
    }

    pub fn stage_mut(&mut self, index: usize) -> &mut dyn Stage {
        self.stages[index].as_mut()
    }

    /// Total calibratable scalar count across all stages.
    pub fn num_calibratable(&self) -> usize {
        self.stages.iter().map(|s| s.num_calibratable()).sum()
    }

    /// Per-stage calibratable counts, used for proportional stage selection.
    pub fn calibratable_counts(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.num_calibratable()).collect()
    }

    /// Run the chain, threading the accumulated dataset through the stages.
    pub fn run(&self, input: &DataSet) -> AgemResult<DataSet> {
        let mut dataset = input.clone();
        for stage in &self.stages {
            dataset = stage.run(&dataset)?;
        }
        Ok(dataset)
    }

    /// XML snapshots of every stage's parameter object, in chain order.
    pub fn snapshot_xml(&self) -> AgemResult<Vec<String>> {
        self.stages.iter().map(|s| s.parameter_xml()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataArray;
    use crate::fuzzy::{FuzzyInferenceScheme, FuzzyModel, FuzzyModelOptions};

    fn identity_stage() -> FuzzyModel {
        let scheme = FuzzyInferenceScheme::with_uniform_partition(
            "identity",
            &[("x", 0.0, 100.0, 2)],
            5.0,
            5.0,
        )
        .unwrap();
        FuzzyModel::new(scheme, FuzzyModelOptions::default())
    }

    #[test]
    fn chain_threads_actives_scalar() {
        let mut meta = MetaModel::new();
        meta.push_stage(Box::new(identity_stage()));

        let mut input = DataSet::new(4);
        input
            .add_array(DataArray::from_values("x", vec![10.0, 20.0, 30.0, 40.0]))
            .unwrap();

        let output = meta.run(&input).unwrap();
        assert_eq!(output.active_scalar_name(), Some("Result"));
        for i in 0..4 {
            assert_eq!(output.active_scalar().unwrap().get(i), 5.0);
        }
    }

    #[test]
    fn calibratable_counts_sum() {
        let mut meta = MetaModel::new();
        meta.push_stage(Box::new(identity_stage()));
        meta.push_stage(Box::new(identity_stage()));
        assert_eq!(
            meta.num_calibratable(),
            meta.calibratable_counts().iter().sum::<usize>()
        );
    }
}
