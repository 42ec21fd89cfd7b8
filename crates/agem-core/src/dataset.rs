//! Cell-oriented datasets.
//!
//! A [`DataSet`] is an ordered collection of named data arrays over a fixed
//! number of cells. One array may be designated the "active scalar": the
//! value that flows between pipeline stages and into dataset comparison.
//!
//! Arrays are either double- or integer-valued. Integer arrays are read back
//! as `f64` for model consumption; category lookups round-trip through `i64`.

use crate::errors::{AgemError, AgemResult};
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

/// Storage backing a [`DataArray`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArrayData {
    Double(Vec<f64>),
    Int(Vec<i64>),
}

/// A named, typed column of per-cell values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataArray {
    name: String,
    data: ArrayData,
}

impl DataArray {
    /// Create a double array from values.
    pub fn from_values(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data: ArrayData::Double(values),
        }
    }

    /// Create an integer array from values.
    pub fn from_int_values(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            data: ArrayData::Int(values),
        }
    }

    /// Create a double array filled with a constant.
    pub fn filled(name: impl Into<String>, len: usize, value: f64) -> Self {
        Self::from_values(name, vec![value; len])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ArrayData::Double(v) => v.len(),
            ArrayData::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the i-th tuple as a double.
    pub fn get(&self, i: usize) -> f64 {
        match &self.data {
            ArrayData::Double(v) => v[i],
            ArrayData::Int(v) => v[i] as f64,
        }
    }

    /// Read the i-th tuple as an integer (doubles are truncated).
    pub fn get_int(&self, i: usize) -> i64 {
        match &self.data {
            ArrayData::Double(v) => v[i] as i64,
            ArrayData::Int(v) => v[i],
        }
    }

    /// Write the i-th tuple.
    pub fn set(&mut self, i: usize, value: f64) {
        match &mut self.data {
            ArrayData::Double(v) => v[i] = value,
            ArrayData::Int(v) => v[i] = value as i64,
        }
    }

    /// Iterate the values as doubles.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// An ordered collection of equally sized arrays over N cells.
///
/// Arrays are looked up by name; insertion order is preserved so that a
/// dataset serializes deterministically. Downstream pipeline stages may only
/// append arrays, never mutate existing ones in-place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    num_cells: usize,
    arrays: IndexMap<String, DataArray>,
    active_scalar: Option<String>,
}

impl DataSet {
    pub fn new(num_cells: usize) -> Self {
        Self {
            num_cells,
            arrays: IndexMap::new(),
            active_scalar: None,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn num_arrays(&self) -> usize {
        self.arrays.len()
    }

    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(|k| k.as_str())
    }

    pub fn has_array(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    /// Add an array to the dataset.
    ///
    /// The array length must match the cell count. Adding an array under a
    /// name that already exists replaces the previous array with a warning
    /// (last writer wins).
    pub fn add_array(&mut self, array: DataArray) -> AgemResult<()> {
        if array.len() != self.num_cells {
            return Err(AgemError::Topology {
                expected: self.num_cells,
                actual: array.len(),
            });
        }
        if self.arrays.contains_key(array.name()) {
            warn!("array '{}' already exists, replacing it", array.name());
        }
        self.arrays.insert(array.name().to_string(), array);
        Ok(())
    }

    pub fn array(&self, name: &str) -> AgemResult<&DataArray> {
        self.arrays.get(name).ok_or_else(|| AgemError::NameBinding {
            name: name.to_string(),
        })
    }

    pub fn array_mut(&mut self, name: &str) -> AgemResult<&mut DataArray> {
        self.arrays
            .get_mut(name)
            .ok_or_else(|| AgemError::NameBinding {
                name: name.to_string(),
            })
    }

    /// Designate an existing array as the active scalar.
    pub fn set_active_scalar(&mut self, name: &str) -> AgemResult<()> {
        if !self.arrays.contains_key(name) {
            return Err(AgemError::NameBinding {
                name: name.to_string(),
            });
        }
        self.active_scalar = Some(name.to_string());
        Ok(())
    }

    pub fn active_scalar_name(&self) -> Option<&str> {
        self.active_scalar.as_deref()
    }

    /// The active scalar array, if one has been designated.
    pub fn active_scalar(&self) -> AgemResult<&DataArray> {
        let name = self
            .active_scalar
            .as_deref()
            .ok_or_else(|| AgemError::Error("no active scalar designated".to_string()))?;
        self.array(name)
    }

    /// Build the union of several datasets sharing cell topology.
    ///
    /// All named arrays are copied into the result in argument order. On a
    /// name collision the last writer wins and a warning is logged. The
    /// active scalar of the last dataset that has one is carried over.
    pub fn join(datasets: &[&DataSet]) -> AgemResult<DataSet> {
        let first = datasets
            .first()
            .ok_or_else(|| AgemError::Error("join requires at least one dataset".to_string()))?;

        let mut result = DataSet::new(first.num_cells());
        for ds in datasets {
            if ds.num_cells() != result.num_cells() {
                return Err(AgemError::Topology {
                    expected: result.num_cells(),
                    actual: ds.num_cells(),
                });
            }
            for array in ds.arrays.values() {
                result.add_array(array.clone())?;
            }
            if let Some(name) = ds.active_scalar_name() {
                result.set_active_scalar(name)?;
            }
        }
        Ok(result)
    }
}

/// An ordered list of datasets sharing topology, one per time step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalDataSet {
    steps: Vec<DataSet>,
}

impl TemporalDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a time step, checking topology against the first step.
    pub fn push_step(&mut self, step: DataSet) -> AgemResult<()> {
        if let Some(first) = self.steps.first() {
            if step.num_cells() != first.num_cells() {
                return Err(AgemError::Topology {
                    expected: first.num_cells(),
                    actual: step.num_cells(),
                });
            }
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, i: usize) -> &DataSet {
        &self.steps[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataSet> {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> DataSet {
        let mut ds = DataSet::new(3);
        ds.add_array(DataArray::from_values("x", vec![1.0, 2.0, 3.0]))
            .unwrap();
        ds.add_array(DataArray::from_int_values("cat", vec![0, 1, 1]))
            .unwrap();
        ds
    }

    #[test]
    fn adding_and_reading() {
        let ds = sample_dataset();
        assert_eq!(ds.num_cells(), 3);
        assert_eq!(ds.array("x").unwrap().get(1), 2.0);
        assert_eq!(ds.array("cat").unwrap().get_int(2), 1);
        assert_eq!(ds.array("cat").unwrap().get(2), 1.0);
    }

    #[test]
    fn adding_wrong_length_is_topology_error() {
        let mut ds = sample_dataset();
        let err = ds
            .add_array(DataArray::from_values("y", vec![1.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            AgemError::Topology {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn adding_same_name_replaces() {
        let mut ds = sample_dataset();
        ds.add_array(DataArray::from_values("x", vec![9.0, 9.0, 9.0]))
            .unwrap();
        assert_eq!(ds.num_arrays(), 2);
        assert_eq!(ds.array("x").unwrap().get(0), 9.0);
    }

    #[test]
    fn active_scalar() {
        let mut ds = sample_dataset();
        assert!(ds.active_scalar().is_err());
        ds.set_active_scalar("x").unwrap();
        assert_eq!(ds.active_scalar().unwrap().name(), "x");
        assert!(ds.set_active_scalar("missing").is_err());
    }

    #[test]
    fn join_unions_arrays() {
        let a = sample_dataset();
        let mut b = DataSet::new(3);
        b.add_array(DataArray::from_values("y", vec![4.0, 5.0, 6.0]))
            .unwrap();
        b.set_active_scalar("y").unwrap();

        let joined = DataSet::join(&[&a, &b]).unwrap();
        assert_eq!(joined.num_arrays(), 3);
        assert_eq!(joined.active_scalar_name(), Some("y"));
    }

    #[test]
    fn join_rejects_topology_mismatch() {
        let a = sample_dataset();
        let b = DataSet::new(4);
        assert!(DataSet::join(&[&a, &b]).is_err());
    }

    #[test]
    fn temporal_topology_is_checked() {
        let mut temporal = TemporalDataSet::new();
        temporal.push_step(sample_dataset()).unwrap();
        assert!(temporal.push_step(DataSet::new(5)).is_err());
        assert_eq!(temporal.num_steps(), 1);
    }

    #[test]
    fn json_round_trip_preserves_types_and_order() {
        let mut ds = sample_dataset();
        ds.set_active_scalar("x").unwrap();

        let json = serde_json::to_string(&ds).unwrap();
        let reread: DataSet = serde_json::from_str(&json).unwrap();
        assert_eq!(reread.num_cells(), ds.num_cells());
        assert_eq!(
            reread.array_names().collect::<Vec<_>>(),
            ds.array_names().collect::<Vec<_>>()
        );
        assert_eq!(reread.array("x").unwrap().get(2), 3.0);
        assert_eq!(reread.array("cat").unwrap().get_int(1), 1);
        assert_eq!(reread.active_scalar_name(), Some("x"));
    }
}
