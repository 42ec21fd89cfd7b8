//! Monthly RothC pool dynamics.
//!
//! Five pools per cell: decomposable plant material (DPM), resistant plant
//! material (RPM), microbial biomass (BIO), humified organic matter (HUM)
//! and inert organic matter (IOM). Each month every active pool loses
//! `P · (1 − exp(−k·a·b·c/12))`; the decayed carbon splits into CO₂ and
//! BIO/HUM according to the clay-dependent partition ratio. Monthly carbon
//! inputs are split into the pools by the plant and fertilizer fractions.

use crate::parameters::RothCParameters;
use agem_core::dataset::{DataSet, TemporalDataSet};
use agem_core::errors::{AgemError, AgemResult};

/// Fraction of retained decayed carbon that goes to BIO (the rest to HUM).
const BIO_FRACTION: f64 = 0.46;

/// Input array names read from each monthly climate dataset.
pub mod arrays {
    pub const MEAN_TEMPERATURE: &str = "MeanTemperature";
    pub const SOIL_COVER: &str = "SoilCover";
    pub const SOIL_MOISTURE_DEFICIT: &str = "SoilMoistureDeficit";
    pub const MAX_SOIL_MOISTURE_DEFICIT: &str = "MaxSoilMoistureDeficit";
    pub const CLAY: &str = "Clay";
    pub const PLANT_INPUT: &str = "PlantInput";
    pub const FERTILIZER_INPUT: &str = "FertilizerInput";
}

/// Per-cell pool state in t C/ha.
#[derive(Debug, Clone)]
pub struct Pools {
    pub dpm: Vec<f64>,
    pub rpm: Vec<f64>,
    pub bio: Vec<f64>,
    pub hum: Vec<f64>,
    pub iom: Vec<f64>,
}

impl Pools {
    pub fn zeros(num_cells: usize) -> Self {
        Self {
            dpm: vec![0.0; num_cells],
            rpm: vec![0.0; num_cells],
            bio: vec![0.0; num_cells],
            hum: vec![0.0; num_cells],
            iom: vec![0.0; num_cells],
        }
    }

    pub fn num_cells(&self) -> usize {
        self.dpm.len()
    }

    /// Total soil organic carbon of one cell, inert pool included.
    pub fn soil_carbon(&self, cell: usize) -> f64 {
        self.dpm[cell] + self.rpm[cell] + self.bio[cell] + self.hum[cell] + self.iom[cell]
    }

    /// Initialise the inert pool from target SOC via the Falloon equation
    /// `IOM = 0.049 · SOC^1.139`.
    pub fn set_iom_from_soc(&mut self, target_soc: &[f64]) {
        for (iom, &soc) in self.iom.iter_mut().zip(target_soc) {
            *iom = 0.049 * soc.max(0.0).powf(1.139);
        }
    }
}

/// The RothC kinetics over a pool state.
#[derive(Debug, Clone)]
pub struct RothCModel {
    params: RothCParameters,
}

impl RothCModel {
    pub fn new(params: RothCParameters) -> AgemResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &RothCParameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut RothCParameters {
        &mut self.params
    }

    /// Temperature rate modifier `a = a1 / (1 + exp(a2 / (T + a3)))`.
    ///
    /// Below the singularity at `T = -a3` decomposition stops.
    pub fn rate_modifier_a(&self, temperature: f64) -> f64 {
        let p = &self.params;
        if temperature + p.a3.value <= 0.0 {
            return 0.0;
        }
        p.a1.value / (1.0 + (p.a2.value / (temperature + p.a3.value)).exp())
    }

    /// Moisture rate modifier from the accumulated topsoil moisture
    /// deficit: `b2` while the deficit is below `b3 · max`, falling
    /// linearly to `b1` at the maximum deficit.
    pub fn rate_modifier_b(&self, deficit: f64, max_deficit: f64) -> f64 {
        let p = &self.params;
        if max_deficit <= 0.0 {
            return p.b2.value;
        }
        let threshold = p.b3.value * max_deficit;
        if deficit <= threshold {
            return p.b2.value;
        }
        let span = max_deficit - threshold;
        if span <= 0.0 {
            return p.b1.value;
        }
        let t = ((max_deficit - deficit) / span).clamp(0.0, 1.0);
        p.b1.value + (p.b2.value - p.b1.value) * t
    }

    /// Soil cover rate modifier: retarded under a crop, full when bare.
    pub fn rate_modifier_c(&self, covered: bool) -> f64 {
        if covered {
            self.params.c_covered.value
        } else {
            self.params.c_bare.value
        }
    }

    /// CO₂/(BIO+HUM) partition ratio
    /// `x = x1 · (x2 + x3 · exp(−0.0786 · clay))` for clay in percent.
    pub fn co2_ratio(&self, clay: f64) -> f64 {
        let p = &self.params;
        p.x1.value * (p.x2.value + p.x3.value * (-0.0786 * clay.max(0.0)).exp())
    }

    /// Advance all cells by one month.
    ///
    /// `climate` supplies the per-cell input arrays named in [`arrays`];
    /// `extra_plant_input` is an optional additional monthly carbon input
    /// per cell (the tunable of the equilibrium driver).
    pub fn step_month(
        &self,
        pools: &mut Pools,
        climate: &DataSet,
        extra_plant_input: Option<&[f64]>,
    ) -> AgemResult<()> {
        let num_cells = pools.num_cells();
        if climate.num_cells() != num_cells {
            return Err(AgemError::Topology {
                expected: num_cells,
                actual: climate.num_cells(),
            });
        }
        if let Some(extra) = extra_plant_input {
            if extra.len() != num_cells {
                return Err(AgemError::Topology {
                    expected: num_cells,
                    actual: extra.len(),
                });
            }
        }

        let temperature = climate.array(arrays::MEAN_TEMPERATURE)?;
        let cover = climate.array(arrays::SOIL_COVER)?;
        let deficit = climate.array(arrays::SOIL_MOISTURE_DEFICIT)?;
        let max_deficit = climate.array(arrays::MAX_SOIL_MOISTURE_DEFICIT)?;
        let clay = climate.array(arrays::CLAY)?;
        let plant_input = climate.array(arrays::PLANT_INPUT)?;
        let fertilizer_input = climate.array(arrays::FERTILIZER_INPUT)?;

        let p = &self.params;
        for cell in 0..num_cells {
            let a = self.rate_modifier_a(temperature.get(cell));
            let b = self.rate_modifier_b(deficit.get(cell), max_deficit.get(cell));
            let c = self.rate_modifier_c(cover.get_int(cell) != 0);
            let abc = a * b * c / 12.0;

            let x = self.co2_ratio(clay.get(cell));
            let retained = 1.0 / (x + 1.0);

            // Pool decay.
            let mut to_bio_hum = 0.0;
            for (pool, k) in [
                (&mut pools.dpm[cell], p.k_dpm.value),
                (&mut pools.rpm[cell], p.k_rpm.value),
                (&mut pools.bio[cell], p.k_bio.value),
                (&mut pools.hum[cell], p.k_hum.value),
            ] {
                let loss = *pool * (1.0 - (-k * abc).exp());
                *pool -= loss;
                to_bio_hum += loss * retained;
            }
            pools.bio[cell] += to_bio_hum * BIO_FRACTION;
            pools.hum[cell] += to_bio_hum * (1.0 - BIO_FRACTION);

            // Carbon inputs.
            let plant = plant_input.get(cell)
                + extra_plant_input.map_or(0.0, |extra| extra[cell]);
            pools.dpm[cell] += plant * p.plant.dpm.value;
            pools.rpm[cell] += plant * p.plant.rpm.value;
            pools.hum[cell] += plant * p.plant.hum.value;

            let fertilizer = fertilizer_input.get(cell);
            pools.dpm[cell] += fertilizer * p.fertilizer.dpm.value;
            pools.rpm[cell] += fertilizer * p.fertilizer.rpm.value;
            pools.hum[cell] += fertilizer * p.fertilizer.hum.value;
        }
        Ok(())
    }

    /// Run one cyclic year from 12 monthly climate datasets.
    ///
    /// `extra_plant_input` is in t C/ha/year and distributed evenly over
    /// the months.
    pub fn run_year(
        &self,
        pools: &mut Pools,
        months: &TemporalDataSet,
        extra_plant_input: Option<&[f64]>,
    ) -> AgemResult<()> {
        if months.num_steps() != 12 {
            return Err(AgemError::Topology {
                expected: 12,
                actual: months.num_steps(),
            });
        }
        let monthly: Option<Vec<f64>> =
            extra_plant_input.map(|extra| extra.iter().map(|v| v / 12.0).collect());
        for month in 0..12 {
            self.step_month(pools, months.step(month), monthly.as_deref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agem_core::dataset::DataArray;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn model() -> RothCModel {
        RothCModel::new(RothCParameters::default()).unwrap()
    }

    fn climate_month(num_cells: usize, temperature: f64, plant_input: f64) -> DataSet {
        let mut ds = DataSet::new(num_cells);
        ds.add_array(DataArray::filled(arrays::MEAN_TEMPERATURE, num_cells, temperature))
            .unwrap();
        ds.add_array(DataArray::from_int_values(
            arrays::SOIL_COVER,
            vec![1; num_cells],
        ))
        .unwrap();
        ds.add_array(DataArray::filled(arrays::SOIL_MOISTURE_DEFICIT, num_cells, 0.0))
            .unwrap();
        ds.add_array(DataArray::filled(
            arrays::MAX_SOIL_MOISTURE_DEFICIT,
            num_cells,
            40.0,
        ))
        .unwrap();
        ds.add_array(DataArray::filled(arrays::CLAY, num_cells, 23.4))
            .unwrap();
        ds.add_array(DataArray::filled(arrays::PLANT_INPUT, num_cells, plant_input))
            .unwrap();
        ds.add_array(DataArray::filled(arrays::FERTILIZER_INPUT, num_cells, 0.0))
            .unwrap();
        ds
    }

    #[test]
    fn temperature_modifier_matches_reference_points() {
        let model = model();
        // At 9.25 °C the RothC temperature factor is close to 1.
        assert_relative_eq!(model.rate_modifier_a(9.25), 1.0, max_relative = 0.05);
        assert!(model.rate_modifier_a(25.0) > model.rate_modifier_a(5.0));
        assert_eq!(model.rate_modifier_a(-20.0), 0.0);
    }

    #[test]
    fn moisture_modifier_interpolates() {
        let model = model();
        assert_eq!(model.rate_modifier_b(0.0, 40.0), 1.0);
        assert_eq!(model.rate_modifier_b(10.0, 40.0), 1.0);
        assert_abs_diff_eq!(model.rate_modifier_b(40.0, 40.0), 0.2, epsilon = 1e-12);
        let mid = model.rate_modifier_b(30.0, 40.0);
        assert!(mid > 0.2 && mid < 1.0);
    }

    #[test]
    fn co2_ratio_decreases_with_clay() {
        let model = model();
        assert!(model.co2_ratio(5.0) > model.co2_ratio(50.0));
        // Clay-free soil: x = x1 * (x2 + x3).
        assert_relative_eq!(model.co2_ratio(0.0), 1.67 * (1.85 + 1.60), max_relative = 1e-12);
    }

    #[test]
    fn pools_decay_without_input() {
        let model = model();
        let mut pools = Pools::zeros(1);
        pools.dpm[0] = 5.0;
        pools.rpm[0] = 10.0;

        let climate = climate_month(1, 15.0, 0.0);
        let before = pools.soil_carbon(0);
        model.step_month(&mut pools, &climate, None).unwrap();
        let after = pools.soil_carbon(0);

        assert!(after < before);
        // DPM decays much faster than RPM.
        assert!(pools.dpm[0] / 5.0 < pools.rpm[0] / 10.0);
        // Some decayed carbon is retained as BIO and HUM.
        assert!(pools.bio[0] > 0.0);
        assert!(pools.hum[0] > 0.0);
    }

    #[test]
    fn inputs_split_by_plant_fractions() {
        let model = model();
        let mut pools = Pools::zeros(1);
        let climate = climate_month(1, -30.0, 1.0);

        // Decomposition frozen, only the input split is visible.
        model.step_month(&mut pools, &climate, None).unwrap();
        assert_abs_diff_eq!(pools.dpm[0], 0.59, epsilon = 1e-12);
        assert_abs_diff_eq!(pools.rpm[0], 0.41, epsilon = 1e-12);
        assert_eq!(pools.hum[0], 0.0);
    }

    #[test]
    fn yearly_run_approaches_steady_state() {
        let model = model();
        let mut months = TemporalDataSet::new();
        for _ in 0..12 {
            months.push_step(climate_month(4, 10.0, 0.2)).unwrap();
        }

        let mut pools = Pools::zeros(4);
        let mut last = 0.0;
        let mut deltas = Vec::new();
        for _ in 0..50 {
            model.run_year(&mut pools, &months, None).unwrap();
            let soc = pools.soil_carbon(0);
            deltas.push(soc - last);
            last = soc;
        }
        // Yearly gains shrink toward equilibrium.
        assert!(deltas[49] < deltas[1]);
        assert!(deltas[49] > 0.0);
    }

    #[test]
    fn iom_follows_falloon() {
        let mut pools = Pools::zeros(2);
        pools.set_iom_from_soc(&[20.0, 80.0]);
        assert_relative_eq!(pools.iom[0], 0.049 * 20f64.powf(1.139), max_relative = 1e-12);
        assert!(pools.iom[1] > pools.iom[0]);
    }
}
