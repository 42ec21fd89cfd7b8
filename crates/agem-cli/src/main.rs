//! AGEM command line tools.
//!
//! Datasets are exchanged as JSON serializations of [`DataSet`] (and, for
//! the equilibrium command, [`TemporalDataSet`]); parameter objects as the
//! XML documents the `agem-core` and `agem-rothc` crates read and write.
//!
//! # Usage
//!
//! ```bash
//! agem model --scheme n2o.xml --input sites.json --output modeled.json
//! agem calibrate --scheme n2o.xml --input sites.json \
//!   --reference measured.json --reference-array N2O --output fit/
//! agem select --input sites.json --reference measured.json \
//!   --reference-array N2O --output selected/
//! agem equilibrium --params rothc.xml --climate climate.json \
//!   --target soc.json --output equilibrium.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use agem_calibrate::{
    select, AnnealingConfig, Assessment, CalibrationResult, FactorCandidate, SelectionConfig,
    SimulatedAnnealing,
};
use agem_core::dataset::{DataArray, DataSet, TemporalDataSet};
use agem_core::fuzzy::{FuzzyModel, FuzzyModelOptions};
use agem_core::pipeline::{MetaModel, Stage};
use agem_core::weighting::{WeightingModel, WeightingModelOptions};
use agem_core::xml::{
    read_fuzzy_scheme, read_weighted_fuzzy_scheme, read_weighting_scheme, write_fuzzy_scheme,
};
use agem_core::{AgemError, DEFAULT_NULL_VALUE};
use agem_rothc::{read_rothc, run_equilibrium, EquilibriumOptions, Pools, RothCModel};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Agricultural greenhouse-gas emission modeling tools
#[derive(Parser, Debug)]
#[command(name = "agem")]
#[command(about = "Fuzzy emission models, calibration and RothC soil carbon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a model pipeline over a dataset
    Model(ModelArgs),
    /// Calibrate a model pipeline against a reference dataset
    Calibrate(CalibrateArgs),
    /// Forward-select input factors for a fuzzy scheme
    Select(SelectArgs),
    /// Search the plant input reproducing a target soil carbon
    Equilibrium(EquilibriumArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AssessmentArg {
    Aic,
    Bic,
    Both,
}

impl From<AssessmentArg> for Assessment {
    fn from(value: AssessmentArg) -> Self {
        match value {
            AssessmentArg::Aic => Assessment::Aic,
            AssessmentArg::Bic => Assessment::Bic,
            AssessmentArg::Both => Assessment::Both,
        }
    }
}

/// Annealing schedule flags shared by `calibrate` and `select`.
#[derive(Args, Debug)]
struct AnnealArgs {
    /// Maximum annealing iterations
    #[arg(long, default_value_t = 5000)]
    iterations: usize,

    /// Initial acceptance temperature
    #[arg(long, default_value_t = 1.0)]
    t_init: f64,

    /// Initial relative proposal deviation
    #[arg(long, default_value_t = 0.5)]
    sd_init: f64,

    /// Temperature divisor applied on accepted poor moves (>= 1)
    #[arg(long, default_value_t = 1.0)]
    t_minimizer: f64,

    /// Deviation divisor applied on improvements (>= 1)
    #[arg(long, default_value_t = 1.0)]
    sd_minimizer: f64,

    /// Stop once the best weighted error falls below this
    #[arg(long, default_value_t = 0.0)]
    break_criteria: f64,

    /// Complexity penalty weighting the comparison error
    #[arg(long, value_enum, default_value_t = AssessmentArg::Bic)]
    assessment: AssessmentArg,

    /// Sentinel marking missing values
    #[arg(long, default_value_t = DEFAULT_NULL_VALUE)]
    null_value: f64,

    /// Random number generator seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl AnnealArgs {
    fn config(&self) -> AnnealingConfig {
        AnnealingConfig {
            max_iterations: self.iterations,
            t_init: self.t_init,
            sd_init: self.sd_init,
            t_minimizer: self.t_minimizer,
            sd_minimizer: self.sd_minimizer,
            break_criteria: self.break_criteria,
            assessment: self.assessment.into(),
            null_value: self.null_value,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Parameter XML of each pipeline stage, in chain order
    #[arg(long = "scheme", required = true)]
    schemes: Vec<PathBuf>,

    /// Input dataset (JSON)
    #[arg(long)]
    input: PathBuf,

    /// Output dataset file (JSON)
    #[arg(long)]
    output: PathBuf,

    /// Emit the per-cell Sigma array
    #[arg(long)]
    with_sigma: bool,

    /// Emit per-rule DOF arrays
    #[arg(long)]
    with_dof: bool,

    /// Shard cell evaluation across worker threads
    #[arg(long)]
    parallel: bool,

    /// Sentinel marking missing values
    #[arg(long, default_value_t = DEFAULT_NULL_VALUE)]
    null_value: f64,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Parameter XML of each pipeline stage, in chain order
    #[arg(long = "scheme", required = true)]
    schemes: Vec<PathBuf>,

    /// Input dataset (JSON)
    #[arg(long)]
    input: PathBuf,

    /// Reference dataset (JSON)
    #[arg(long)]
    reference: PathBuf,

    /// Reference array to fit against; the dataset's active scalar when omitted
    #[arg(long)]
    reference_array: Option<String>,

    /// Output directory for best-fit XML snapshots and the modeled dataset
    #[arg(long)]
    output: PathBuf,

    #[command(flatten)]
    anneal: AnnealArgs,
}

#[derive(Args, Debug)]
struct SelectArgs {
    /// Input dataset (JSON)
    #[arg(long)]
    input: PathBuf,

    /// Reference dataset (JSON)
    #[arg(long)]
    reference: PathBuf,

    /// Reference array to fit against; the dataset's active scalar when omitted
    #[arg(long)]
    reference_array: Option<String>,

    /// Candidate factor names; all input arrays when omitted
    #[arg(long, value_delimiter = ',')]
    factors: Vec<String>,

    /// Fuzzy set counts tried per factor
    #[arg(long, value_delimiter = ',', default_values_t = [2usize, 3, 4, 5])]
    set_counts: Vec<usize>,

    /// Maximum number of factors added to the model
    #[arg(long, default_value_t = 4)]
    search_depth: usize,

    /// Response range lower bound of candidate schemes
    #[arg(long, default_value_t = 0.0)]
    response_min: f64,

    /// Response range upper bound of candidate schemes
    #[arg(long, default_value_t = 1.0)]
    response_max: f64,

    /// Output directory for the winning scheme and its modeled dataset
    #[arg(long)]
    output: PathBuf,

    #[command(flatten)]
    anneal: AnnealArgs,
}

#[derive(Args, Debug)]
struct EquilibriumArgs {
    /// RothC parameter XML
    #[arg(long)]
    params: PathBuf,

    /// Cyclic year of 12 monthly climate datasets (JSON)
    #[arg(long)]
    climate: PathBuf,

    /// Dataset holding the target soil carbon (JSON)
    #[arg(long)]
    target: PathBuf,

    /// Target soil carbon array name
    #[arg(long, default_value = "SoilCarbon")]
    target_array: String,

    /// Output dataset file (JSON)
    #[arg(long)]
    output: PathBuf,

    /// Outer iteration budget
    #[arg(long, default_value_t = 100)]
    max_runs: usize,

    /// Years simulated per objective evaluation
    #[arg(long, default_value_t = 100)]
    years_per_run: usize,

    /// Lower bracket of the annual carbon input (t C/ha)
    #[arg(long, default_value_t = 0.0)]
    input_min: f64,

    /// Upper bracket of the annual carbon input (t C/ha)
    #[arg(long, default_value_t = 20.0)]
    input_max: f64,

    /// Position tolerance of the root search
    #[arg(long, default_value_t = 1e-3)]
    tol: f64,

    /// Squared SOC residual below which a cell counts as converged
    #[arg(long, default_value_t = 0.01)]
    residual_threshold: f64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Model(args) => run_pipeline(&args),
        Command::Calibrate(args) => calibrate(&args),
        Command::Select(args) => select_factors(&args),
        Command::Equilibrium(args) => equilibrium(&args),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_pipeline(args: &ModelArgs) -> CliResult {
    let input = load_dataset(&args.input)?;
    let fuzzy_options = FuzzyModelOptions {
        null_value: args.null_value,
        with_sigma: args.with_sigma,
        with_dof: args.with_dof,
        parallel: args.parallel,
        ..Default::default()
    };
    let model = load_pipeline(&args.schemes, &fuzzy_options)?;

    let output = model.run(&input)?;
    save_dataset(&args.output, &output)?;
    println!(
        "Modeled {} cells through {} stages into {}",
        output.num_cells(),
        model.num_stages(),
        args.output.display()
    );
    Ok(())
}

fn calibrate(args: &CalibrateArgs) -> CliResult {
    let input = load_dataset(&args.input)?;
    let reference = load_reference(&args.reference, args.reference_array.as_deref())?;
    let fuzzy_options = FuzzyModelOptions {
        null_value: args.anneal.null_value,
        ..Default::default()
    };
    let mut model = load_pipeline(&args.schemes, &fuzzy_options)?;

    let annealer = SimulatedAnnealing::new(args.anneal.config())?;
    let mut rng = ChaCha8Rng::seed_from_u64(args.anneal.seed);
    let result = annealer.calibrate(&mut model, &input, &reference, &mut rng)?;

    fs::create_dir_all(&args.output)?;
    for (i, xml) in result.best_xml.iter().enumerate() {
        fs::write(args.output.join(format!("stage-{}.xml", i)), xml)?;
    }
    save_dataset(&args.output.join("modeled.json"), &result.best_output)?;
    print_calibration(&result);
    check_divergence(&result)
}

fn select_factors(args: &SelectArgs) -> CliResult {
    let input = load_dataset(&args.input)?;
    let reference = load_reference(&args.reference, args.reference_array.as_deref())?;

    let names: Vec<String> = if args.factors.is_empty() {
        input.array_names().map(str::to_string).collect()
    } else {
        args.factors.clone()
    };
    let mut pool = Vec::with_capacity(names.len());
    for name in &names {
        let array = input.array(name)?;
        pool.push(FactorCandidate {
            name: name.clone(),
            min: array_min(array, args.anneal.null_value),
            max: array_max(array, args.anneal.null_value),
        });
    }

    let config = SelectionConfig {
        set_counts: args.set_counts.clone(),
        search_depth: args.search_depth,
        response_min: args.response_min,
        response_max: args.response_max,
        annealing: args.anneal.config(),
    };
    let mut rng = ChaCha8Rng::seed_from_u64(args.anneal.seed);
    let result = select(&pool, &input, &reference, &config, &mut rng)?;

    fs::create_dir_all(&args.output)?;
    fs::write(
        args.output.join("scheme.xml"),
        write_fuzzy_scheme(&result.scheme)?,
    )?;
    save_dataset(&args.output.join("modeled.json"), &result.calibration.best_output)?;

    println!("Selected {} factors (BIC {:.4}):", result.factors.len(), result.best_score);
    for (candidate, num_sets) in &result.factors {
        println!(
            "  {} [{}, {}] with {} sets",
            candidate.name, candidate.min, candidate.max, num_sets
        );
    }
    print_calibration(&result.calibration);
    check_divergence(&result.calibration)
}

fn equilibrium(args: &EquilibriumArgs) -> CliResult {
    let xml = fs::read_to_string(&args.params)?;
    let model = RothCModel::new(read_rothc(&xml)?)?;
    let climate: TemporalDataSet = serde_json::from_str(&fs::read_to_string(&args.climate)?)?;
    let target = load_dataset(&args.target)?;
    let target_soc: Vec<f64> = target.array(&args.target_array)?.iter().collect();

    let options = EquilibriumOptions {
        max_runs: args.max_runs,
        years_per_run: args.years_per_run,
        input_min: args.input_min,
        input_max: args.input_max,
        tol: args.tol,
        residual_threshold: args.residual_threshold,
    };
    let result = run_equilibrium(&model, &climate, &target_soc, &options)?;

    save_dataset(&args.output, &equilibrium_dataset(&result)?)?;
    println!(
        "{} of {} cells converged in {} runs",
        result.num_converged(),
        target_soc.len(),
        result.runs
    );
    Ok(())
}

/// Build the stage chain from parameter XML files, dispatching on each
/// document's root element. A WeightedFuzzyInferenceScheme expands into a
/// fuzzy stage followed by a weighting stage on its output.
fn load_pipeline(
    schemes: &[PathBuf],
    fuzzy_options: &FuzzyModelOptions,
) -> Result<MetaModel, Box<dyn std::error::Error>> {
    let weighting_options = WeightingModelOptions {
        null_value: fuzzy_options.null_value,
        ..Default::default()
    };

    let mut model = MetaModel::new();
    for path in schemes {
        let xml = fs::read_to_string(path)?;
        for stage in load_stages(&xml, path, fuzzy_options, &weighting_options)? {
            model.push_stage(stage);
        }
    }
    Ok(model)
}

fn load_stages(
    xml: &str,
    path: &Path,
    fuzzy_options: &FuzzyModelOptions,
    weighting_options: &WeightingModelOptions,
) -> Result<Vec<Box<dyn Stage>>, Box<dyn std::error::Error>> {
    // Longest root name first: the shorter ones are prefixes of it.
    if xml.contains("<WeightedFuzzyInferenceScheme") {
        let scheme = read_weighted_fuzzy_scheme(xml)?;
        info!("{}: weighted fuzzy scheme '{}'", path.display(), scheme.name);
        return Ok(vec![
            Box::new(FuzzyModel::new(scheme.fuzzy, fuzzy_options.clone())),
            Box::new(WeightingModel::new(
                scheme.weighting,
                weighting_options.clone(),
            )),
        ]);
    }
    if xml.contains("<FuzzyInferenceScheme") {
        let scheme = read_fuzzy_scheme(xml)?;
        info!("{}: fuzzy scheme '{}'", path.display(), scheme.name);
        return Ok(vec![Box::new(FuzzyModel::new(scheme, fuzzy_options.clone()))]);
    }
    if xml.contains("<Weighting") {
        let scheme = read_weighting_scheme(xml)?;
        info!("{}: weighting scheme '{}'", path.display(), scheme.name);
        return Ok(vec![Box::new(WeightingModel::new(
            scheme,
            weighting_options.clone(),
        ))]);
    }
    Err(format!("{}: unrecognized parameter document", path.display()).into())
}

fn load_dataset(path: &Path) -> Result<DataSet, Box<dyn std::error::Error>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn load_reference(
    path: &Path,
    array: Option<&str>,
) -> Result<DataSet, Box<dyn std::error::Error>> {
    let mut reference = load_dataset(path)?;
    if let Some(name) = array {
        reference.set_active_scalar(name)?;
    }
    Ok(reference)
}

fn save_dataset(path: &Path, dataset: &DataSet) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(dataset)?;
    fs::write(path, format!("{}\n", json))?;
    Ok(())
}

/// Diverged runs still write their best fit, but the process must report
/// failure.
fn check_divergence(result: &CalibrationResult) -> CliResult {
    if result.diverged {
        return Err(AgemError::Divergence {
            error: result.best_error,
            iterations: result.iterations,
        }
        .into());
    }
    Ok(())
}

fn print_calibration(result: &CalibrationResult) {
    println!(
        "Best fit: error {:.6} (raw {:.6}, penalty {:.4}) after {} iterations, {} accepted",
        result.best_error,
        result.best_raw_error,
        result.best_assessment_factor,
        result.iterations,
        result.accepted
    );
    println!("AIC {:.4}  BIC {:.4}", result.aic, result.bic);
}

fn equilibrium_dataset(
    result: &agem_rothc::EquilibriumResult,
) -> Result<DataSet, Box<dyn std::error::Error>> {
    let num_cells = result.soil_carbon.len();
    let mut ds = DataSet::new(num_cells);
    ds.add_array(DataArray::from_values("SoilCarbon", result.soil_carbon.clone()))?;
    ds.add_array(DataArray::from_values(
        "AnnualInput",
        result.annual_input.clone(),
    ))?;
    ds.add_array(DataArray::from_values("Residual", result.residual.clone()))?;
    ds.add_array(DataArray::from_int_values(
        "Converged",
        result.converged.iter().map(|&c| c as i64).collect(),
    ))?;
    let Pools {
        dpm,
        rpm,
        bio,
        hum,
        iom,
    } = result.pools.clone();
    ds.add_array(DataArray::from_values("DPM", dpm))?;
    ds.add_array(DataArray::from_values("RPM", rpm))?;
    ds.add_array(DataArray::from_values("BIO", bio))?;
    ds.add_array(DataArray::from_values("HUM", hum))?;
    ds.add_array(DataArray::from_values("IOM", iom))?;
    ds.set_active_scalar("SoilCarbon")?;
    Ok(ds)
}

fn array_min(array: &DataArray, null_value: f64) -> f64 {
    array
        .iter()
        .filter(|&v| v != null_value)
        .fold(f64::INFINITY, f64::min)
}

fn array_max(array: &DataArray, null_value: f64) -> f64 {
    array
        .iter()
        .filter(|&v| v != null_value)
        .fold(f64::NEG_INFINITY, f64::max)
}
