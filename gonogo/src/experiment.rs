//! Experiment driver: simulate both sessions, write the CSV, fit, report

use crate::codegen::{generate_stan, stan_data, stan_inits, DEVIANCE_COLUMN};
use crate::config::ExperimentConfig;
use crate::datagen::{gen_rand_data, SubjectParams};
use crate::dataset::Dataset;
use crate::diagnostics::{compute_dic, Draws, FitStatistics, ParamSummary};
use crate::recovery::{recovery_table, RecoveryRow};
use crate::regression::{CompiledModel, ModelSpec, ParameterPoint};
use crate::stanrun::{
    compile_stan_model, detect_cmdstan, run_stan_mcmc, SamplerConfig, StanInputs,
};
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Simulated dataset together with the parameters that produced it
#[derive(Debug, Clone)]
pub struct Simulation {
    pub data: Dataset,
    /// Per session, the parameters of every (subject, condition) cell
    pub subject_params: Vec<Vec<SubjectParams>>,
    pub seed: u64,
    pub no_response: usize,
}

/// Everything the fit prints
#[derive(Debug, Clone)]
pub struct FitReport {
    pub summaries: Vec<ParamSummary>,
    pub fit: Option<FitStatistics>,
    pub n_divergent: usize,
    pub point: ParameterPoint,
}

/// Files the Stan executable consumes
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub stan_file: PathBuf,
    pub inputs: StanInputs,
}

/// Generate every session and merge them into one labelled table
pub fn simulate(config: &ExperimentConfig) -> Result<Simulation> {
    let seed = config.seed.unwrap_or_else(rand::random);
    if config.seed.is_none() {
        info!(seed, "no seed configured, drew one from entropy");
    }
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let generate = config.generate_config();

    let mut sessions = Vec::with_capacity(config.sessions.len());
    let mut subject_params = Vec::with_capacity(config.sessions.len());
    for (idx, conditions) in config.sessions.iter().enumerate() {
        let (trials, params) = gen_rand_data(conditions, &generate, &mut rng)
            .with_context(|| format!("simulating session {}", idx + 1))?;
        debug!(session = idx + 1, trials = trials.len(), "session simulated");
        sessions.push(trials);
        subject_params.push(params);
    }

    let mut data = Dataset::from_sessions(sessions);
    let no_response = data.mark_no_response();
    info!(
        rows = data.len(),
        no_response,
        subjects = config.n_subjects,
        "dataset generated"
    );

    Ok(Simulation {
        data,
        subject_params,
        seed,
        no_response,
    })
}

/// Build the model for `data` from the configured regressions
pub fn compile_model(config: &ExperimentConfig, data: &Dataset) -> Result<CompiledModel> {
    let spec = ModelSpec::new(&config.regressions, &config.include)
        .context("invalid regression specification")?;
    let model = CompiledModel::compile(&spec, data).context("building design matrices")?;
    for reg in &model.regressions {
        debug!(
            formula = %reg.spec.formula.source,
            link = %reg.spec.link.describe(),
            columns = ?reg.design.columns,
            "regression compiled"
        );
    }
    Ok(model)
}

/// Write the Stan program, data and inits into `work_dir`
pub fn write_model_files(
    model: &CompiledModel,
    data: &Dataset,
    work_dir: &Path,
) -> Result<ModelFiles> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("creating work directory {}", work_dir.display()))?;

    let stan_file = work_dir.join("model.stan");
    let data_file = work_dir.join("data.json");
    let init_file = work_dir.join("inits.json");

    write_if_changed(&stan_file, &generate_stan(model))?;
    fs::write(&data_file, serde_json::to_string(&stan_data(model, data))?)
        .with_context(|| format!("writing {}", data_file.display()))?;
    fs::write(
        &init_file,
        serde_json::to_string_pretty(&stan_inits(model, data))?,
    )
    .with_context(|| format!("writing {}", init_file.display()))?;

    Ok(ModelFiles {
        stan_file,
        inputs: StanInputs {
            data_file,
            init_file: Some(init_file),
        },
    })
}

/// Keeps the timestamp, and so the compiled executable, when the program is unchanged
fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    if fs::read_to_string(path).map_or(false, |old| old == content) {
        return Ok(());
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

/// Sampler settings for a run seeded with `run_seed`
///
/// An explicit sampler seed wins; otherwise CmdStan is seeded with the low
/// 32 bits of the run seed.
pub fn sampler_config(config: &ExperimentConfig, run_seed: Option<u64>) -> SamplerConfig {
    let mut sampler = config.sampler.clone();
    if sampler.seed.is_none() {
        sampler.seed = run_seed.map(|seed| seed as u32);
    }
    sampler
}

/// Fit the hierarchical model with CmdStan and summarise the posterior
///
/// `run_seed` is the seed the data were simulated with, if any.
pub fn fit(
    config: &ExperimentConfig,
    data: &Dataset,
    run_seed: Option<u64>,
) -> Result<(CompiledModel, FitReport)> {
    let model = compile_model(config, data)?;
    let files = write_model_files(&model, data, &config.work_dir)?;

    let sampler = sampler_config(config, run_seed);
    match sampler.seed {
        Some(seed) => info!(seed, "sampler seed"),
        None => info!("sampler unseeded, CmdStan picks its own seed"),
    }

    let cmdstan = detect_cmdstan()?;
    let exe = compile_stan_model(&files.stan_file, &cmdstan)?;
    let chain_files = run_stan_mcmc(&exe, &files.inputs, &config.work_dir, &sampler)?;

    let draws = Draws::from_files(&chain_files).context("reading CmdStan output")?;
    let report = summarize(&model, data, &draws)?;
    Ok((model, report))
}

/// Posterior summaries and DIC from the sampler draws
pub fn summarize(model: &CompiledModel, data: &Dataset, draws: &Draws) -> Result<FitReport> {
    let mut summaries = Vec::new();
    for column in model.reported_columns() {
        let display = model.display_name(&column).unwrap_or_else(|| column.clone());
        match draws.summarize(&column, &display) {
            Some(summary) => summaries.push(summary),
            None => warn!(column = %column, "column missing from sampler output"),
        }
    }

    let point: ParameterPoint = draws
        .columns
        .iter()
        .filter_map(|c| draws.mean(c).map(|m| (c.clone(), m)))
        .collect();

    let fit = match draws.column(DEVIANCE_COLUMN) {
        Some(per_chain) => {
            let deviance: Vec<f64> = per_chain.into_iter().flatten().collect();
            let at_mean = model
                .deviance(data, &point)
                .context("evaluating deviance at the posterior mean")?;
            compute_dic(&deviance, at_mean)
        }
        None => {
            warn!("sampler output has no deviance column, DIC unavailable");
            None
        }
    };

    if draws.n_divergent > 0 {
        warn!(n = draws.n_divergent, "divergent transitions after warmup");
    }

    Ok(FitReport {
        summaries,
        fit,
        n_divergent: draws.n_divergent,
        point,
    })
}

/// Ground truth of the simulated sessions against the fitted group values
pub fn recovery(
    config: &ExperimentConfig,
    model: &CompiledModel,
    data: &Dataset,
    report: &FitReport,
) -> Result<Vec<RecoveryRow>> {
    recovery_table(model, data, &config.sessions, &report.point)
        .context("computing recovery table")
}

/// Write the merged dataset to the configured CSV path
pub fn write_dataset(config: &ExperimentConfig, data: &Dataset) -> Result<()> {
    data.write_csv(&config.output)?;
    info!(path = %config.output.display(), rows = data.len(), "dataset written");
    Ok(())
}
