// Go/No-go two-session diffusion experiment CLI
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gonogo::codegen::generate_stan;
use gonogo::config::ExperimentConfig;
use gonogo::dataset::Dataset;
use gonogo::diagnostics::print_stats;
use gonogo::experiment::{compile_model, fit, recovery, simulate, write_dataset, FitReport};
use gonogo::recovery::format_recovery;

#[derive(Parser)]
#[command(name = "gonogo")]
#[command(version = "0.1.0")]
#[command(
    about = "Simulate a two-session Go/No-go diffusion experiment and fit a hierarchical regression",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    overrides: Overrides,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate, write the CSV, fit and report (default)
    Run,

    /// Simulate both sessions and write the CSV
    Simulate,

    /// Fit an existing dataset
    Fit {
        /// CSV produced by `simulate`
        #[arg(long, value_name = "CSV")]
        data: PathBuf,
    },

    /// Write the Stan program for a dataset
    EmitStan {
        #[arg(long, value_name = "CSV")]
        data: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short = 'o', long = "out", value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

/// Settings that override the config file
#[derive(Args)]
struct Overrides {
    /// JSON experiment configuration
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Number of subjects
    #[arg(long, global = true)]
    subjects: Option<usize>,

    /// Trials per condition per subject
    #[arg(long, global = true)]
    trials: Option<usize>,

    /// Iterations per chain, burn-in included
    #[arg(long, global = true)]
    samples: Option<usize>,

    #[arg(long, global = true)]
    burn: Option<usize>,

    #[arg(long, global = true)]
    chains: Option<usize>,

    /// Dataset CSV path
    #[arg(long, global = true, value_name = "CSV")]
    output: Option<PathBuf>,

    /// Directory for the Stan program, inputs and chain output
    #[arg(long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,
}

impl Overrides {
    fn resolve(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(n) = self.subjects {
            config.n_subjects = n;
        }
        if let Some(n) = self.trials {
            config.trials_per_level = n;
        }
        if let Some(n) = self.samples {
            config.sampler.samples = n;
        }
        if let Some(n) = self.burn {
            config.sampler.burn = n;
        }
        if let Some(n) = self.chains {
            config.sampler.chains = n;
        }
        if let Some(path) = &self.output {
            config.output = path.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "gonogo=debug" } else { "gonogo=info" };
    let filter = EnvFilter::try_from_env("GONOGO_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.overrides.resolve()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_command(&config),
        Commands::Simulate => simulate_command(&config),
        Commands::Fit { data } => fit_command(&config, data),
        Commands::EmitStan { data, out } => emit_stan_command(&config, data, out),
    }
}

fn run_command(config: &ExperimentConfig) -> Result<()> {
    let sim = simulate(config)?;
    write_dataset(config, &sim.data)?;

    let (model, report) = fit(config, &sim.data, Some(sim.seed))?;
    print_report(&report);

    let rows = recovery(config, &model, &sim.data, &report)?;
    println!();
    print!("{}", format_recovery(&rows));
    Ok(())
}

fn simulate_command(config: &ExperimentConfig) -> Result<()> {
    let sim = simulate(config)?;
    write_dataset(config, &sim.data)?;

    println!("seed: {}", sim.seed);
    for (idx, cells) in sim.subject_params.iter().enumerate() {
        println!("session {}", idx + 1);
        for cell in cells {
            let p = &cell.params;
            println!(
                "  subj {:>3} {:<6} v={:.4} a={:.4} t={:.4} z={:.4}",
                cell.subj_idx, cell.condition, p.v, p.a, p.t, p.z
            );
        }
    }
    Ok(())
}

fn fit_command(config: &ExperimentConfig, data: PathBuf) -> Result<()> {
    let dataset = Dataset::from_csv(&data)?;
    info!(path = %data.display(), rows = dataset.len(), "dataset loaded");
    let (_, report) = fit(config, &dataset, config.seed)?;
    print_report(&report);
    Ok(())
}

fn emit_stan_command(
    config: &ExperimentConfig,
    data: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let dataset = Dataset::from_csv(&data)?;
    let model = compile_model(config, &dataset)?;
    let code = generate_stan(&model);
    match output {
        Some(path) => {
            fs::write(&path, code).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Stan program written");
        }
        None => print!("{}", code),
    }
    Ok(())
}

fn print_report(report: &FitReport) {
    print_stats(&report.summaries, report.fit.as_ref(), report.n_divergent);
}
