//! Stan execution
//!
//! This module provides functionality to:
//! - Detect cmdstan installation
//! - Compile a Stan program to an executable
//! - Run MCMC chains with a fixed number of iterations and burn-in

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Configuration for MCMC sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Total iterations per chain, burn-in included
    pub samples: usize,
    /// Leading iterations discarded as warmup
    pub burn: usize,
    /// Number of chains to run
    pub chains: usize,
    /// Random seed for reproducibility
    pub seed: Option<u32>,
    /// Adapt delta (target acceptance rate)
    pub adapt_delta: f64,
    /// Maximum tree depth
    pub max_treedepth: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples: 2000,
            burn: 200,
            chains: 1,
            seed: None,
            adapt_delta: 0.8,
            max_treedepth: 10,
        }
    }
}

impl SamplerConfig {
    /// Iterations kept per chain
    pub fn retained(&self) -> usize {
        self.samples.saturating_sub(self.burn)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            bail!("at least one chain is required");
        }
        if self.samples <= self.burn {
            bail!(
                "samples ({}) must exceed burn ({})",
                self.samples,
                self.burn
            );
        }
        if !(self.adapt_delta > 0.0 && self.adapt_delta < 1.0) {
            bail!("adapt_delta must lie in (0, 1), got {}", self.adapt_delta);
        }
        Ok(())
    }
}

/// Files handed to a Stan executable
#[derive(Debug, Clone)]
pub struct StanInputs {
    pub data_file: PathBuf,
    pub init_file: Option<PathBuf>,
}

/// Detect cmdstan installation
pub fn detect_cmdstan() -> Result<PathBuf> {
    // Try CMDSTAN environment variable
    if let Ok(path) = std::env::var("CMDSTAN") {
        let cmdstan_path = PathBuf::from(&path);
        if cmdstan_path.exists() {
            return Ok(cmdstan_path);
        }
    }

    let home = std::env::var("HOME").context("HOME not set")?;
    let versioned_roots = [format!("{}/.cmdstan", home), format!("{}/cmdstan", home)];
    for root in &versioned_roots {
        if let Some(latest) = latest_subdir(Path::new(root)) {
            return Ok(latest);
        }
    }

    for path in ["/usr/local/cmdstan", "/opt/cmdstan"] {
        let cmdstan_path = PathBuf::from(path);
        if cmdstan_path.exists() {
            return Ok(cmdstan_path);
        }
    }

    bail!("cmdstan not found. Please set CMDSTAN environment variable or install cmdstan")
}

/// Most recent version directory under an install root
fn latest_subdir(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    let mut versions: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    versions.sort();
    versions.pop()
}

/// Compile a Stan model to executable
///
/// The executable is placed next to the `.stan` file and reused while it
/// is newer than the source.
pub fn compile_stan_model(stan_file: &Path, cmdstan_path: &Path) -> Result<PathBuf> {
    let stan_file = stan_file
        .canonicalize()
        .with_context(|| format!("Stan file not found: {}", stan_file.display()))?;
    let model_name = stan_file
        .file_stem()
        .context("Invalid Stan file name")?
        .to_string_lossy()
        .to_string();

    let exe_path = stan_file.with_extension("");

    if exe_path.exists() {
        let stan_modified = fs::metadata(&stan_file)?.modified()?;
        let exe_modified = fs::metadata(&exe_path)?.modified()?;
        if exe_modified > stan_modified {
            debug!(model = %model_name, "reusing compiled Stan model");
            return Ok(exe_path);
        }
    }

    info!(model = %model_name, cmdstan = %cmdstan_path.display(), "compiling Stan model");

    let output = Command::new("make")
        .current_dir(cmdstan_path)
        .arg(exe_path.to_string_lossy().to_string())
        .output()
        .context("Failed to execute make")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Stan compilation failed:\n{}", stderr);
    }

    info!(exe = %exe_path.display(), "compilation successful");
    Ok(exe_path)
}

/// Run MCMC sampling; returns one CSV file per chain
pub fn run_stan_mcmc(
    exe_path: &Path,
    inputs: &StanInputs,
    output_dir: &Path,
    config: &SamplerConfig,
) -> Result<Vec<PathBuf>> {
    config.validate()?;
    fs::create_dir_all(output_dir).context("Failed to create output directory")?;

    let mut chain_files = Vec::new();

    info!(
        chains = config.chains,
        samples = config.samples,
        burn = config.burn,
        "running MCMC sampling"
    );

    for chain_id in 1..=config.chains {
        let output_file = output_dir.join(format!("output_{}.csv", chain_id));

        debug!(chain = chain_id, of = config.chains, "starting chain");

        let output = Command::new(exe_path)
            .args(chain_args(inputs, &output_file, chain_id, config))
            .output()
            .context("Failed to execute Stan model")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Chain {} failed:\n{}", chain_id, stderr);
        }

        chain_files.push(output_file);
    }

    info!("MCMC sampling complete");
    Ok(chain_files)
}

/// Full CmdStan command line for one chain
///
/// Chain `k` is seeded with `seed + k`.
pub fn chain_args(
    inputs: &StanInputs,
    output_file: &Path,
    chain_id: usize,
    config: &SamplerConfig,
) -> Vec<String> {
    let mut args = sample_args(config);
    args.push("data".to_string());
    args.push(format!("file={}", inputs.data_file.display()));

    if let Some(init) = &inputs.init_file {
        args.push(format!("init={}", init.display()));
    }

    args.push("output".to_string());
    args.push(format!("file={}", output_file.display()));
    args.push(format!("id={}", chain_id));

    if let Some(seed) = config.seed {
        args.push("random".to_string());
        args.push(format!("seed={}", seed.wrapping_add(chain_id as u32)));
    }
    args
}

/// `sample` method arguments for the CmdStan command line
fn sample_args(config: &SamplerConfig) -> Vec<String> {
    vec![
        "sample".to_string(),
        format!("num_warmup={}", config.burn),
        format!("num_samples={}", config.retained()),
        "adapt".to_string(),
        format!("delta={}", config.adapt_delta),
        "algorithm=hmc".to_string(),
        "engine=nuts".to_string(),
        format!("max_depth={}", config.max_treedepth),
    ]
}
