//! Posterior summaries extracted from CmdStan output
//!
//! This module provides functionality to:
//! - Parse CmdStan CSV output files
//! - Compute mean, sd, quantiles and Monte Carlo error per parameter
//!   (population sd, order-statistic quantiles, 5-batch means)
//! - Compute R-hat when several chains are available
//! - Count divergent transitions

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quantiles reported for every parameter
pub const QUANTILES: [f64; 5] = [0.025, 0.25, 0.5, 0.75, 0.975];

/// Batches used for the batch-means Monte Carlo error
pub const MC_ERROR_BATCHES: usize = 5;

/// Errors during diagnostics computation
#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

/// Posterior statistics for a single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    /// Values at [`QUANTILES`]
    pub quantiles: [f64; 5],
    pub mc_err: f64,
    /// Only available with more than one chain
    pub rhat: Option<f64>,
}

/// Draws of every column, split by chain
#[derive(Debug, Clone, PartialEq)]
pub struct Draws {
    pub columns: Vec<String>,
    /// chain -> draw -> column
    pub chains: Vec<Vec<Vec<f64>>>,
    pub n_divergent: usize,
}

impl Draws {
    /// Parse and stack CmdStan CSV files, one per chain
    pub fn from_files<P: AsRef<Path>>(files: &[P]) -> Result<Self, DiagnosticsError> {
        let mut chains: Vec<ChainData> = Vec::with_capacity(files.len());
        for file in files {
            let content = std::fs::read_to_string(file.as_ref()).map_err(|e| {
                DiagnosticsError::Io(format!("Cannot read {}: {}", file.as_ref().display(), e))
            })?;
            chains.push(parse_cmdstan_csv(&content)?);
        }
        Self::from_chains(chains)
    }

    /// Parse a single chain from CSV text
    pub fn from_csv_str(content: &str) -> Result<Self, DiagnosticsError> {
        Self::from_chains(vec![parse_cmdstan_csv(content)?])
    }

    fn from_chains(chains: Vec<ChainData>) -> Result<Self, DiagnosticsError> {
        let first = chains
            .first()
            .ok_or_else(|| DiagnosticsError::InsufficientData("no chains".to_string()))?;
        let columns = first.columns.clone();

        if chains.iter().any(|c| c.columns != columns) {
            return Err(DiagnosticsError::Parse(
                "chains have different columns".to_string(),
            ));
        }
        if chains.iter().any(|c| c.draws.is_empty()) {
            return Err(DiagnosticsError::InsufficientData(
                "chain without draws".to_string(),
            ));
        }

        Ok(Self {
            n_divergent: chains.iter().map(|c| c.n_divergent).sum(),
            chains: chains.into_iter().map(|c| c.draws).collect(),
            columns,
        })
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn n_draws(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    /// Draws of one column, per chain
    pub fn column(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.chains
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[idx]).collect())
                .collect(),
        )
    }

    /// Posterior mean of one column
    pub fn mean(&self, name: &str) -> Option<f64> {
        let per_chain = self.column(name)?;
        Some(compute_mean(&per_chain))
    }

    /// Summary of one column, reported under `display` name
    pub fn summarize(&self, name: &str, display: &str) -> Option<ParamSummary> {
        let per_chain = self.column(name)?;
        let flat: Vec<f64> = per_chain.iter().flatten().copied().collect();

        let mean = compute_mean(&per_chain);
        let quantiles = compute_quantiles(&flat, &QUANTILES);

        Some(ParamSummary {
            name: display.to_string(),
            mean,
            std: compute_sd(&flat, mean),
            quantiles: [
                quantiles[0],
                quantiles[1],
                quantiles[2],
                quantiles[3],
                quantiles[4],
            ],
            mc_err: compute_mc_error(&flat, MC_ERROR_BATCHES),
            rhat: (per_chain.len() > 1).then(|| compute_rhat(&per_chain)),
        })
    }
}

/// Internal structure for chain data
struct ChainData {
    columns: Vec<String>,
    draws: Vec<Vec<f64>>,
    n_divergent: usize,
}

/// Parse CmdStan CSV content
///
/// Sampler diagnostics (`*__`) are dropped except for counting divergences.
fn parse_cmdstan_csv(content: &str) -> Result<ChainData, DiagnosticsError> {
    let mut lines = content.lines();

    // Skip comment lines starting with #
    let mut header_line = None;
    for line in lines.by_ref() {
        if !line.starts_with('#') && !line.trim().is_empty() {
            header_line = Some(line);
            break;
        }
    }

    let header =
        header_line.ok_or_else(|| DiagnosticsError::Parse("No header found in CSV".to_string()))?;

    let all_names: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();

    let divergent_idx = all_names.iter().position(|s| s == "divergent__");

    let param_indices: Vec<usize> = all_names
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.ends_with("__"))
        .map(|(idx, _)| idx)
        .collect();
    let columns: Vec<String> = param_indices.iter().map(|&i| all_names[i].clone()).collect();

    let mut draws = Vec::new();
    let mut n_divergent = 0;

    for line in lines {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let values: Vec<&str> = line.split(',').collect();
        if values.len() != all_names.len() {
            return Err(DiagnosticsError::Parse(format!(
                "row has {} fields, header has {}",
                values.len(),
                all_names.len()
            )));
        }

        if let Some(idx) = divergent_idx {
            if let Ok(val) = values[idx].trim().parse::<f64>() {
                if val > 0.5 {
                    n_divergent += 1;
                }
            }
        }

        let mut draw = Vec::with_capacity(param_indices.len());
        for &param_idx in &param_indices {
            let val: f64 = values[param_idx]
                .trim()
                .parse()
                .map_err(|e| DiagnosticsError::Parse(format!("Cannot parse value: {}", e)))?;
            draw.push(val);
        }
        draws.push(draw);
    }

    Ok(ChainData {
        columns,
        draws,
        n_divergent,
    })
}

/// Compute mean across all chains
fn compute_mean(draws_per_chain: &[Vec<f64>]) -> f64 {
    let (sum, n) = draws_per_chain
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 {
        return 0.0;
    }
    sum / n as f64
}

/// Population standard deviation (divides by n)
fn compute_sd(draws: &[f64], mean: f64) -> f64 {
    if draws.is_empty() {
        return 0.0;
    }
    let variance = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws.len() as f64;
    variance.sqrt()
}

/// Batch-means standard error of the mean
///
/// The trace is cut into `batches` equal pieces (the remainder is
/// dropped); the error is the population sd of the batch means divided by
/// `sqrt(batches)`.
fn compute_mc_error(draws: &[f64], batches: usize) -> f64 {
    let size = draws.len() / batches;
    if size == 0 {
        return f64::NAN;
    }
    let means: Vec<f64> = draws
        .chunks_exact(size)
        .take(batches)
        .map(|b| b.iter().sum::<f64>() / size as f64)
        .collect();
    let grand = means.iter().sum::<f64>() / batches as f64;
    let var = means.iter().map(|m| (m - grand).powi(2)).sum::<f64>() / batches as f64;
    var.sqrt() / (batches as f64).sqrt()
}

/// Compute R-hat (potential scale reduction factor)
fn compute_rhat(draws_per_chain: &[Vec<f64>]) -> f64 {
    let n_chains = draws_per_chain.len();
    if n_chains < 2 {
        return 1.0; // Cannot compute with single chain
    }

    let n_draws = draws_per_chain.iter().map(Vec::len).min().unwrap_or(0);
    if n_draws < 2 {
        return 1.0;
    }

    // Within-chain variance
    let mut within_var = 0.0;
    for chain in draws_per_chain {
        let chain = &chain[..n_draws];
        let chain_mean = chain.iter().sum::<f64>() / n_draws as f64;
        let chain_var =
            chain.iter().map(|x| (x - chain_mean).powi(2)).sum::<f64>() / (n_draws - 1) as f64;
        within_var += chain_var;
    }
    within_var /= n_chains as f64;

    // Between-chain variance
    let chain_means: Vec<f64> = draws_per_chain
        .iter()
        .map(|chain| chain[..n_draws].iter().sum::<f64>() / n_draws as f64)
        .collect();

    let grand_mean = chain_means.iter().sum::<f64>() / chain_means.len() as f64;
    let between_var = chain_means
        .iter()
        .map(|m| (m - grand_mean).powi(2))
        .sum::<f64>()
        * n_draws as f64
        / (n_chains - 1) as f64;

    if within_var == 0.0 {
        return 1.0;
    }

    // Pooled variance estimate
    let var_plus = ((n_draws - 1) as f64 * within_var + between_var) / n_draws as f64;
    (var_plus / within_var).sqrt()
}

/// Quantiles as order statistics: the `floor(n * p)`-th smallest draw
fn compute_quantiles(draws: &[f64], probs: &[f64]) -> Vec<f64> {
    if draws.is_empty() {
        return vec![f64::NAN; probs.len()];
    }
    let mut sorted = draws.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    probs
        .iter()
        .map(|&p| {
            let idx = (p.clamp(0.0, 1.0) * n as f64).floor() as usize;
            sorted[idx.min(n - 1)]
        })
        .collect()
}
