//! Posterior diagnostics and reporting
//!
//! This module provides tools for:
//! - Posterior summaries and MCMC quality metrics (MC error, R-hat, divergences)
//! - Deviance information criterion
//! - The printed stats table

pub mod dic;
pub mod mcmc;
pub mod report;

pub use dic::{compute_dic, FitStatistics};
pub use mcmc::{Draws, DiagnosticsError, ParamSummary, MC_ERROR_BATCHES, QUANTILES};
pub use report::{format_stats, print_stats, RHAT_WARNING};
