//! Deviance information criterion

use serde::{Deserialize, Serialize};

/// Model-comparison statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    pub dic: f64,
    /// Posterior mean deviance
    pub deviance: f64,
    /// Effective number of parameters
    pub pd: f64,
}

/// `pD = mean(D) - D(posterior mean)`, `DIC = mean(D) + pD`
pub fn compute_dic(deviance_draws: &[f64], deviance_at_mean: f64) -> Option<FitStatistics> {
    if deviance_draws.is_empty() {
        return None;
    }
    let mean = deviance_draws.iter().sum::<f64>() / deviance_draws.len() as f64;
    let pd = mean - deviance_at_mean;
    Some(FitStatistics {
        dic: mean + pd,
        deviance: mean,
        pd,
    })
}
