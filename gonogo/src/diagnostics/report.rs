//! Plain-text posterior report

use super::dic::FitStatistics;
use super::mcmc::ParamSummary;
use std::fmt::Write;

/// R-hat above this value is flagged
pub const RHAT_WARNING: f64 = 1.01;

/// Render the stats table followed by the DIC lines
///
/// One row per parameter with mean, std, the five quantiles and MC error.
pub fn format_stats(
    summaries: &[ParamSummary],
    fit: Option<&FitStatistics>,
    n_divergent: usize,
) -> String {
    let width = summaries
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "",
        "mean",
        "std",
        "2.5q",
        "25q",
        "50q",
        "75q",
        "97.5q",
        "mc err",
        width = width
    );
    for s in summaries {
        let _ = write!(out, "{:<width$} {:>10.6} {:>10.6}", s.name, s.mean, s.std, width = width);
        for q in &s.quantiles {
            let _ = write!(out, " {:>10.6}", q);
        }
        let _ = writeln!(out, " {:>10.6}", s.mc_err);
    }

    let flagged: Vec<&ParamSummary> = summaries
        .iter()
        .filter(|s| s.rhat.map_or(false, |r| r > RHAT_WARNING))
        .collect();
    if !flagged.is_empty() {
        let _ = writeln!(out);
        for s in flagged {
            if let Some(rhat) = s.rhat {
                let _ = writeln!(out, "WARNING: R-hat of {} is {:.3}", s.name, rhat);
            }
        }
    }
    if n_divergent > 0 {
        let _ = writeln!(out, "WARNING: {} divergent transitions", n_divergent);
    }

    if let Some(fit) = fit {
        let _ = writeln!(out, "DIC: {:.6}", fit.dic);
        let _ = writeln!(out, "deviance: {:.6}", fit.deviance);
        let _ = writeln!(out, "pD: {:.6}", fit.pd);
    }
    out
}

/// Print the stats table to stdout
pub fn print_stats(summaries: &[ParamSummary], fit: Option<&FitStatistics>, n_divergent: usize) {
    print!("{}", format_stats(summaries, fit, n_divergent));
}
