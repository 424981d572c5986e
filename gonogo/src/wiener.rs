//! Wiener first-passage likelihood
//!
//! Densities follow Navarro & Fuss (2009): the lower-boundary density of
//! the standardized process is evaluated with either the small-time or
//! the large-time series, whichever needs fewer terms for the requested
//! precision. Upper-boundary quantities use the reflection
//! `v -> -v`, `z -> 1 - z`. Diffusion noise is fixed at 1.

use crate::ddm::DdmParams;
use std::f64::consts::PI;

/// Reaction time recorded for trials without a response
pub const NO_RESPONSE_RT: f64 = -1.0;

const SERIES_EPS: f64 = 1e-10;
const DRIFT_EPS: f64 = 1e-8;

/// Density of absorption at the lower boundary at decision time `t`
pub fn lower_density(t: f64, v: f64, a: f64, z: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }

    let tt = t / (a * a);

    // Terms needed by the large-time series
    let kl = if PI * tt * SERIES_EPS < 1.0 {
        let k = (-2.0 * (PI * tt * SERIES_EPS).ln() / (PI * PI * tt)).sqrt();
        k.max(1.0 / (PI * tt.sqrt()))
    } else {
        1.0 / (PI * tt.sqrt())
    };

    // Terms needed by the small-time series
    let ks = if 2.0 * (2.0 * PI * tt).sqrt() * SERIES_EPS < 1.0 {
        let k = 2.0 + (-2.0 * tt * (2.0 * (2.0 * PI * tt).sqrt() * SERIES_EPS).ln()).sqrt();
        k.max(tt.sqrt() + 1.0)
    } else {
        2.0
    };

    let standardized = if ks < kl {
        let k = ks.ceil();
        let lo = -((k - 1.0) / 2.0).floor() as i64;
        let hi = ((k - 1.0) / 2.0).ceil() as i64;
        let sum: f64 = (lo..=hi)
            .map(|k| {
                let w = z + 2.0 * k as f64;
                w * (-(w * w) / (2.0 * tt)).exp()
            })
            .sum();
        sum / (2.0 * PI * tt.powi(3)).sqrt()
    } else {
        let k = kl.ceil() as i64;
        let sum: f64 = (1..=k)
            .map(|k| {
                let k = k as f64;
                k * (-(k * k) * PI * PI * tt / 2.0).exp() * (k * PI * z).sin()
            })
            .sum();
        sum * PI
    };

    (standardized * (-v * a * z - v * v * t / 2.0).exp() / (a * a)).max(0.0)
}

/// Density of absorption at the upper boundary at decision time `t`
pub fn upper_density(t: f64, v: f64, a: f64, z: f64) -> f64 {
    lower_density(t, -v, a, 1.0 - z)
}

/// Log probability of eventual absorption at the lower boundary
pub fn log_lower_probability(a: f64, z: f64, v: f64) -> f64 {
    if v.abs() < DRIFT_EPS {
        return (1.0 - z).ln();
    }
    if v > 0.0 {
        -2.0 * v * a * z + log1m_exp(-2.0 * v * a * (1.0 - z)) - log1m_exp(-2.0 * v * a)
    } else {
        log1m_exp(log_upper_probability(a, z, v))
    }
}

/// Log probability of eventual absorption at the upper boundary
pub fn log_upper_probability(a: f64, z: f64, v: f64) -> f64 {
    if v.abs() < DRIFT_EPS {
        return z.ln();
    }
    if v < 0.0 {
        2.0 * v * a * (1.0 - z) + log1m_exp(2.0 * v * a * z) - log1m_exp(2.0 * v * a)
    } else {
        log1m_exp(log_lower_probability(a, z, v))
    }
}

pub fn upper_probability(a: f64, z: f64, v: f64) -> f64 {
    log_upper_probability(a, z, v).exp()
}

/// Log-likelihood of a single observed trial
///
/// A response of 1 is an upper-boundary hit at `rt`. A response of 0 with
/// a negative `rt` is a withheld response, which only tells us the process
/// ended at the lower boundary. A response of 0 with an observed `rt` is a
/// lower-boundary hit at that time.
pub fn trial_log_likelihood(response: u8, rt: f64, params: &DdmParams) -> f64 {
    if !params.is_valid() {
        return f64::NEG_INFINITY;
    }

    if response == 0 && rt < 0.0 {
        return log_lower_probability(params.a, params.z, params.v);
    }

    let decision_time = rt - params.t;
    if decision_time <= 0.0 {
        return f64::NEG_INFINITY;
    }

    let density = if response == 1 {
        upper_density(decision_time, params.v, params.a, params.z)
    } else {
        lower_density(decision_time, params.v, params.a, params.z)
    };
    density.ln()
}

/// `ln(1 - exp(x))` for `x < 0`
fn log1m_exp(x: f64) -> f64 {
    if x >= 0.0 {
        f64::NEG_INFINITY
    } else if x > -std::f64::consts::LN_2 {
        (-x.exp_m1()).ln()
    } else {
        (-x.exp()).ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrate<F: Fn(f64) -> f64>(f: F, upper: f64, step: f64) -> f64 {
        let n = (upper / step) as usize;
        (1..n)
            .map(|i| {
                let t0 = i as f64 * step;
                0.5 * (f(t0) + f(t0 + step)) * step
            })
            .sum()
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        for &(a, z, v) in &[(2.0, 0.6, 0.3), (1.5, 0.3, -1.5), (1.0, 0.5, 0.0), (2.0, 0.4, -1.0)] {
            let total = log_lower_probability(a, z, v).exp() + log_upper_probability(a, z, v).exp();
            assert!((total - 1.0).abs() < 1e-9, "a={} z={} v={} total={}", a, z, v, total);
        }
    }

    #[test]
    fn test_zero_drift_probability_is_start_point() {
        assert!((upper_probability(2.0, 0.7, 0.0) - 0.7).abs() < 1e-12);
        assert!((log_lower_probability(2.0, 0.7, 0.0).exp() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_upper_density_integrates_to_upper_probability() {
        let (v, a, z) = (0.6, 1.5, 0.7);
        let mass = integrate(|t| upper_density(t, v, a, z), 30.0, 1e-3);
        let expected = upper_probability(a, z, v);
        assert!((mass - expected).abs() < 1e-3, "mass {} expected {}", mass, expected);
    }

    #[test]
    fn test_lower_density_integrates_to_lower_probability() {
        let (v, a, z) = (-1.0, 2.0, 0.4);
        let mass = integrate(|t| lower_density(t, v, a, z), 30.0, 1e-3);
        let expected = log_lower_probability(a, z, v).exp();
        assert!((mass - expected).abs() < 1e-3, "mass {} expected {}", mass, expected);
    }

    #[test]
    fn test_trial_log_likelihood_branches() {
        let params = DdmParams::new(-1.0, 2.0, 0.3, 0.4);

        let withheld = trial_log_likelihood(0, NO_RESPONSE_RT, &params);
        assert!((withheld - log_lower_probability(2.0, 0.4, -1.0)).abs() < 1e-12);

        let too_fast = trial_log_likelihood(1, 0.25, &params);
        assert_eq!(too_fast, f64::NEG_INFINITY);

        let go = trial_log_likelihood(1, 0.9, &params);
        assert!(go.is_finite());

        let invalid = DdmParams::new(0.3, -1.0, 0.3, 0.5);
        assert_eq!(trial_log_likelihood(1, 0.9, &invalid), f64::NEG_INFINITY);
    }
}
