//! Drift-diffusion parameters and trial simulation
//!
//! This module provides:
//! - The parameter set of the diffusion model (v, a, t, z and the
//!   inter-trial variabilities sv, sz, st)
//! - Validity checks for a parameter set
//! - A random-walk simulator producing (response, rt) pairs

use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors raised by parameter validation and simulation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DdmError {
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("unknown DDM parameter `{0}` (expected one of v, a, t, z)")]
    UnknownParameter(String),

    #[error("no valid subject parameters after {attempts} draws")]
    SubjectNoiseExhausted { attempts: usize },

    #[error("trial did not reach a boundary within {max_time}s after {attempts} attempts")]
    SimulationTimeout { max_time: f64, attempts: usize },
}

/// Regressable parameters of the diffusion model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Param {
    /// Drift rate
    V,
    /// Boundary separation
    A,
    /// Non-decision time
    T,
    /// Relative starting point (bias)
    Z,
}

impl Param {
    pub const ALL: [Param; 4] = [Param::V, Param::A, Param::T, Param::Z];

    pub fn name(self) -> &'static str {
        match self {
            Param::V => "v",
            Param::A => "a",
            Param::T => "t",
            Param::Z => "z",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Param {
    type Err = DdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "v" => Ok(Param::V),
            "a" => Ok(Param::A),
            "t" => Ok(Param::T),
            "z" => Ok(Param::Z),
            other => Err(DdmError::UnknownParameter(other.to_string())),
        }
    }
}

/// Full parameter set for one (subject, condition) cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DdmParams {
    pub v: f64,
    pub a: f64,
    pub t: f64,
    pub z: f64,
    #[serde(default)]
    pub sv: f64,
    #[serde(default)]
    pub sz: f64,
    #[serde(default)]
    pub st: f64,
}

impl DdmParams {
    /// Parameter set without inter-trial variability
    pub fn new(v: f64, a: f64, t: f64, z: f64) -> Self {
        Self {
            v,
            a,
            t,
            z,
            sv: 0.0,
            sz: 0.0,
            st: 0.0,
        }
    }

    pub fn get(&self, param: Param) -> f64 {
        match param {
            Param::V => self.v,
            Param::A => self.a,
            Param::T => self.t,
            Param::Z => self.z,
        }
    }

    pub fn set(&mut self, param: Param, value: f64) {
        match param {
            Param::V => self.v = value,
            Param::A => self.a = value,
            Param::T => self.t = value,
            Param::Z => self.z = value,
        }
    }

    /// Check the parameter set against the model's support
    pub fn validate(&self) -> Result<(), DdmError> {
        let check = |ok: bool, name: &'static str, value: f64, reason: &'static str| {
            if ok && value.is_finite() {
                Ok(())
            } else {
                Err(DdmError::InvalidParameter {
                    name,
                    value,
                    reason,
                })
            }
        };

        check(self.v.is_finite(), "v", self.v, "must be finite")?;
        check(self.a > 0.0, "a", self.a, "must be positive")?;
        check(self.t >= 0.0, "t", self.t, "must be non-negative")?;
        check(self.z > 0.0 && self.z < 1.0, "z", self.z, "must lie in (0, 1)")?;
        check(self.sv >= 0.0, "sv", self.sv, "must be non-negative")?;
        check(self.sz >= 0.0, "sz", self.sz, "must be non-negative")?;
        check(self.st >= 0.0, "st", self.st, "must be non-negative")?;
        check(
            self.z - self.sz / 2.0 > 0.0 && self.z + self.sz / 2.0 < 1.0,
            "sz",
            self.sz,
            "z +/- sz/2 must stay inside (0, 1)",
        )?;
        check(
            self.t - self.st / 2.0 >= 0.0,
            "st",
            self.st,
            "t - st/2 must be non-negative",
        )?;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Standard deviations of the between-subject offsets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubjectNoise {
    pub v: f64,
    pub a: f64,
    pub t: f64,
    pub z: f64,
}

impl Default for SubjectNoise {
    fn default() -> Self {
        Self {
            v: 0.1,
            a: 0.1,
            t: 0.01,
            z: 0.1,
        }
    }
}

impl SubjectNoise {
    pub fn sd(&self, param: Param) -> f64 {
        match param {
            Param::V => self.v,
            Param::A => self.a,
            Param::T => self.t,
            Param::Z => self.z,
        }
    }
}

/// Outcome of one simulated trial
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialOutcome {
    /// 1 for the upper boundary, 0 for the lower boundary
    pub response: u8,
    /// Decision time plus non-decision time, in seconds
    pub rt: f64,
}

/// Euler-Maruyama simulator of the diffusion process (unit noise)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Simulator {
    /// Integration step in seconds
    pub dt: f64,
    /// Decision time after which a walk is abandoned
    pub max_time: f64,
    /// Redraws allowed for a walk that never terminates
    pub max_attempts: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            dt: 1e-4,
            max_time: 20.0,
            max_attempts: 100,
        }
    }
}

impl Simulator {
    /// Simulate a single trial, redrawing walks that exceed `max_time`
    pub fn simulate_trial<R: Rng + ?Sized>(
        &self,
        params: &DdmParams,
        rng: &mut R,
    ) -> Result<TrialOutcome, DdmError> {
        for _ in 0..self.max_attempts {
            if let Some(outcome) = self.walk(params, rng) {
                return Ok(outcome);
            }
        }
        Err(DdmError::SimulationTimeout {
            max_time: self.max_time,
            attempts: self.max_attempts,
        })
    }

    fn walk<R: Rng + ?Sized>(&self, params: &DdmParams, rng: &mut R) -> Option<TrialOutcome> {
        let v = if params.sv > 0.0 {
            Normal::new(params.v, params.sv).ok()?.sample(rng)
        } else {
            params.v
        };
        let z = if params.sz > 0.0 {
            Uniform::new(params.z - params.sz / 2.0, params.z + params.sz / 2.0).sample(rng)
        } else {
            params.z
        };
        let t = if params.st > 0.0 {
            Uniform::new(params.t - params.st / 2.0, params.t + params.st / 2.0).sample(rng)
        } else {
            params.t
        };

        let a = params.a;
        let step_sd = self.dt.sqrt();
        let mut x = z * a;
        let mut time = 0.0;

        while time < self.max_time {
            let noise: f64 = StandardNormal.sample(rng);
            x += v * self.dt + step_sd * noise;
            time += self.dt;

            if x >= a {
                return Some(TrialOutcome {
                    response: 1,
                    rt: time + t,
                });
            }
            if x <= 0.0 {
                return Some(TrialOutcome {
                    response: 0,
                    rt: time + t,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_param_round_trip_names() {
        for param in Param::ALL {
            assert_eq!(param.name().parse::<Param>().unwrap(), param);
        }
        assert!("sv".parse::<Param>().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_support() {
        assert!(DdmParams::new(0.3, 2.0, 0.3, 0.6).is_valid());
        assert!(!DdmParams::new(0.3, 0.0, 0.3, 0.6).is_valid());
        assert!(!DdmParams::new(0.3, 2.0, -0.1, 0.6).is_valid());
        assert!(!DdmParams::new(0.3, 2.0, 0.3, 1.0).is_valid());

        let mut wide_sz = DdmParams::new(0.3, 2.0, 0.3, 0.9);
        wide_sz.sz = 0.4;
        assert!(matches!(
            wide_sz.validate(),
            Err(DdmError::InvalidParameter { name: "sz", .. })
        ));
    }

    #[test]
    fn test_get_set() {
        let mut p = DdmParams::new(0.3, 2.0, 0.3, 0.6);
        p.set(Param::A, 1.5);
        assert_eq!(p.get(Param::A), 1.5);
        assert_eq!(p.get(Param::Z), 0.6);
    }

    #[test]
    fn test_rt_exceeds_non_decision_time() {
        let sim = Simulator {
            dt: 1e-3,
            ..Simulator::default()
        };
        let params = DdmParams::new(0.5, 1.5, 0.2, 0.5);
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..200 {
            let outcome = sim.simulate_trial(&params, &mut rng).unwrap();
            assert!(outcome.rt > 0.2);
            assert!(outcome.response <= 1);
        }
    }

    #[test]
    fn test_upper_proportion_matches_absorption_probability() {
        let sim = Simulator {
            dt: 1e-3,
            ..Simulator::default()
        };
        let params = DdmParams::new(1.0, 2.0, 0.0, 0.5);
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let n = 2000;
        let upper = (0..n)
            .filter(|_| sim.simulate_trial(&params, &mut rng).unwrap().response == 1)
            .count();
        let observed = upper as f64 / n as f64;
        let expected = crate::wiener::upper_probability(params.a, params.z, params.v);
        assert!(
            (observed - expected).abs() < 0.04,
            "observed {} expected {}",
            observed,
            expected
        );
    }

    #[test]
    fn test_timeout_reported() {
        let sim = Simulator {
            dt: 1e-2,
            max_time: 0.05,
            max_attempts: 3,
        };
        // Wide boundaries and no drift: the walk cannot finish in 5 steps
        let params = DdmParams::new(0.0, 50.0, 0.1, 0.5);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let err = sim.simulate_trial(&params, &mut rng).unwrap_err();
        assert!(matches!(err, DdmError::SimulationTimeout { attempts: 3, .. }));
    }
}
