//! Synthetic dataset generator for multi-condition diffusion experiments.
//!
//! Each subject receives one set of parameter offsets which is shared by all
//! of that subject's conditions, so a subject who is slow in `go` is equally
//! slow in `nogo`. Trials are then simulated cell by cell.

use crate::ddm::{DdmError, DdmParams, Param, Simulator, SubjectNoise};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_SUBJECT_DRAWS: usize = 1000;

/// One simulated trial, before session labelling
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub subj_idx: usize,
    pub condition: String,
    pub response: u8,
    pub rt: f64,
}

/// Parameters actually used for one (subject, condition) cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectParams {
    pub subj_idx: usize,
    pub condition: String,
    pub params: DdmParams,
}

/// Generation settings shared across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Trials per condition per subject
    pub size: usize,
    pub subjects: usize,
    #[serde(default)]
    pub subj_noise: SubjectNoise,
    #[serde(default)]
    pub simulator: Simulator,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            size: 150,
            subjects: 5,
            subj_noise: SubjectNoise::default(),
            simulator: Simulator::default(),
        }
    }
}

/// Draw subject-level parameters for every condition
///
/// With a single subject the group parameters are returned unchanged.
pub fn gen_subject_params<R: Rng + ?Sized>(
    conditions: &BTreeMap<String, DdmParams>,
    subjects: usize,
    noise: &SubjectNoise,
    rng: &mut R,
) -> Result<Vec<SubjectParams>, DdmError> {
    for params in conditions.values() {
        params.validate()?;
    }

    let mut out = Vec::with_capacity(subjects * conditions.len());

    for subj_idx in 0..subjects {
        let per_condition = if subjects == 1 {
            conditions.clone()
        } else {
            draw_shared_offsets(conditions, noise, rng)?
        };

        for (condition, params) in per_condition {
            out.push(SubjectParams {
                subj_idx,
                condition,
                params,
            });
        }
    }

    Ok(out)
}

fn draw_shared_offsets<R: Rng + ?Sized>(
    conditions: &BTreeMap<String, DdmParams>,
    noise: &SubjectNoise,
    rng: &mut R,
) -> Result<BTreeMap<String, DdmParams>, DdmError> {
    for _ in 0..MAX_SUBJECT_DRAWS {
        let mut offsets = [0.0; 4];
        for (slot, param) in offsets.iter_mut().zip(Param::ALL) {
            let sd = noise.sd(param);
            if sd > 0.0 {
                if let Ok(dist) = Normal::new(0.0, sd) {
                    *slot = dist.sample(rng);
                }
            }
        }

        let shifted: BTreeMap<String, DdmParams> = conditions
            .iter()
            .map(|(name, base)| {
                let mut p = *base;
                for (offset, param) in offsets.iter().zip(Param::ALL) {
                    p.set(param, base.get(param) + offset);
                }
                (name.clone(), p)
            })
            .collect();

        if shifted.values().all(DdmParams::is_valid) {
            return Ok(shifted);
        }
    }

    Err(DdmError::SubjectNoiseExhausted {
        attempts: MAX_SUBJECT_DRAWS,
    })
}

/// Generate a trial table for the given conditions
///
/// Returns the trials (condition-major, then subject, then trial) together
/// with the parameters each subject was simulated with.
pub fn gen_rand_data<R: Rng + ?Sized>(
    conditions: &BTreeMap<String, DdmParams>,
    config: &GenerateConfig,
    rng: &mut R,
) -> Result<(Vec<Trial>, Vec<SubjectParams>), DdmError> {
    let subject_params = gen_subject_params(conditions, config.subjects, &config.subj_noise, rng)?;

    let mut trials = Vec::with_capacity(subject_params.len() * config.size);
    for condition in conditions.keys() {
        for cell in subject_params.iter().filter(|c| &c.condition == condition) {
            for _ in 0..config.size {
                let outcome = config.simulator.simulate_trial(&cell.params, rng)?;
                trials.push(Trial {
                    subj_idx: cell.subj_idx,
                    condition: condition.clone(),
                    response: outcome.response,
                    rt: outcome.rt,
                });
            }
        }
    }

    Ok((trials, subject_params))
}
