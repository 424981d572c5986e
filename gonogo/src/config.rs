//! Experiment configuration
//!
//! Every field has a default reproducing the two-session Go/No-go study,
//! so an empty JSON object (or no file at all) describes the full run.

use crate::datagen::GenerateConfig;
use crate::ddm::{DdmError, DdmParams, Param, Simulator, SubjectNoise};
use crate::regression::{gonogo_regressions, ModelSpec, RegressionConfig};
use crate::stanrun::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session {session}, condition `{condition}`: {source}")]
    Params {
        session: usize,
        condition: String,
        #[source]
        source: DdmError,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Group parameters of one session, keyed by condition
pub type SessionParams = BTreeMap<String, DdmParams>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub n_subjects: usize,
    /// Trials per condition per subject
    pub trials_per_level: usize,
    /// `sessions[i]` is session `i + 1`
    pub sessions: Vec<SessionParams>,
    pub subj_noise: SubjectNoise,
    pub simulator: Simulator,
    /// Seed for data generation; drawn from entropy when absent
    pub seed: Option<u64>,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub sampler: SamplerConfig,
    /// Parameters estimated even when not regressed
    pub include: Vec<Param>,
    pub regressions: Vec<RegressionConfig>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            n_subjects: 5,
            trials_per_level: 150,
            sessions: default_sessions(),
            subj_noise: SubjectNoise::default(),
            simulator: Simulator::default(),
            seed: None,
            output: PathBuf::from("mydata.csv"),
            work_dir: PathBuf::from("gonogo_fit"),
            sampler: SamplerConfig::default(),
            include: vec![Param::Z],
            regressions: gonogo_regressions(),
        }
    }
}

fn default_sessions() -> Vec<SessionParams> {
    let session = |go: DdmParams, nogo: DdmParams| {
        let mut conditions = BTreeMap::new();
        conditions.insert("go".to_string(), go);
        conditions.insert("nogo".to_string(), nogo);
        conditions
    };
    vec![
        session(
            DdmParams::new(0.3, 2.0, 0.3, 0.6),
            DdmParams::new(-1.0, 2.0, 0.3, 0.4),
        ),
        session(
            DdmParams::new(0.6, 1.5, 0.2, 0.7),
            DdmParams::new(-1.5, 1.5, 0.2, 0.3),
        ),
    ]
}

impl ExperimentConfig {
    /// Read a JSON config; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn generate_config(&self) -> GenerateConfig {
        GenerateConfig {
            size: self.trials_per_level,
            subjects: self.n_subjects,
            subj_noise: self.subj_noise,
            simulator: self.simulator,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_subjects == 0 {
            return Err(ConfigError::Invalid("n_subjects must be positive".into()));
        }
        if self.trials_per_level == 0 {
            return Err(ConfigError::Invalid(
                "trials_per_level must be positive".into(),
            ));
        }
        if self.sessions.is_empty() {
            return Err(ConfigError::Invalid("at least one session is required".into()));
        }
        for (idx, conditions) in self.sessions.iter().enumerate() {
            if conditions.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "session {} has no conditions",
                    idx + 1
                )));
            }
            for (condition, params) in conditions {
                if condition.is_empty() || condition.contains([',', '"', '\n', '\r']) {
                    return Err(ConfigError::Invalid(format!(
                        "session {}: condition name {:?} is empty or contains a CSV delimiter",
                        idx + 1,
                        condition
                    )));
                }
                params.validate().map_err(|source| ConfigError::Params {
                    session: idx + 1,
                    condition: condition.clone(),
                    source,
                })?;
            }
        }
        for (name, sd) in Param::ALL.map(|p| (p, self.subj_noise.sd(p))) {
            if !(sd >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "subject noise for {} must be non-negative, got {}",
                    name, sd
                )));
            }
        }
        if !(self.simulator.dt > 0.0 && self.simulator.max_time > 0.0) {
            return Err(ConfigError::Invalid(
                "simulator dt and max_time must be positive".into(),
            ));
        }
        self.sampler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        ModelSpec::new(&self.regressions, &self.include)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
