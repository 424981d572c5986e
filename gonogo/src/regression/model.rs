//! Regression specifications and their compiled, data-bound form
//!
//! Every regressed parameter gets a hierarchical intercept (group mean,
//! group sd, one value per subject) plus group-level coefficients for the
//! remaining design columns. Naming follows the estimator's output
//! columns: `v_Intercept`, `v_Intercept_std`, `v_Intercept_subj.<k>`,
//! `v_beta.<j>` (both 1-based).

use super::design::{DesignError, DesignMatrix};
use super::formula::Formula;
use super::link::LinkFunction;
use crate::dataset::Dataset;
use crate::ddm::{DdmParams, Param};
use crate::wiener::trial_log_likelihood;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bias used when z is neither regressed nor included
pub const DEFAULT_Z: f64 = 0.5;

/// Values of sampled quantities keyed by estimator column name
pub type ParameterPoint = HashMap<String, f64>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parameter point has no value for `{0}`")]
pub struct MissingValue(pub String);

/// User-facing regression description, as stored in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionConfig {
    pub model: String,
    #[serde(default)]
    pub link: LinkFunction,
    /// Replaces the default prior of the outcome parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<Prior>,
}

impl RegressionConfig {
    pub fn new(model: &str, link: LinkFunction) -> Self {
        Self {
            model: model.to_string(),
            link,
            prior: None,
        }
    }
}

/// The four regressions of the Go/No-go experiment
pub fn gonogo_regressions() -> Vec<RegressionConfig> {
    vec![
        RegressionConfig::new("z ~ 1 + C(session)", LinkFunction::session_contrast()),
        RegressionConfig::new("v ~ 1 + C(cond_v)", LinkFunction::Identity),
        RegressionConfig::new("a ~ 1 + C(session)", LinkFunction::Identity),
        RegressionConfig::new("t ~ 1 + C(session)", LinkFunction::Identity),
    ]
}

/// Normal priors for one parameter family
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub intercept_mu: f64,
    pub intercept_sd: f64,
    /// Scale of the half-normal prior on the group sd
    pub std_scale: f64,
    pub coef_sd: f64,
}

impl Prior {
    /// Priors on the scale of the linear predictor
    pub fn default_for(param: Param) -> Self {
        match param {
            Param::V => Prior {
                intercept_mu: 0.0,
                intercept_sd: 3.0,
                std_scale: 2.0,
                coef_sd: 3.0,
            },
            Param::A => Prior {
                intercept_mu: 1.5,
                intercept_sd: 1.0,
                std_scale: 0.5,
                coef_sd: 1.0,
            },
            Param::T => Prior {
                intercept_mu: 0.3,
                intercept_sd: 0.3,
                std_scale: 0.2,
                coef_sd: 0.5,
            },
            Param::Z => Prior {
                intercept_mu: 0.0,
                intercept_sd: 1.5,
                std_scale: 1.0,
                coef_sd: 1.5,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionSpec {
    pub formula: Formula,
    pub link: LinkFunction,
    pub prior: Prior,
}

impl RegressionSpec {
    pub fn new(model: &str, link: LinkFunction) -> Result<Self, DesignError> {
        let formula = Formula::parse(model)?;
        let prior = Prior::default_for(formula.outcome);
        Ok(Self {
            formula,
            link,
            prior,
        })
    }

    pub fn param(&self) -> Param {
        self.formula.outcome
    }
}

/// Full set of regressions, one per estimated parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub regressions: Vec<RegressionSpec>,
    /// Constant bias when z is not estimated
    pub fixed_z: Option<f64>,
}

impl ModelSpec {
    /// Complete the user's regressions
    ///
    /// v, a and t are always estimated, intercept-only when not regressed.
    /// z is estimated only when regressed or listed in `include`; otherwise
    /// it is fixed at [`DEFAULT_Z`].
    pub fn new(configs: &[RegressionConfig], include: &[Param]) -> Result<Self, DesignError> {
        let mut regressions: Vec<RegressionSpec> = Vec::new();
        for config in configs {
            let mut spec = RegressionSpec::new(&config.model, config.link.clone())?;
            if let Some(prior) = config.prior {
                spec.prior = prior;
            }
            if regressions.iter().any(|r| r.param() == spec.param()) {
                return Err(DesignError::DuplicateParam(spec.param().to_string()));
            }
            regressions.push(spec);
        }

        for param in [Param::V, Param::A, Param::T] {
            if !regressions.iter().any(|r| r.param() == param) {
                regressions.push(RegressionSpec::new(
                    &format!("{} ~ 1", param),
                    LinkFunction::Identity,
                )?);
            }
        }

        let mut fixed_z = None;
        if !regressions.iter().any(|r| r.param() == Param::Z) {
            if include.contains(&Param::Z) {
                regressions.push(RegressionSpec::new("z ~ 1", LinkFunction::Logistic)?);
            } else {
                fixed_z = Some(DEFAULT_Z);
            }
        }

        Ok(Self {
            regressions,
            fixed_z,
        })
    }
}

/// A regression bound to a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRegression {
    pub spec: RegressionSpec,
    pub design: DesignMatrix,
    /// Per-row link multiplier for contrast links
    pub stim: Option<Vec<f64>>,
}

impl CompiledRegression {
    pub fn param(&self) -> Param {
        self.spec.param()
    }

    /// Number of group-level coefficients besides the intercept
    pub fn n_coefs(&self) -> usize {
        self.design.n_cols() - 1
    }

    pub fn stan_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.param(), suffix)
    }

    fn link_value(&self, row: usize, lp: f64) -> f64 {
        let stim = self.stim.as_ref().map_or(1.0, |s| s[row]);
        self.spec.link.apply(lp, stim)
    }

    fn coefficient_sum(&self, row: usize, point: &ParameterPoint) -> Result<f64, MissingValue> {
        let mut sum = 0.0;
        for j in 1..=self.n_coefs() {
            let key = format!("{}.{}", self.stan_name("beta"), j);
            let beta = point.get(&key).ok_or_else(|| MissingValue(key.clone()))?;
            sum += self.design.rows[row][j] * beta;
        }
        Ok(sum)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModel {
    pub regressions: Vec<CompiledRegression>,
    pub fixed_z: Option<f64>,
    /// Sorted subject ids; position k maps to estimator index k + 1
    pub subjects: Vec<usize>,
    /// Per-row position into `subjects`
    pub subj_index: Vec<usize>,
}

impl CompiledModel {
    pub fn compile(spec: &ModelSpec, data: &Dataset) -> Result<Self, DesignError> {
        if data.is_empty() {
            return Err(DesignError::EmptyData);
        }

        let subjects = data.subjects();
        let subj_index = data
            .rows
            .iter()
            .map(|r| subjects.binary_search(&r.subj_idx).unwrap_or(0))
            .collect();

        let mut regressions = Vec::with_capacity(spec.regressions.len());
        for reg in &spec.regressions {
            regressions.push(CompiledRegression {
                design: DesignMatrix::build(&reg.formula.rhs, data)?,
                stim: reg.link.design_vector(data)?,
                spec: reg.clone(),
            });
        }

        Ok(Self {
            regressions,
            fixed_z: spec.fixed_z,
            subjects,
            subj_index,
        })
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn regression(&self, param: Param) -> Option<&CompiledRegression> {
        self.regressions.iter().find(|r| r.param() == param)
    }

    /// Map an estimator column onto its reported name
    ///
    /// Auxiliary columns (raw subject offsets, sampler diagnostics,
    /// generated quantities) map to `None`.
    pub fn display_name(&self, column: &str) -> Option<String> {
        let (prefix, rest) = column.split_once('_')?;
        let reg = self.regressions.iter().find(|r| r.param().name() == prefix)?;

        match rest {
            "Intercept" | "Intercept_std" => Some(column.to_string()),
            _ => {
                if let Some(k) = rest.strip_prefix("Intercept_subj.") {
                    let k: usize = k.parse().ok()?;
                    let id = self.subjects.get(k.checked_sub(1)?)?;
                    return Some(format!("{}_Intercept_subj.{}", prefix, id));
                }
                if let Some(j) = rest.strip_prefix("beta.") {
                    let j: usize = j.parse().ok()?;
                    let name = reg.design.columns.get(j)?;
                    return Some(format!("{}_{}", prefix, name));
                }
                None
            }
        }
    }

    /// Estimator columns in reporting order
    pub fn reported_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        for reg in &self.regressions {
            out.push(reg.stan_name("Intercept"));
            out.push(reg.stan_name("Intercept_std"));
            for k in 1..=self.n_subjects() {
                out.push(format!("{}.{}", reg.stan_name("Intercept_subj"), k));
            }
            for j in 1..=reg.n_coefs() {
                out.push(format!("{}.{}", reg.stan_name("beta"), j));
            }
        }
        out
    }

    /// Trial-level parameters of row `row` at a parameter point
    pub fn row_params(&self, row: usize, point: &ParameterPoint) -> Result<DdmParams, MissingValue> {
        let mut params = DdmParams::new(0.0, 0.0, 0.0, self.fixed_z.unwrap_or(DEFAULT_Z));
        let k = self.subj_index[row] + 1;

        for reg in &self.regressions {
            let key = format!("{}.{}", reg.stan_name("Intercept_subj"), k);
            let intercept = point.get(&key).ok_or_else(|| MissingValue(key.clone()))?;
            let lp = intercept + reg.coefficient_sum(row, point)?;
            params.set(reg.param(), reg.link_value(row, lp));
        }
        Ok(params)
    }

    /// Group-level value of `param` for the design cell of row `row`
    pub fn group_value(
        &self,
        param: Param,
        row: usize,
        point: &ParameterPoint,
    ) -> Result<Option<f64>, MissingValue> {
        let Some(reg) = self.regression(param) else {
            return Ok(if param == Param::Z { self.fixed_z } else { None });
        };
        let key = reg.stan_name("Intercept");
        let intercept = point.get(&key).ok_or_else(|| MissingValue(key.clone()))?;
        let lp = intercept + reg.coefficient_sum(row, point)?;
        Ok(Some(reg.link_value(row, lp)))
    }

    /// Total log-likelihood of the data at a parameter point
    pub fn log_likelihood(&self, data: &Dataset, point: &ParameterPoint) -> Result<f64, MissingValue> {
        let mut total = 0.0;
        for (n, row) in data.rows.iter().enumerate() {
            let params = self.row_params(n, point)?;
            total += trial_log_likelihood(row.response, row.rt, &params);
        }
        Ok(total)
    }

    /// `-2 * log-likelihood`
    pub fn deviance(&self, data: &Dataset, point: &ParameterPoint) -> Result<f64, MissingValue> {
        Ok(-2.0 * self.log_likelihood(data, point)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::Trial;
    use crate::dataset::merge_sessions;

    fn data() -> Dataset {
        let t = |subj_idx: usize, condition: &str, response: u8, rt: f64| Trial {
            subj_idx,
            condition: condition.to_string(),
            response,
            rt,
        };
        let mut data = merge_sessions(
            vec![t(0, "go", 1, 0.8), t(4, "nogo", 0, 1.1)],
            vec![t(0, "go", 1, 0.6), t(4, "nogo", 0, 0.9)],
        );
        data.mark_no_response();
        data
    }

    fn compiled() -> CompiledModel {
        let spec = ModelSpec::new(&gonogo_regressions(), &[Param::Z]).unwrap();
        CompiledModel::compile(&spec, &data()).unwrap()
    }

    fn point(model: &CompiledModel) -> ParameterPoint {
        let mut point = ParameterPoint::new();
        for column in model.reported_columns() {
            point.insert(column, 0.0);
        }
        for k in 1..=2 {
            point.insert(format!("a_Intercept_subj.{}", k), 2.0);
            point.insert(format!("t_Intercept_subj.{}", k), 0.3);
            point.insert(format!("v_Intercept_subj.{}", k), 0.5);
            point.insert(format!("z_Intercept_subj.{}", k), 0.4);
        }
        point.insert("a_Intercept".to_string(), 2.0);
        point.insert("a_beta.1".to_string(), -0.5);
        point.insert("v_beta.3".to_string(), -1.5);
        point
    }

    #[test]
    fn test_model_spec_fills_missing_params() {
        let spec = ModelSpec::new(
            &[RegressionConfig::new("v ~ 1 + C(cond_v)", LinkFunction::Identity)],
            &[],
        )
        .unwrap();
        let params: Vec<Param> = spec.regressions.iter().map(RegressionSpec::param).collect();
        assert_eq!(params, vec![Param::V, Param::A, Param::T]);
        assert_eq!(spec.fixed_z, Some(DEFAULT_Z));

        let with_z = ModelSpec::new(&[], &[Param::Z]).unwrap();
        assert_eq!(with_z.fixed_z, None);
        let z = with_z.regressions.iter().find(|r| r.param() == Param::Z).unwrap();
        assert_eq!(z.link, LinkFunction::Logistic);
    }

    #[test]
    fn test_prior_override() {
        let custom = Prior {
            intercept_mu: 1.0,
            intercept_sd: 0.5,
            std_scale: 0.25,
            coef_sd: 0.5,
        };
        let configs = vec![RegressionConfig {
            prior: Some(custom),
            ..RegressionConfig::new("a ~ 1 + C(session)", LinkFunction::Identity)
        }];
        let spec = ModelSpec::new(&configs, &[]).unwrap();
        assert_eq!(spec.regressions[0].prior, custom);
        assert_eq!(spec.regressions[1].prior, Prior::default_for(Param::V));
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let configs = vec![
            RegressionConfig::new("a ~ 1", LinkFunction::Identity),
            RegressionConfig::new("a ~ 1 + C(session)", LinkFunction::Identity),
        ];
        assert_eq!(
            ModelSpec::new(&configs, &[]).unwrap_err(),
            DesignError::DuplicateParam("a".to_string())
        );
    }

    #[test]
    fn test_display_names() {
        let model = compiled();
        assert_eq!(model.subjects, vec![0, 4]);
        assert_eq!(
            model.display_name("z_beta.1").as_deref(),
            Some("z_C(session)[T.2.0]")
        );
        assert_eq!(
            model.display_name("v_beta.3").as_deref(),
            Some("v_C(cond_v)[T.nogo2]")
        );
        assert_eq!(
            model.display_name("t_Intercept_subj.2").as_deref(),
            Some("t_Intercept_subj.4")
        );
        assert_eq!(model.display_name("a_Intercept_std").as_deref(), Some("a_Intercept_std"));
        assert_eq!(model.display_name("a_Intercept_subj_raw.1"), None);
        assert_eq!(model.display_name("lp__"), None);
        assert_eq!(model.display_name("deviance"), None);
    }

    #[test]
    fn test_row_params_apply_links() {
        let model = compiled();
        let point = point(&model);

        // Row 0: session 1, go; row 3: session 2, nogo
        let p0 = model.row_params(0, &point).unwrap();
        assert!((p0.z - crate::regression::link::logistic(0.4)).abs() < 1e-12);
        assert_eq!(p0.v, 0.5);

        let p3 = model.row_params(3, &point).unwrap();
        assert!((p3.z - crate::regression::link::logistic(-0.4)).abs() < 1e-12);
        assert!((p3.v - (0.5 - 1.5)).abs() < 1e-12);
    }

    #[test]
    fn test_group_value_and_likelihood() {
        let model = compiled();
        let point = point(&model);

        let a2 = model.group_value(Param::A, 2, &point).unwrap().unwrap();
        assert!((a2 - 1.5).abs() < 1e-12);

        let ll = model.log_likelihood(&data(), &point).unwrap();
        assert!(ll.is_finite());
        let dev = model.deviance(&data(), &point).unwrap();
        assert!((dev + 2.0 * ll).abs() < 1e-9);
    }

    #[test]
    fn test_missing_value_reported() {
        let model = compiled();
        let mut point = point(&model);
        point.remove("v_beta.1");
        assert_eq!(
            model.row_params(0, &point).unwrap_err(),
            MissingValue("v_beta.1".to_string())
        );
    }
}
