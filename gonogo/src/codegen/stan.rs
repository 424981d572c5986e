//! Stan backend for the hierarchical diffusion regression
//!
//! Generates three artifacts from a [`CompiledModel`]:
//! - the Stan program
//! - the data file (JSON)
//! - initial values (JSON) that start every chain inside the support

use crate::dataset::Dataset;
use crate::ddm::Param;
use crate::regression::{CompiledModel, CompiledRegression, LinkFunction};
use serde_json::{json, Map, Value};

/// Column written by the generated quantities block
pub const DEVIANCE_COLUMN: &str = "deviance";

const FUNCTIONS_BLOCK: &str = r#"functions {
  // log probability of absorption at the lower boundary (unit noise)
  real wiener_lower_log_prob(real a, real z, real v) {
    if (abs(v) < 1e-8) {
      return log1m(z);
    }
    if (v > 0) {
      return -2 * v * a * z + log1m_exp(-2 * v * a * (1 - z)) - log1m_exp(-2 * v * a);
    }
    return log1m_exp(2 * v * a * (1 - z) + log1m_exp(2 * v * a * z) - log1m_exp(2 * v * a));
  }

  // per-trial log-likelihood; rt < 0 marks a withheld response
  vector ddm_log_lik(array[] int response, vector rt, vector a, vector t, vector z, vector v) {
    int N = num_elements(rt);
    vector[N] ll;
    for (n in 1:N) {
      if (a[n] <= 0 || t[n] < 0 || z[n] <= 0 || z[n] >= 1) {
        ll[n] = negative_infinity();
      } else if (response[n] == 0 && rt[n] < 0) {
        ll[n] = wiener_lower_log_prob(a[n], z[n], v[n]);
      } else if (t[n] >= rt[n]) {
        ll[n] = negative_infinity();
      } else if (response[n] == 1) {
        ll[n] = wiener_lpdf(rt[n] | a[n], t[n], z[n], v[n]);
      } else {
        ll[n] = wiener_lpdf(rt[n] | a[n], t[n], 1 - z[n], -v[n]);
      }
    }
    return ll;
  }
}
"#;

/// Generate the Stan program for a compiled model
pub fn generate_stan(model: &CompiledModel) -> String {
    let mut code = String::new();

    code.push_str("// Hierarchical drift-diffusion regression\n");
    for reg in &model.regressions {
        code.push_str(&format!(
            "// {} [{}]\n",
            single_line(&reg.spec.formula.source),
            single_line(&reg.spec.link.describe())
        ));
    }
    code.push_str(FUNCTIONS_BLOCK);

    // Data
    code.push_str("data {\n");
    code.push_str("  int<lower=1> N;\n");
    code.push_str("  int<lower=1> n_subj;\n");
    code.push_str("  array[N] int<lower=1, upper=n_subj> subj;\n");
    code.push_str("  array[N] int<lower=0, upper=1> response;\n");
    code.push_str("  vector[N] rt;\n");
    for reg in &model.regressions {
        let p = reg.param();
        if reg.n_coefs() > 0 {
            code.push_str(&format!("  int<lower=1> K_{};\n", p));
            code.push_str(&format!("  matrix[N, K_{p}] X_{p};\n", p = p));
        }
        if reg.stim.is_some() {
            code.push_str(&format!("  vector[N] stim_{};\n", p));
        }
    }
    code.push_str("}\n");

    // Parameters
    code.push_str("parameters {\n");
    for reg in &model.regressions {
        code.push_str(&format!("  real {};\n", reg.stan_name("Intercept")));
        code.push_str(&format!("  real<lower=0> {};\n", reg.stan_name("Intercept_std")));
        code.push_str(&format!(
            "  vector[n_subj] {};\n",
            reg.stan_name("Intercept_subj_raw")
        ));
        if reg.n_coefs() > 0 {
            code.push_str(&format!(
                "  vector[K_{}] {};\n",
                reg.param(),
                reg.stan_name("beta")
            ));
        }
    }
    code.push_str("}\n");

    // Non-centred subject intercepts
    code.push_str("transformed parameters {\n");
    for reg in &model.regressions {
        code.push_str(&format!(
            "  vector[n_subj] {subj} = {mu} + {sd} * {raw};\n",
            subj = reg.stan_name("Intercept_subj"),
            mu = reg.stan_name("Intercept"),
            sd = reg.stan_name("Intercept_std"),
            raw = reg.stan_name("Intercept_subj_raw"),
        ));
    }
    code.push_str("}\n");

    // Model
    code.push_str("model {\n");
    for reg in &model.regressions {
        let prior = &reg.spec.prior;
        code.push_str(&format!(
            "  {} ~ normal({:?}, {:?});\n",
            reg.stan_name("Intercept"),
            prior.intercept_mu,
            prior.intercept_sd
        ));
        code.push_str(&format!(
            "  {} ~ normal(0, {:?});\n",
            reg.stan_name("Intercept_std"),
            prior.std_scale
        ));
        code.push_str(&format!("  {} ~ std_normal();\n", reg.stan_name("Intercept_subj_raw")));
        if reg.n_coefs() > 0 {
            code.push_str(&format!(
                "  {} ~ normal(0, {:?});\n",
                reg.stan_name("beta"),
                prior.coef_sd
            ));
        }
    }
    code.push_str("  {\n");
    push_trial_params(&mut code, model);
    code.push_str(&format!("    target += sum({});\n", log_lik_call()));
    code.push_str("  }\n");
    code.push_str("}\n");

    // Deviance draws for DIC
    code.push_str("generated quantities {\n");
    code.push_str(&format!("  real {};\n", DEVIANCE_COLUMN));
    code.push_str("  {\n");
    push_trial_params(&mut code, model);
    code.push_str(&format!(
        "    {} = -2 * sum({});\n",
        DEVIANCE_COLUMN,
        log_lik_call()
    ));
    code.push_str("  }\n");
    code.push_str("}\n");

    code
}

/// Collapse whitespace runs (line breaks included) so text fits in a `//` comment
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn log_lik_call() -> String {
    let args: Vec<String> = [Param::A, Param::T, Param::Z, Param::V]
        .iter()
        .map(|p| format!("{}_trial", p))
        .collect();
    format!("ddm_log_lik(response, rt, {})", args.join(", "))
}

/// Emit per-trial parameter vectors `a_trial`, `t_trial`, `z_trial`, `v_trial`
fn push_trial_params(code: &mut String, model: &CompiledModel) {
    for reg in &model.regressions {
        let p = reg.param();
        let mut lp = format!("{}[subj]", reg.stan_name("Intercept_subj"));
        if reg.n_coefs() > 0 {
            lp.push_str(&format!(" + X_{} * {}", p, reg.stan_name("beta")));
        }
        let value = match &reg.spec.link {
            LinkFunction::Identity => lp,
            LinkFunction::Logistic => format!("inv_logit({})", lp),
            LinkFunction::LogisticContrast(_) => format!("inv_logit(({}) .* stim_{})", lp, p),
        };
        code.push_str(&format!("    vector[N] {}_trial = {};\n", p, value));
    }
    if let Some(z) = model.fixed_z {
        code.push_str(&format!("    vector[N] z_trial = rep_vector({:?}, N);\n", z));
    }
}

/// Data file contents for the Stan program
pub fn stan_data(model: &CompiledModel, data: &Dataset) -> Value {
    let mut out = Map::new();
    out.insert("N".to_string(), json!(data.len()));
    out.insert("n_subj".to_string(), json!(model.n_subjects()));
    out.insert(
        "subj".to_string(),
        json!(model.subj_index.iter().map(|k| k + 1).collect::<Vec<_>>()),
    );
    out.insert(
        "response".to_string(),
        json!(data.rows.iter().map(|r| r.response).collect::<Vec<_>>()),
    );
    out.insert(
        "rt".to_string(),
        json!(data.rows.iter().map(|r| r.rt).collect::<Vec<_>>()),
    );

    for reg in &model.regressions {
        let p = reg.param();
        if reg.n_coefs() > 0 {
            let x: Vec<Vec<f64>> = reg.design.rows.iter().map(|row| row[1..].to_vec()).collect();
            out.insert(format!("K_{}", p), json!(reg.n_coefs()));
            out.insert(format!("X_{}", p), json!(x));
        }
        if let Some(stim) = &reg.stim {
            out.insert(format!("stim_{}", p), json!(stim));
        }
    }

    Value::Object(out)
}

/// Initial values placing every subject at the group intercept
pub fn stan_inits(model: &CompiledModel, data: &Dataset) -> Value {
    let mut out = Map::new();
    for reg in &model.regressions {
        out.insert(
            reg.stan_name("Intercept"),
            json!(intercept_init(reg, data)),
        );
        out.insert(reg.stan_name("Intercept_std"), json!(0.1));
        out.insert(
            reg.stan_name("Intercept_subj_raw"),
            json!(vec![0.0; model.n_subjects()]),
        );
        if reg.n_coefs() > 0 {
            out.insert(reg.stan_name("beta"), json!(vec![0.0; reg.n_coefs()]));
        }
    }
    Value::Object(out)
}

fn intercept_init(reg: &CompiledRegression, data: &Dataset) -> f64 {
    if reg.spec.link != LinkFunction::Identity {
        return 0.0;
    }
    let mu = reg.spec.prior.intercept_mu;
    match reg.param() {
        // Non-decision time must start below the fastest observed response
        Param::T => data.min_observed_rt().map_or(mu, |rt| mu.min(0.5 * rt)),
        _ => mu,
    }
}
