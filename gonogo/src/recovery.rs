//! Parameter recovery: ground truth against the fitted group values

use crate::dataset::Dataset;
use crate::ddm::{DdmParams, Param};
use crate::regression::{CompiledModel, MissingValue, ParameterPoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Truth and estimate for one (cell, parameter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRow {
    pub cond_v: String,
    pub param: Param,
    pub truth: f64,
    pub estimate: Option<f64>,
}

impl RecoveryRow {
    pub fn error(&self) -> Option<f64> {
        self.estimate.map(|e| e - self.truth)
    }
}

/// Compare generating parameters with the group values implied by `point`
///
/// `sessions[i]` holds the group parameters of session `i + 1`. One row is
/// produced per `cond_v` cell (in order of first appearance) and
/// parameter. Cells whose condition is absent from `sessions` are skipped.
pub fn recovery_table(
    model: &CompiledModel,
    data: &Dataset,
    sessions: &[BTreeMap<String, DdmParams>],
    point: &ParameterPoint,
) -> Result<Vec<RecoveryRow>, MissingValue> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();

    for (row_idx, row) in data.rows.iter().enumerate() {
        if seen.contains(&row.cond_v.as_str()) {
            continue;
        }
        seen.push(&row.cond_v);

        let Some(truth) = (row.session as usize)
            .checked_sub(1)
            .and_then(|s| sessions.get(s))
            .and_then(|conditions| conditions.get(&row.condition))
        else {
            continue;
        };

        for param in Param::ALL {
            out.push(RecoveryRow {
                cond_v: row.cond_v.clone(),
                param,
                truth: truth.get(param),
                estimate: model.group_value(param, row_idx, point)?,
            });
        }
    }
    Ok(out)
}

pub fn format_recovery(rows: &[RecoveryRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:>5} {:>10} {:>10} {:>10}",
        "cell", "param", "truth", "estimate", "error"
    );
    for row in rows {
        let estimate = row
            .estimate
            .map_or_else(|| "-".to_string(), |e| format!("{:.4}", e));
        let error = row
            .error()
            .map_or_else(|| "-".to_string(), |e| format!("{:+.4}", e));
        let _ = writeln!(
            out,
            "{:<8} {:>5} {:>10.4} {:>10} {:>10}",
            row.cond_v, row.param, row.truth, estimate, error
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::Trial;
    use crate::dataset::merge_sessions;
    use crate::regression::{gonogo_regressions, link::logistic, ModelSpec};

    fn trial(subj_idx: usize, condition: &str, response: u8, rt: f64) -> Trial {
        Trial {
            subj_idx,
            condition: condition.to_string(),
            response,
            rt,
        }
    }

    fn sessions() -> Vec<BTreeMap<String, DdmParams>> {
        let mut s1 = BTreeMap::new();
        s1.insert("go".to_string(), DdmParams::new(0.3, 2.0, 0.3, 0.6));
        s1.insert("nogo".to_string(), DdmParams::new(-1.0, 2.0, 0.3, 0.4));
        let mut s2 = BTreeMap::new();
        s2.insert("go".to_string(), DdmParams::new(0.6, 1.5, 0.2, 0.7));
        s2.insert("nogo".to_string(), DdmParams::new(-1.5, 1.5, 0.2, 0.3));
        vec![s1, s2]
    }

    #[test]
    fn test_recovery_table() {
        let mut data = merge_sessions(
            vec![trial(0, "go", 1, 0.9), trial(0, "nogo", 0, 1.2)],
            vec![trial(0, "go", 1, 0.7), trial(0, "nogo", 1, 0.8)],
        );
        data.mark_no_response();
        let spec = ModelSpec::new(&gonogo_regressions(), &[Param::Z]).unwrap();
        let model = CompiledModel::compile(&spec, &data).unwrap();

        let mut point = ParameterPoint::new();
        for column in model.reported_columns() {
            point.insert(column, 0.0);
        }
        point.insert("a_Intercept".to_string(), 2.0);
        point.insert("a_beta.1".to_string(), -0.5);
        point.insert("t_Intercept".to_string(), 0.3);
        point.insert("v_Intercept".to_string(), 0.3);
        point.insert("z_Intercept".to_string(), 0.4);

        let rows = recovery_table(&model, &data, &sessions(), &point).unwrap();
        assert_eq!(rows.len(), 4 * 4);
        assert_eq!(rows[0].cond_v, "go1");
        assert_eq!(rows[4].cond_v, "nogo1");

        let a_go2 = rows
            .iter()
            .find(|r| r.cond_v == "go2" && r.param == Param::A)
            .unwrap();
        assert_eq!(a_go2.truth, 1.5);
        assert!(a_go2.error().unwrap().abs() < 1e-12);

        // Session 2 bias is reported after the contrast flips its sign
        let z_go2 = rows
            .iter()
            .find(|r| r.cond_v == "go2" && r.param == Param::Z)
            .unwrap();
        assert!((z_go2.estimate.unwrap() - logistic(-0.4)).abs() < 1e-12);

        let text = format_recovery(&rows);
        assert_eq!(text.lines().count(), 17);
        assert!(text.lines().nth(1).unwrap().starts_with("go1"));
    }

    #[test]
    fn test_fixed_z_reported() {
        let data = merge_sessions(vec![trial(1, "go", 1, 0.9)], vec![trial(1, "go", 1, 0.7)]);
        let spec = ModelSpec::new(&[], &[]).unwrap();
        let model = CompiledModel::compile(&spec, &data).unwrap();
        let mut point = ParameterPoint::new();
        for p in ["v", "a", "t"] {
            point.insert(format!("{}_Intercept", p), 1.0);
        }
        let rows = recovery_table(&model, &data, &sessions(), &point).unwrap();
        let z = rows.iter().find(|r| r.param == Param::Z).unwrap();
        assert_eq!(z.estimate, Some(0.5));
    }
}
