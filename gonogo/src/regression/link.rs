//! Link functions mapping a linear predictor onto a parameter's range

use super::design::{DesignError, DesignMatrix};
use super::formula::{parse_rhs, Term};
use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// Design of the session contrast used for the bias parameter
pub const SESSION_CONTRAST: &str = "0 + C(session, [[1], [-1]])";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFunction {
    /// Linear predictor used as-is
    #[default]
    Identity,
    /// `1 / (1 + exp(-x))`
    Logistic,
    /// `1 / (1 + exp(-(x * s)))` where `s` is the single column of the
    /// given contrast design evaluated on each row
    LogisticContrast(String),
}

impl LinkFunction {
    /// The bias link: +1 for session 1, -1 for session 2
    pub fn session_contrast() -> Self {
        LinkFunction::LogisticContrast(SESSION_CONTRAST.to_string())
    }

    /// Per-row multiplier `s`, present only for contrast links
    pub fn design_vector(&self, data: &Dataset) -> Result<Option<Vec<f64>>, DesignError> {
        let LinkFunction::LogisticContrast(source) = self else {
            return Ok(None);
        };

        let rhs = parse_rhs(source)?;
        let single_contrast = !rhs.intercept
            && rhs.terms.len() == 1
            && matches!(
                &rhs.terms[0],
                Term::Categorical { contrast: Some(m), .. } if m.first().map(Vec::len) == Some(1)
            );
        if !single_contrast {
            return Err(DesignError::LinkDesign(source.clone()));
        }

        let design = DesignMatrix::build(&rhs, data)?;
        Ok(Some(design.column(0)))
    }

    /// Apply the link to a linear predictor; `stim` is the row's design
    /// value and is ignored by non-contrast links
    pub fn apply(&self, x: f64, stim: f64) -> f64 {
        match self {
            LinkFunction::Identity => x,
            LinkFunction::Logistic => logistic(x),
            LinkFunction::LogisticContrast(_) => logistic(x * stim),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LinkFunction::Identity => "identity".to_string(),
            LinkFunction::Logistic => "logistic".to_string(),
            LinkFunction::LogisticContrast(design) => format!("logistic over {}", design),
        }
    }
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::Trial;
    use crate::dataset::merge_sessions;

    fn data() -> Dataset {
        let t = |condition: &str| Trial {
            subj_idx: 0,
            condition: condition.to_string(),
            response: 1,
            rt: 0.6,
        };
        merge_sessions(vec![t("go"), t("nogo")], vec![t("go")])
    }

    #[test]
    fn test_session_contrast_vector() {
        let stim = LinkFunction::session_contrast()
            .design_vector(&data())
            .unwrap()
            .unwrap();
        assert_eq!(stim, vec![1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_contrast_link_flips_sign_between_sessions() {
        let link = LinkFunction::session_contrast();
        let s1 = link.apply(0.4, 1.0);
        let s2 = link.apply(0.4, -1.0);
        assert!((s1 + s2 - 1.0).abs() < 1e-12);
        assert!(s1 > 0.5 && s1 < 1.0);
        assert!(s2 > 0.0 && s2 < 0.5);
    }

    #[test]
    fn test_identity_ignores_stim() {
        assert_eq!(LinkFunction::Identity.apply(-1.3, -1.0), -1.3);
        assert!(LinkFunction::Identity.design_vector(&data()).unwrap().is_none());
        assert_eq!(LinkFunction::Logistic.apply(0.0, 7.0), 0.5);
    }

    #[test]
    fn test_rejects_non_contrast_design() {
        let link = LinkFunction::LogisticContrast("1 + C(session)".to_string());
        assert!(matches!(
            link.design_vector(&data()),
            Err(DesignError::LinkDesign(_))
        ));
    }

    #[test]
    fn test_link_serde() {
        let json = serde_json::to_string(&LinkFunction::session_contrast()).unwrap();
        assert_eq!(json, r#"{"logistic_contrast":"0 + C(session, [[1], [-1]])"}"#);
        let back: LinkFunction = serde_json::from_str(r#""identity""#).unwrap();
        assert_eq!(back, LinkFunction::Identity);
    }
}
