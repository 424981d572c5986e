//! Design matrices built from formula right-hand sides

use super::formula::{Rhs, Term};
use crate::dataset::{Covariate, Dataset, TrialRecord};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DesignError {
    #[error("unknown covariate `{0}`")]
    UnknownCovariate(String),

    #[error("covariate `{0}` is not numeric")]
    NonNumeric(String),

    #[error("contrast for `{covariate}` has {rows} rows but the data has {levels} levels")]
    ContrastShape {
        covariate: String,
        rows: usize,
        levels: usize,
    },

    #[error("cannot build a design matrix from an empty dataset")]
    EmptyData,

    #[error(transparent)]
    Formula(#[from] super::formula::FormulaError),

    #[error("link design `{0}` must be a single contrast-coded term without intercept")]
    LinkDesign(String),

    #[error("parameter `{0}` is specified more than once")]
    DuplicateParam(String),
}

/// A categorical level, ordered numerically for numbers and lexically for labels
#[derive(Debug, Clone, PartialEq)]
pub enum Level {
    Number(f64),
    Label(String),
}

impl Level {
    fn of(value: Covariate<'_>) -> Self {
        match value {
            Covariate::Number(x) => Level::Number(x),
            Covariate::Label(s) => Level::Label(s.to_string()),
        }
    }

    fn matches(&self, value: Covariate<'_>) -> bool {
        match (self, value) {
            (Level::Number(a), Covariate::Number(b)) => *a == b,
            (Level::Label(a), Covariate::Label(b)) => a == b,
            _ => false,
        }
    }

    /// Rendering used in column names, e.g. `2.0` or `nogo1`
    pub fn render(&self) -> String {
        match self {
            Level::Number(x) => format!("{:?}", x),
            Level::Label(s) => s.clone(),
        }
    }

    fn cmp_level(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Level::Number(a), Level::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Level::Label(a), Level::Label(b)) => a.cmp(b),
            (Level::Number(_), Level::Label(_)) => Ordering::Less,
            (Level::Label(_), Level::Number(_)) => Ordering::Greater,
        }
    }
}

/// Sorted distinct levels of a covariate
pub fn levels(data: &Dataset, covariate: &str) -> Result<Vec<Level>, DesignError> {
    let mut out: Vec<Level> = Vec::new();
    for row in &data.rows {
        let value = row
            .covariate(covariate)
            .ok_or_else(|| DesignError::UnknownCovariate(covariate.to_string()))?;
        if !out.iter().any(|l| l.matches(value)) {
            out.push(Level::of(value));
        }
    }
    out.sort_by(Level::cmp_level);
    Ok(out)
}

/// Dense N x K design matrix with patsy-style column names
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// How one term expands into columns for a given row
enum Encoder {
    Numeric(String),
    Categorical {
        covariate: String,
        levels: Vec<Level>,
        /// levels x columns
        coding: Vec<Vec<f64>>,
    },
}

impl Encoder {
    fn encode(&self, row: &TrialRecord, out: &mut Vec<f64>) -> Result<(), DesignError> {
        match self {
            Encoder::Numeric(name) => match row.covariate(name) {
                Some(Covariate::Number(x)) => out.push(x),
                Some(Covariate::Label(_)) => return Err(DesignError::NonNumeric(name.clone())),
                None => return Err(DesignError::UnknownCovariate(name.clone())),
            },
            Encoder::Categorical {
                covariate,
                levels,
                coding,
            } => {
                let value = row
                    .covariate(covariate)
                    .ok_or_else(|| DesignError::UnknownCovariate(covariate.clone()))?;
                // Levels were collected from this same dataset
                let idx = levels.iter().position(|l| l.matches(value)).unwrap_or(0);
                out.extend_from_slice(&coding[idx]);
            }
        }
        Ok(())
    }
}

impl DesignMatrix {
    /// Build the design matrix of `rhs` over every row of `data`
    ///
    /// Without an intercept the first categorical term is full-rank coded
    /// (one indicator per level); every other categorical term drops its
    /// first level. Explicit contrasts are used verbatim.
    pub fn build(rhs: &Rhs, data: &Dataset) -> Result<Self, DesignError> {
        if data.is_empty() {
            return Err(DesignError::EmptyData);
        }

        let mut columns = Vec::new();
        if rhs.intercept {
            columns.push("Intercept".to_string());
        }

        let mut full_rank_pending = !rhs.intercept;
        let mut encoders = Vec::with_capacity(rhs.terms.len());

        for term in &rhs.terms {
            match term {
                Term::Numeric(name) => {
                    columns.push(name.clone());
                    encoders.push(Encoder::Numeric(name.clone()));
                }
                Term::Categorical {
                    covariate,
                    contrast,
                } => {
                    let levels = levels(data, covariate)?;
                    let coding = match contrast {
                        Some(matrix) => {
                            if matrix.len() != levels.len() {
                                return Err(DesignError::ContrastShape {
                                    covariate: covariate.clone(),
                                    rows: matrix.len(),
                                    levels: levels.len(),
                                });
                            }
                            let width = matrix.first().map(Vec::len).unwrap_or(0);
                            for k in 0..width {
                                columns.push(format!("C({})[custom{}]", covariate, k));
                            }
                            matrix.clone()
                        }
                        None if full_rank_pending => {
                            full_rank_pending = false;
                            for level in &levels {
                                columns.push(format!("C({})[{}]", covariate, level.render()));
                            }
                            indicator_coding(levels.len(), 0)
                        }
                        None => {
                            for level in levels.iter().skip(1) {
                                columns.push(format!("C({})[T.{}]", covariate, level.render()));
                            }
                            indicator_coding(levels.len(), 1)
                        }
                    };
                    encoders.push(Encoder::Categorical {
                        covariate: covariate.clone(),
                        levels,
                        coding,
                    });
                }
            }
        }

        let mut rows = Vec::with_capacity(data.len());
        for record in &data.rows {
            let mut row = Vec::with_capacity(columns.len());
            if rhs.intercept {
                row.push(1.0);
            }
            for encoder in &encoders {
                encoder.encode(record, &mut row)?;
            }
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column as a vector
    pub fn column(&self, k: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[k]).collect()
    }
}

/// Indicator coding for `n` levels, dropping the first `skip` levels
fn indicator_coding(n: usize, skip: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|level| {
            (skip..n)
                .map(|col| if col == level { 1.0 } else { 0.0 })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::Trial;
    use crate::dataset::merge_sessions;
    use crate::regression::formula::parse_rhs;

    fn data() -> Dataset {
        let t = |condition: &str| Trial {
            subj_idx: 0,
            condition: condition.to_string(),
            response: 1,
            rt: 0.6,
        };
        merge_sessions(vec![t("go"), t("nogo")], vec![t("nogo"), t("go")])
    }

    #[test]
    fn test_treatment_coding_session() {
        let design = DesignMatrix::build(&parse_rhs("1 + C(session)").unwrap(), &data()).unwrap();
        assert_eq!(design.columns, vec!["Intercept", "C(session)[T.2.0]"]);
        assert_eq!(design.rows[0], vec![1.0, 0.0]);
        assert_eq!(design.rows[2], vec![1.0, 1.0]);
    }

    #[test]
    fn test_treatment_coding_cond_v() {
        let design = DesignMatrix::build(&parse_rhs("1 + C(cond_v)").unwrap(), &data()).unwrap();
        assert_eq!(
            design.columns,
            vec![
                "Intercept",
                "C(cond_v)[T.go2]",
                "C(cond_v)[T.nogo1]",
                "C(cond_v)[T.nogo2]"
            ]
        );
        // go1 is the reference cell
        assert_eq!(design.rows[0], vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(design.rows[1], vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(design.rows[2], vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(design.rows[3], vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_explicit_contrast() {
        let design =
            DesignMatrix::build(&parse_rhs("0 + C(session, [[1], [-1]])").unwrap(), &data())
                .unwrap();
        assert_eq!(design.columns, vec!["C(session)[custom0]"]);
        assert_eq!(design.column(0), vec![1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_full_rank_without_intercept() {
        let design = DesignMatrix::build(&parse_rhs("0 + C(condition)").unwrap(), &data()).unwrap();
        assert_eq!(design.columns, vec!["C(condition)[go]", "C(condition)[nogo]"]);
        assert_eq!(design.rows[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_errors() {
        let err = DesignMatrix::build(&parse_rhs("1 + C(block)").unwrap(), &data()).unwrap_err();
        assert_eq!(err, DesignError::UnknownCovariate("block".to_string()));

        let err = DesignMatrix::build(&parse_rhs("1 + condition").unwrap(), &data()).unwrap_err();
        assert_eq!(err, DesignError::NonNumeric("condition".to_string()));

        let err = DesignMatrix::build(&parse_rhs("0 + C(cond_v, [[1], [-1]])").unwrap(), &data())
            .unwrap_err();
        assert!(matches!(err, DesignError::ContrastShape { rows: 2, levels: 4, .. }));

        let err = DesignMatrix::build(&parse_rhs("1").unwrap(), &Dataset::default()).unwrap_err();
        assert_eq!(err, DesignError::EmptyData);
    }
}
