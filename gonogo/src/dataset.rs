//! Trial table: session merging, labelling and CSV persistence
//!
//! The on-disk layout mirrors a pandas export: an unnamed row-index column
//! followed by `rt,response,subj_idx,condition,session,cond_v`.

use crate::datagen::Trial;
use crate::wiener::NO_RESPONSE_RT;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const CSV_COLUMNS: [&str; 6] = ["rt", "response", "subj_idx", "condition", "session", "cond_v"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("empty CSV file")]
    Empty,

    #[error("missing column `{0}`")]
    MissingColumn(&'static str),

    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid {column} value `{value}`")]
    InvalidValue {
        line: usize,
        column: &'static str,
        value: String,
    },
}

/// One labelled trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub subj_idx: usize,
    pub condition: String,
    pub session: f64,
    pub response: u8,
    pub rt: f64,
    pub cond_v: String,
}

/// Value of a covariate on one row, as seen by the design builder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Covariate<'a> {
    Number(f64),
    Label(&'a str),
}

impl TrialRecord {
    pub fn covariate(&self, name: &str) -> Option<Covariate<'_>> {
        match name {
            "session" => Some(Covariate::Number(self.session)),
            "subj_idx" => Some(Covariate::Number(self.subj_idx as f64)),
            "response" => Some(Covariate::Number(f64::from(self.response))),
            "rt" => Some(Covariate::Number(self.rt)),
            "condition" => Some(Covariate::Label(&self.condition)),
            "cond_v" => Some(Covariate::Label(&self.cond_v)),
            _ => None,
        }
    }

    pub fn is_no_response(&self) -> bool {
        self.response == 0
    }
}

/// Composite condition x session label, e.g. `nogo2`
pub fn cond_label(condition: &str, session: f64) -> String {
    format!("{}{}", condition, session as i64)
}

/// Merged, labelled trial table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<TrialRecord>,
}

impl Dataset {
    /// Concatenate sessions in order, tagging the i-th with session `i + 1`
    pub fn from_sessions(sessions: Vec<Vec<Trial>>) -> Self {
        let rows = sessions
            .into_iter()
            .enumerate()
            .flat_map(|(idx, trials)| {
                let session = (idx + 1) as f64;
                trials.into_iter().map(move |trial| TrialRecord {
                    cond_v: cond_label(&trial.condition, session),
                    subj_idx: trial.subj_idx,
                    condition: trial.condition,
                    session,
                    response: trial.response,
                    rt: trial.rt,
                })
            })
            .collect();
        Self { rows }
    }

    /// Overwrite the RT of every withheld response with the sentinel
    ///
    /// Returns the number of rows marked.
    pub fn mark_no_response(&mut self) -> usize {
        let mut marked = 0;
        for row in self.rows.iter_mut().filter(|r| r.is_no_response()) {
            row.rt = NO_RESPONSE_RT;
            marked += 1;
        }
        marked
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted distinct subject ids
    pub fn subjects(&self) -> Vec<usize> {
        let ids: BTreeSet<usize> = self.rows.iter().map(|r| r.subj_idx).collect();
        ids.into_iter().collect()
    }

    /// Trial counts keyed by (cond_v, subject)
    pub fn cell_counts(&self) -> BTreeMap<(String, usize), usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry((row.cond_v.clone(), row.subj_idx)).or_insert(0) += 1;
        }
        counts
    }

    /// Smallest RT among trials with an observed response
    pub fn min_observed_rt(&self) -> Option<f64> {
        self.rows
            .iter()
            .filter(|r| r.rt >= 0.0)
            .map(|r| r.rt)
            .fold(None, |acc: Option<f64>, rt| Some(acc.map_or(rt, |m| m.min(rt))))
    }

    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, ",{}", CSV_COLUMNS.join(","));
        for (idx, row) in self.rows.iter().enumerate() {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{:.1},{}",
                idx, row.rt, row.response, row.subj_idx, row.condition, row.session, row.cond_v
            );
        }
        out
    }

    /// Write the table, replacing any existing file
    pub fn write_csv(&self, path: &Path) -> Result<(), DatasetError> {
        fs::write(path, self.to_csv_string()).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_csv(path: &Path) -> Result<Self, DatasetError> {
        let content = fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_csv(&content)
    }

    /// Parse CSV content; a leading index column is optional and `cond_v`
    /// is rebuilt when absent
    pub fn parse_csv(content: &str) -> Result<Self, DatasetError> {
        let mut lines = content.lines();

        let header = lines.next().ok_or(DatasetError::Empty)?;
        let columns: Vec<&str> = header.split(',').map(|s| s.trim()).collect();

        let find = |name: &'static str| {
            columns
                .iter()
                .position(|&c| c == name)
                .ok_or(DatasetError::MissingColumn(name))
        };
        let rt_idx = find("rt")?;
        let response_idx = find("response")?;
        let subj_idx = find("subj_idx")?;
        let condition_idx = find("condition")?;
        let session_idx = find("session")?;
        let cond_v_idx = columns.iter().position(|&c| c == "cond_v");

        let mut rows = Vec::new();

        for (line_num, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = line_num + 2;

            let values: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
            if values.len() != columns.len() {
                return Err(DatasetError::FieldCount {
                    line: line_no,
                    expected: columns.len(),
                    found: values.len(),
                });
            }

            let invalid = |column: &'static str, value: &str| DatasetError::InvalidValue {
                line: line_no,
                column,
                value: value.to_string(),
            };

            let rt: f64 = values[rt_idx]
                .parse()
                .map_err(|_| invalid("rt", values[rt_idx]))?;
            // pandas writes integer-valued floats as `1.0`
            let response: f64 = values[response_idx]
                .parse()
                .map_err(|_| invalid("response", values[response_idx]))?;
            if response != 0.0 && response != 1.0 {
                return Err(invalid("response", values[response_idx]));
            }
            let subject: f64 = values[subj_idx]
                .parse()
                .map_err(|_| invalid("subj_idx", values[subj_idx]))?;
            if subject < 0.0 || subject.fract() != 0.0 {
                return Err(invalid("subj_idx", values[subj_idx]));
            }
            let session: f64 = values[session_idx]
                .parse()
                .map_err(|_| invalid("session", values[session_idx]))?;

            let condition = values[condition_idx].to_string();
            let cond_v = match cond_v_idx {
                Some(idx) => values[idx].to_string(),
                None => cond_label(&condition, session),
            };

            rows.push(TrialRecord {
                subj_idx: subject as usize,
                condition,
                session,
                response: response as u8,
                rt,
                cond_v,
            });
        }

        Ok(Self { rows })
    }
}

/// Concatenate two session tables (session 1 first) and label them
pub fn merge_sessions(first: Vec<Trial>, second: Vec<Trial>) -> Dataset {
    Dataset::from_sessions(vec![first, second])
}
