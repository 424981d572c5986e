//! Patsy-style regression formulas
//!
//! Supported grammar:
//!
//! ```text
//! formula := param "~" rhs
//! rhs     := term ("+" term)*
//! term    := "1" | "0" | "C(" name ")" | "C(" name "," matrix ")" | name
//! matrix  := "[" row ("," row)* "]"
//! row     := "[" number ("," number)* "]"
//! ```

use crate::ddm::Param;
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormulaError {
    #[error("formula `{0}` has no `~`")]
    MissingTilde(String),

    #[error("unknown outcome `{0}` (expected one of v, a, t, z)")]
    UnknownOutcome(String),

    #[error("empty term in `{0}`")]
    EmptyTerm(String),

    #[error("unbalanced brackets in `{0}`")]
    Unbalanced(String),

    #[error("malformed term `{0}`")]
    BadTerm(String),

    #[error("malformed contrast matrix `{0}`")]
    BadContrast(String),

    #[error("formula `{0}` must include an intercept")]
    MissingIntercept(String),
}

/// A single right-hand-side term
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Categorical covariate, treatment-coded unless a contrast is given.
    /// Contrast rows are levels, columns are output columns.
    Categorical {
        covariate: String,
        contrast: Option<Vec<Vec<f64>>>,
    },
    /// Numeric covariate entered as-is
    Numeric(String),
}

impl Term {
    pub fn covariate(&self) -> &str {
        match self {
            Term::Categorical { covariate, .. } => covariate,
            Term::Numeric(name) => name,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Categorical { covariate, .. } => write!(f, "C({})", covariate),
            Term::Numeric(name) => f.write_str(name),
        }
    }
}

/// Right-hand side of a formula
#[derive(Debug, Clone, PartialEq)]
pub struct Rhs {
    pub intercept: bool,
    pub terms: Vec<Term>,
}

/// `outcome ~ rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub outcome: Param,
    pub rhs: Rhs,
    pub source: String,
}

impl Formula {
    /// Parse a regression formula; the intercept is mandatory because it
    /// carries the subject-level random effect
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let (lhs, rhs) = source
            .split_once('~')
            .ok_or_else(|| FormulaError::MissingTilde(source.to_string()))?;

        let outcome = lhs
            .trim()
            .parse::<Param>()
            .map_err(|_| FormulaError::UnknownOutcome(lhs.trim().to_string()))?;

        let rhs = parse_rhs(rhs)?;
        if !rhs.intercept {
            return Err(FormulaError::MissingIntercept(source.to_string()));
        }

        Ok(Self {
            outcome,
            rhs,
            source: source.trim().to_string(),
        })
    }
}

/// Parse a right-hand side such as `1 + C(session)` or
/// `0 + C(session, [[1], [-1]])`
///
/// Patsy semantics: the intercept is implicit unless `0` appears.
pub fn parse_rhs(source: &str) -> Result<Rhs, FormulaError> {
    let mut intercept = true;
    let mut terms = Vec::new();

    for piece in split_top_level(source)? {
        let piece = piece.trim();
        match piece {
            "" => return Err(FormulaError::EmptyTerm(source.to_string())),
            "1" => intercept = true,
            "0" => intercept = false,
            _ => terms.push(parse_term(piece)?),
        }
    }

    Ok(Rhs { intercept, terms })
}

/// Split on `+` outside of brackets
fn split_top_level(source: &str) -> Result<Vec<&str>, FormulaError> {
    let mut pieces = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;

    for (idx, ch) in source.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(FormulaError::Unbalanced(source.to_string()));
                }
            }
            '+' if depth == 0 => {
                pieces.push(&source[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(FormulaError::Unbalanced(source.to_string()));
    }
    pieces.push(&source[start..]);
    Ok(pieces)
}

fn parse_term(piece: &str) -> Result<Term, FormulaError> {
    if let Some(inner) = piece.strip_prefix("C(") {
        let inner = inner
            .strip_suffix(')')
            .ok_or_else(|| FormulaError::BadTerm(piece.to_string()))?;

        let (name, contrast) = match inner.split_once(',') {
            Some((name, matrix)) => (name.trim(), Some(parse_contrast(matrix.trim())?)),
            None => (inner.trim(), None),
        };

        if !is_identifier(name) {
            return Err(FormulaError::BadTerm(piece.to_string()));
        }
        return Ok(Term::Categorical {
            covariate: name.to_string(),
            contrast,
        });
    }

    if is_identifier(piece) {
        Ok(Term::Numeric(piece.to_string()))
    } else {
        Err(FormulaError::BadTerm(piece.to_string()))
    }
}

fn parse_contrast(source: &str) -> Result<Vec<Vec<f64>>, FormulaError> {
    let bad = || FormulaError::BadContrast(source.to_string());

    let body = source
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(bad)?;

    let mut rows = Vec::new();
    let mut rest = body.trim();
    while !rest.is_empty() {
        let open = rest.strip_prefix('[').ok_or_else(bad)?;
        let close = open.find(']').ok_or_else(bad)?;
        let row = open[..close]
            .split(',')
            .map(|v| v.trim().parse::<f64>().map_err(|_| bad()))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);

        rest = open[close + 1..].trim_start();
        if rest.is_empty() {
            break;
        }
        // Rows are comma separated; a trailing comma is allowed
        rest = rest.strip_prefix(',').ok_or_else(bad)?.trim_start();
    }

    let width = rows.first().map(Vec::len).ok_or_else(bad)?;
    if width == 0 || rows.iter().any(|r| r.len() != width) {
        return Err(bad());
    }
    Ok(rows)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_formula() {
        let f = Formula::parse("z ~ 1 + C(session)").unwrap();
        assert_eq!(f.outcome, Param::Z);
        assert!(f.rhs.intercept);
        assert_eq!(
            f.rhs.terms,
            vec![Term::Categorical {
                covariate: "session".to_string(),
                contrast: None
            }]
        );
    }

    #[test]
    fn test_implicit_intercept() {
        let f = Formula::parse("v ~ C(cond_v)").unwrap();
        assert!(f.rhs.intercept);
        assert_eq!(f.rhs.terms[0].covariate(), "cond_v");
    }

    #[test]
    fn test_intercept_only() {
        let f = Formula::parse("a ~ 1").unwrap();
        assert!(f.rhs.terms.is_empty());
    }

    #[test]
    fn test_contrast_rhs() {
        let rhs = parse_rhs("0 + C(s, [[1], [-1]])").unwrap();
        assert!(!rhs.intercept);
        assert_eq!(
            rhs.terms,
            vec![Term::Categorical {
                covariate: "s".to_string(),
                contrast: Some(vec![vec![1.0], vec![-1.0]]),
            }]
        );
    }

    #[test]
    fn test_numeric_term() {
        let rhs = parse_rhs("1 + rt").unwrap();
        assert_eq!(rhs.terms, vec![Term::Numeric("rt".to_string())]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Formula::parse("v = 1"),
            Err(FormulaError::MissingTilde(_))
        ));
        assert!(matches!(
            Formula::parse("sv ~ 1"),
            Err(FormulaError::UnknownOutcome(_))
        ));
        assert!(matches!(
            Formula::parse("v ~ 0 + C(cond_v)"),
            Err(FormulaError::MissingIntercept(_))
        ));
        assert!(matches!(
            Formula::parse("v ~ 1 + C(cond_v"),
            Err(FormulaError::Unbalanced(_))
        ));
        assert!(matches!(
            Formula::parse("v ~ 1 + "),
            Err(FormulaError::EmptyTerm(_))
        ));
        assert!(matches!(
            parse_rhs("0 + C(s, [[1, 2], [-1]])"),
            Err(FormulaError::BadContrast(_))
        ));
        assert!(matches!(parse_rhs("1 + 2x"), Err(FormulaError::BadTerm(_))));
    }

    #[test]
    fn test_contrast_rows_need_commas() {
        assert!(matches!(
            parse_rhs("0 + C(s, [[1] [-1]])"),
            Err(FormulaError::BadContrast(_))
        ));
        assert!(matches!(
            parse_rhs("0 + C(s, [[1], [-1] [0]])"),
            Err(FormulaError::BadContrast(_))
        ));

        let trailing = parse_rhs("0 + C(s, [[1], [-1],])").unwrap();
        assert_eq!(
            trailing.terms[0],
            Term::Categorical {
                covariate: "s".to_string(),
                contrast: Some(vec![vec![1.0], vec![-1.0]]),
            }
        );
    }
}
