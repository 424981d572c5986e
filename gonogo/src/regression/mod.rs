//! Regression layer: formulas, design matrices, link functions and the
//! compiled hierarchical model

pub mod design;
pub mod formula;
pub mod link;
pub mod model;

pub use design::{levels, DesignError, DesignMatrix, Level};
pub use formula::{parse_rhs, Formula, FormulaError, Rhs, Term};
pub use link::{logistic, LinkFunction, SESSION_CONTRAST};
pub use model::{
    gonogo_regressions, CompiledModel, CompiledRegression, MissingValue, ModelSpec,
    ParameterPoint, Prior, RegressionConfig, RegressionSpec, DEFAULT_Z,
};
