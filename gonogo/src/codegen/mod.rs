//! Code generation backends
//!
//! Only Stan is supported: the generated program is handed to CmdStan by
//! [`crate::stanrun`].

pub mod stan;

pub use stan::{generate_stan, stan_data, stan_inits, DEVIANCE_COLUMN};
