//! Two-session Go/No-go drift-diffusion experiment.
//!
//! Simulates subjects in a Go/No-go task across two sessions, merges the
//! sessions into one labelled trial table and fits a hierarchical
//! diffusion regression through CmdStan.

pub mod codegen;
pub mod config;
pub mod datagen;
pub mod dataset;
pub mod ddm;
pub mod diagnostics;
pub mod experiment;
pub mod recovery;
pub mod regression;
pub mod stanrun;
pub mod wiener;
