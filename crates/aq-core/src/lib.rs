//! # aq-core
//!
//! Core building blocks for AquaCal: the error taxonomy, the value types
//! shared between the calibration engine and its callers, and the traits
//! behind which the external collaborators (model executable, parameter
//! stores, ensemble materialization) live.
//!
//! This crate deliberately has no knowledge of file formats or scoring
//! logic; higher-level crates depend on it, never the other way around.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{EnsembleRow, EnsembleTable, Fitness, Parameter};
