//! # aq-engine
//!
//! The AquaCal calibration engine. Two tightly coupled subsystems carry
//! the core work:
//!
//! - the **likelihood evaluator** ([`likelihood::Evaluator`]), which
//!   reconciles irregular model output against observation records through
//!   time/depth interpolation, optional scale-factor fitting and noise
//!   estimation, and condenses the comparison into one Gaussian
//!   log-likelihood per candidate parameter vector;
//! - the **ensemble resampler** ([`ensemble::resample`]), which turns the
//!   accumulated table of scored candidates into a posterior ensemble,
//!   correcting likelihood-based selection for non-uniform exploration of
//!   parameter space with a nearest-neighbor density proxy.
//!
//! Supporting modules: observation loading and caching
//! ([`observations`]), interpolation-index construction ([`interp`]), the
//! value-expression engine ([`expr`]), the in-memory gridded dataset
//! ([`dataset`]) and the calibration declaration ([`config`]).
//!
//! The evaluator is a synchronous, blocking function with no internal
//! concurrency; parallelism across candidates belongs to the caller,
//! which may share loaded observation sets read-only across evaluator
//! sessions over isolated working directories.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dataset;
pub mod ensemble;
pub mod expr;
pub mod interp;
pub mod likelihood;
pub mod observations;

pub use config::CalibrationConfig;
pub use dataset::{GriddedDataset, ModelRunner, TimeUnits};
pub use ensemble::{resample, ResampleOptions};
pub use expr::CompiledExpr;
pub use interp::{DepthConvention, InterpolationIndex};
pub use likelihood::Evaluator;
pub use observations::{FitOptions, ObservationKind, ObservationSet};
