//! Error types for AquaCal

use thiserror::Error;

/// AquaCal error type
///
/// Only configuration-time and load-time problems are represented here.
/// Per-candidate failures during scoring are absorbed into
/// [`crate::Fitness::Rejected`] and never surface as errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent calibration declaration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Observation line that does not match the expected layout
    #[error("Format error on line {line}: {message}")]
    Format {
        /// 1-based line number in the observation file.
        line: usize,
        /// Description of the violation, including the offending text.
        message: String,
    },

    /// Non-finite or unparseable numeric field in an observation file
    #[error("Data error on line {line}: {message}")]
    Data {
        /// 1-based line number in the observation file.
        line: usize,
        /// Description of the bad field.
        message: String,
    },

    /// Stale or unreadable observation cache
    #[error("Cache error: {0}")]
    Cache(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
