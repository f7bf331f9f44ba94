//! Common data types for AquaCal

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A calibration parameter exposed by the model configuration.
///
/// The engine treats candidate parameter vectors as positional, in the
/// order the parameters were declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name (used in logs and reports).
    pub name: String,
    /// Lower bound of the admissible range.
    pub minimum: f64,
    /// Upper bound of the admissible range.
    pub maximum: f64,
    /// Whether the parameter is explored on a base-10 logarithmic scale.
    #[serde(default)]
    pub log_scale: bool,
}

impl Parameter {
    /// Create a linearly-scaled parameter.
    pub fn new(name: impl Into<String>, minimum: f64, maximum: f64) -> Self {
        Self { name: name.into(), minimum, maximum, log_scale: false }
    }

    /// Create a log-scaled parameter.
    pub fn new_log(name: impl Into<String>, minimum: f64, maximum: f64) -> Self {
        Self { name: name.into(), minimum, maximum, log_scale: true }
    }

    /// Whether `value` lies within the declared bounds (inclusive).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.minimum && value <= self.maximum
    }
}

/// Outcome of scoring one candidate parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fitness {
    /// Finite Gaussian log-likelihood of the candidate.
    LogLikelihood(f64),
    /// Non-viable candidate: out-of-range parameter, failed model run,
    /// non-finite interpolated value, or degenerate scale factor.
    Rejected,
}

impl Fitness {
    /// Collapse to a plain score for an optimizer: the log-likelihood, or
    /// negative infinity for a rejected candidate.
    pub fn ln_likelihood(&self) -> f64 {
        match self {
            Fitness::LogLikelihood(v) => *v,
            Fitness::Rejected => f64::NEG_INFINITY,
        }
    }

    /// Whether the candidate was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Fitness::Rejected)
    }
}

/// One scored candidate: parameter vector plus its log-likelihood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleRow {
    /// Candidate parameter values, positional.
    pub parameters: Vec<f64>,
    /// Log-likelihood returned by the evaluator.
    pub log_likelihood: f64,
}

/// Append-only table of scored candidates.
///
/// Produced by repeated evaluator calls during a search; read-only input
/// to the ensemble resampler. Serializable so a search can be resumed and
/// the resampling step run offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsembleTable {
    /// Scored candidates, in evaluation order.
    pub rows: Vec<EnsembleRow>,
}

impl EnsembleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scored candidate. Rejected candidates are skipped: the
    /// resampler only ever sees finite log-likelihoods.
    pub fn record(&mut self, parameters: Vec<f64>, fitness: Fitness) {
        if let Fitness::LogLikelihood(ll) = fitness {
            self.rows.push(EnsembleRow { parameters, log_likelihood: ll });
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read a table from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the table to a JSON file.
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
