//! Calibration declaration: the JSON schema binding parameters and
//! observation sets to a job.
//!
//! The declaration names the parameters being calibrated (with bounds
//! and scale) and the observed variables to fit against, together with
//! their per-set fit options. Model-side configuration formats (the
//! files the parameter bindings write into) are a collaborator concern
//! and never appear here.

use crate::observations::{FitOptions, ObservationKind, ObservationSet};
use aq_core::{Error, Parameter, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_kind() -> ObservationKind {
    ObservationKind::Profile
}

/// One observed variable to fit against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Path to the observation file, relative to the declaration root.
    pub source: PathBuf,
    /// Value expression over model output variables.
    pub expression: String,
    /// Model output file the expression is evaluated against.
    pub output_path: PathBuf,
    /// File layout; profiles unless declared otherwise.
    #[serde(default = "default_kind")]
    pub format: ObservationKind,
    /// Minimum kept depth (downward-positive, meters).
    #[serde(default)]
    pub min_depth: Option<f64>,
    /// Maximum kept depth (downward-positive, meters).
    #[serde(default)]
    pub max_depth: Option<f64>,
    /// Discard records within this many years of the simulation start.
    #[serde(default)]
    pub spinup_years: Option<u32>,
    /// Fit on a base-10 logarithmic scale.
    #[serde(default)]
    pub log_scale: bool,
    /// Floor applied before taking logarithms; required with `log_scale`.
    #[serde(default)]
    pub minimum: Option<f64>,
    /// Fit an optimal model-to-observation scale factor.
    #[serde(default)]
    pub relative_fit: bool,
    /// Lower clamp for the fitted scale factor.
    #[serde(default)]
    pub min_scale_factor: Option<f64>,
    /// Upper clamp for the fitted scale factor.
    #[serde(default)]
    pub max_scale_factor: Option<f64>,
    /// Constant scale factor, applied when `relative_fit` is off.
    #[serde(default)]
    pub fixed_scale_factor: Option<f64>,
    /// Fixed standard deviation of the observation noise; estimated by
    /// maximum likelihood when absent.
    #[serde(default)]
    pub sd: Option<f64>,
}

impl ObservationConfig {
    /// Resolve into fit options, validating cross-field constraints.
    pub fn fit_options(&self) -> Result<FitOptions> {
        if self.log_scale && self.minimum.is_none() {
            return Err(Error::Config(format!(
                "log-scale fitting of '{}' requires the relevant minimum value",
                self.source.display()
            )));
        }
        if let Some(sd) = self.sd {
            if !sd.is_finite() || sd <= 0.0 {
                return Err(Error::Config(format!(
                    "standard deviation for '{}' must be positive, got {sd}",
                    self.source.display()
                )));
            }
        }
        let mut options = FitOptions::new(&self.expression, &self.output_path);
        options.relative_fit = self.relative_fit;
        options.fixed_scale_factor = self.fixed_scale_factor;
        options.min_scale_factor = self.min_scale_factor;
        options.max_scale_factor = self.max_scale_factor;
        options.log_floor = if self.log_scale { self.minimum } else { None };
        options.sd = self.sd;
        options.spinup_years = self.spinup_years;
        if let Some(d) = self.min_depth {
            options.min_depth = d;
        }
        if let Some(d) = self.max_depth {
            options.max_depth = d;
        }
        Ok(options)
    }
}

/// Root calibration declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Calibrated parameters, in binding order.
    pub parameters: Vec<Parameter>,
    /// Observed variables to fit against.
    pub observations: Vec<ObservationConfig>,
    /// Simulation start date, the anchor for spin-up trimming.
    #[serde(default)]
    pub simulation_start: Option<NaiveDate>,
}

impl CalibrationConfig {
    /// Read a declaration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load every declared observation set, resolving source paths
    /// against `root`.
    pub fn load_observations(
        &self,
        root: &Path,
        cache_allowed: bool,
    ) -> Result<Vec<ObservationSet>> {
        self.observations
            .iter()
            .map(|decl| {
                let options = decl.fit_options()?;
                ObservationSet::load(
                    &root.join(&decl.source),
                    decl.format,
                    options,
                    self.simulation_start,
                    cache_allowed,
                )
            })
            .collect()
    }
}
