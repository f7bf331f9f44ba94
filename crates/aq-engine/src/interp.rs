//! Interpolation index: the one-time mapping from observation records to
//! the model's own axes.
//!
//! Built once per observation set and reused across repeated evaluations
//! within a job session (the model's time axis is assumed stable across
//! runs of the same job; the evaluator re-checks the axis length on every
//! score and rejects the candidate if it changed).
//!
//! Construction validates the value expression against the output's
//! variable catalog, checks that all referenced variables share one
//! dimension layout, tags the depth-coordinate convention for profile
//! sets, and precomputes a bracketing (index, weight) pair on the model
//! time axis for every observation record. Records outside the model's
//! time span are dropped here, not errored.

use crate::dataset::GriddedDataset;
use crate::expr::CompiledExpr;
use crate::observations::{ObservationKind, ObservationSet};
use aq_core::{Error, Result};

/// Depth-coordinate convention of a profile variable.
///
/// Changes the depth-reconstruction arithmetic: center-tagged variables
/// live half a cell above the cumulative thickness, interface-tagged
/// variables live on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthConvention {
    /// Values at cell centers (`z` dimension).
    Center,
    /// Values at cell interfaces, bottom interface excluded (`z1`).
    Interface,
}

/// Bracketing position of one observation on the model time axis.
///
/// The interpolated model value is
/// `weight * model[left] + (1 - weight) * model[left + 1]`, so an
/// observation coinciding with a model sample resolves to that exact
/// sample (weight 1 at the left end of the bracket, 0 at the right).
#[derive(Debug, Clone, Copy)]
pub struct TimeBracket {
    /// Index of the left bracketing sample.
    pub left: usize,
    /// Weight of the left sample.
    pub weight: f64,
}

/// Precomputed interpolation state for one observation set.
#[derive(Debug, Clone)]
pub struct InterpolationIndex {
    expression: CompiledExpr,
    depth_convention: Option<DepthConvention>,
    time_axis_len: usize,
    numeric_times: Vec<f64>,
    brackets: Vec<TimeBracket>,
    depths: Option<Vec<f64>>,
    values: Vec<f64>,
}

impl InterpolationIndex {
    /// Build the index for `observation` against a model output.
    pub fn build(observation: &ObservationSet, dataset: &GriddedDataset) -> Result<Self> {
        let options = observation.options();
        let expression = CompiledExpr::compile(&options.expression)?;
        if expression.variables().is_empty() {
            return Err(Error::Config(format!(
                "expression '{}' references no model variables",
                options.expression
            )));
        }
        for name in expression.variables() {
            if !dataset.contains(name) {
                return Err(Error::Config(format!(
                    "expression '{}' references '{name}', which is not present in '{}'",
                    options.expression,
                    options.output_path.display()
                )));
            }
        }

        let depth_convention =
            validate_dimensions(observation.kind(), expression.variables(), dataset)?;

        let time = dataset.time();
        if time.len() < 2 {
            return Err(Error::Config(format!(
                "time axis of '{}' has fewer than two samples",
                options.output_path.display()
            )));
        }
        if time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Config(format!(
                "time axis of '{}' is not strictly increasing",
                options.output_path.display()
            )));
        }

        let units = dataset.time_units();
        let last = *time.last().unwrap();
        let mut numeric_times = Vec::new();
        let mut brackets = Vec::new();
        let mut keep = Vec::with_capacity(observation.len());
        for timestamp in observation.times() {
            let numtime = units.encode(*timestamp);
            if numtime < time[0] || numtime > last {
                keep.push(false);
                continue;
            }
            let r = time.partition_point(|&t| t < numtime).max(1);
            let weight = (time[r] - numtime) / (time[r] - time[r - 1]);
            numeric_times.push(numtime);
            brackets.push(TimeBracket { left: r - 1, weight });
            keep.push(true);
        }

        let values = select(observation.values(), &keep);
        let depths = observation.depths().map(|d| select(d, &keep));

        Ok(Self {
            expression,
            depth_convention,
            time_axis_len: time.len(),
            numeric_times,
            brackets,
            depths,
            values,
        })
    }

    /// The compiled value expression.
    pub fn expression(&self) -> &CompiledExpr {
        &self.expression
    }

    /// Depth convention of the matched variables; `None` for timeseries.
    pub fn depth_convention(&self) -> Option<DepthConvention> {
        self.depth_convention
    }

    /// Length of the model time axis the index was built against.
    pub fn time_axis_len(&self) -> usize {
        self.time_axis_len
    }

    /// Numeric model-axis times of the surviving records.
    pub fn numeric_times(&self) -> &[f64] {
        &self.numeric_times
    }

    /// Time brackets of the surviving records.
    pub fn brackets(&self) -> &[TimeBracket] {
        &self.brackets
    }

    /// Depths of the surviving records (profile sets only).
    pub fn depths(&self) -> Option<&[f64]> {
        self.depths.as_deref()
    }

    /// Observed values of the surviving records.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of surviving records.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no records survived the time-span filter.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn select(items: &[f64], keep: &[bool]) -> Vec<f64> {
    items.iter().zip(keep).filter_map(|(x, &k)| k.then_some(*x)).collect()
}

/// Check that all matched variables share one admissible dimension tuple
/// and extract the depth convention for profile sets.
fn validate_dimensions(
    kind: ObservationKind,
    variables: &[String],
    dataset: &GriddedDataset,
) -> Result<Option<DepthConvention>> {
    let first = &variables[0];
    let dims = dataset.dimensions(first)?;
    if dims.first().map(String::as_str) != Some("time") {
        return Err(Error::Config(format!(
            "first dimension of '{first}' must be time, got {:?}",
            dims.first()
        )));
    }
    let n = dims.len();
    if n < 3 || dims[n - 2] != "lat" || dims[n - 1] != "lon" {
        return Err(Error::Config(format!(
            "last two dimensions of '{first}' must be (lat, lon), got {:?}",
            &dims[n.saturating_sub(2)..]
        )));
    }
    let convention = match kind {
        ObservationKind::Timeseries => {
            if n != 3 {
                return Err(Error::Config(format!(
                    "'{first}' has {n} dimensions, expected (time, lat, lon) for a timeseries fit"
                )));
            }
            None
        }
        ObservationKind::Profile => {
            if n != 4 {
                return Err(Error::Config(format!(
                    "'{first}' has {n} dimensions, expected (time, z, lat, lon) for a profile fit"
                )));
            }
            match dims[1].as_str() {
                "z" => Some(DepthConvention::Center),
                "z1" => Some(DepthConvention::Interface),
                other => {
                    return Err(Error::Config(format!(
                        "second dimension of '{first}' must be depth (z or z1), got '{other}'"
                    )));
                }
            }
        }
    };
    for name in &variables[1..] {
        let other = dataset.dimensions(name)?;
        if other != dims {
            return Err(Error::Config(format!(
                "dimensions of '{name}' {other:?} do not match '{first}' {dims:?}; \
                 cannot combine both in one expression"
            )));
        }
    }
    Ok(convention)
}
