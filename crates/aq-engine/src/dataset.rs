//! In-memory gridded model output.
//!
//! The external simulation writes its results as a gridded scientific
//! dataset: named variables with dimensions `(time[, depth], lat, lon)`
//! and a time coordinate carrying a CF-style `"<unit> since <reference>"`
//! attribute. Reading that format from disk is the business of the
//! [`ModelRunner`] implementation; the engine only ever sees the
//! in-memory [`GriddedDataset`] form, with the singleton lat/lon corner
//! already addressable through [`GriddedDataset::slice`].

use aq_core::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::Path;

/// Base unit of a model time coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Seconds since the reference instant.
    Seconds,
    /// Minutes since the reference instant.
    Minutes,
    /// Hours since the reference instant.
    Hours,
    /// Days since the reference instant.
    Days,
}

impl TimeUnit {
    fn seconds(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86400.0,
        }
    }
}

/// CF-style time units: `"<unit> since <reference>"`.
///
/// Converts calendar timestamps to numeric offsets on the model's own
/// time axis and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    unit: TimeUnit,
    reference: NaiveDateTime,
}

impl TimeUnits {
    /// Create from a unit and a reference instant.
    pub fn new(unit: TimeUnit, reference: NaiveDateTime) -> Self {
        Self { unit, reference }
    }

    /// Parse a units attribute such as `"seconds since 2000-01-01 00:00:00"`.
    ///
    /// The reference may be a bare date (midnight assumed).
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.splitn(3, ' ');
        let unit = match parts.next() {
            Some("seconds") | Some("second") => TimeUnit::Seconds,
            Some("minutes") | Some("minute") => TimeUnit::Minutes,
            Some("hours") | Some("hour") => TimeUnit::Hours,
            Some("days") | Some("day") => TimeUnit::Days,
            other => {
                return Err(Error::Config(format!(
                    "unsupported time unit {other:?} in units attribute '{text}'"
                )));
            }
        };
        match parts.next() {
            Some("since") => {}
            _ => {
                return Err(Error::Config(format!(
                    "time units attribute '{text}' is missing 'since'"
                )));
            }
        }
        let reference = parts
            .next()
            .ok_or_else(|| Error::Config(format!("time units attribute '{text}' has no reference")))?
            .trim();
        let reference = NaiveDateTime::parse_from_str(reference, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| {
                NaiveDate::parse_from_str(reference, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
            })
            .map_err(|_| {
                Error::Config(format!("cannot parse time reference '{reference}' in '{text}'"))
            })?;
        Ok(Self { unit, reference })
    }

    /// Numeric offset of a calendar timestamp on this axis.
    pub fn encode(&self, t: NaiveDateTime) -> f64 {
        (t - self.reference).num_seconds() as f64 / self.unit.seconds()
    }

    /// Calendar timestamp of a numeric offset on this axis.
    pub fn decode(&self, offset: f64) -> NaiveDateTime {
        self.reference + chrono::Duration::seconds((offset * self.unit.seconds()).round() as i64)
    }
}

/// One named variable of a gridded dataset.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Dimension names, outermost first (e.g. `["time", "z", "lat", "lon"]`).
    pub dimensions: Vec<String>,
    /// Extent of each dimension, same order as `dimensions`.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f64>,
}

/// In-memory model output: named variables plus the time coordinate.
#[derive(Debug, Clone)]
pub struct GriddedDataset {
    variables: BTreeMap<String, Variable>,
    time: Vec<f64>,
    time_units: TimeUnits,
}

impl GriddedDataset {
    /// Create a dataset from its time coordinate.
    pub fn new(time: Vec<f64>, time_units: TimeUnits) -> Self {
        Self { variables: BTreeMap::new(), time, time_units }
    }

    /// Add a variable. The product of `shape` must match the data length
    /// and the leading dimension must span the time axis.
    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        dimensions: &[&str],
        shape: &[usize],
        data: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if dimensions.len() != shape.len() {
            return Err(Error::Config(format!(
                "variable '{name}': {} dimension names for {} extents",
                dimensions.len(),
                shape.len()
            )));
        }
        if shape.iter().product::<usize>() != data.len() {
            return Err(Error::Config(format!(
                "variable '{name}': shape {shape:?} does not match {} values",
                data.len()
            )));
        }
        if shape.first() != Some(&self.time.len()) {
            return Err(Error::Config(format!(
                "variable '{name}': leading extent {:?} does not span the time axis ({})",
                shape.first(),
                self.time.len()
            )));
        }
        self.variables.insert(
            name,
            Variable {
                dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
                shape: shape.to_vec(),
                data,
            },
        );
        Ok(self)
    }

    /// Names of all variables, the catalog the interpolation index matches
    /// expressions against.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(|k| k.as_str())
    }

    /// Whether the catalog contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Dimension names of a variable.
    pub fn dimensions(&self, name: &str) -> Result<&[String]> {
        self.variables
            .get(name)
            .map(|v| v.dimensions.as_slice())
            .ok_or_else(|| Error::Config(format!("variable '{name}' not present in model output")))
    }

    /// Extract a variable at the singleton lat/lon corner, flattened to
    /// `(time)` or `(time, depth)` row-major order.
    ///
    /// The last two dimensions are stripped by taking index 0 of each, so
    /// the result has `time_len * depth_len` (or `time_len`) values.
    pub fn slice(&self, name: &str) -> Result<Vec<f64>> {
        let var = self
            .variables
            .get(name)
            .ok_or_else(|| Error::Config(format!("variable '{name}' not present in model output")))?;
        if var.shape.len() < 3 {
            return Err(Error::Config(format!(
                "variable '{name}' has {} dimensions, expected at least (time, lat, lon)",
                var.shape.len()
            )));
        }
        let trailing: usize = var.shape[var.shape.len() - 2..].iter().product();
        let kept: usize = var.shape[..var.shape.len() - 2].iter().product();
        let mut out = Vec::with_capacity(kept);
        for i in 0..kept {
            out.push(var.data[i * trailing]);
        }
        Ok(out)
    }

    /// Depth extent of a `(time, z, lat, lon)` variable.
    pub fn depth_len(&self, name: &str) -> Result<usize> {
        let var = self
            .variables
            .get(name)
            .ok_or_else(|| Error::Config(format!("variable '{name}' not present in model output")))?;
        if var.shape.len() != 4 {
            return Err(Error::Config(format!(
                "variable '{name}' has {} dimensions, expected (time, z, lat, lon)",
                var.shape.len()
            )));
        }
        Ok(var.shape[1])
    }

    /// The numeric time coordinate.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Units of the time coordinate.
    pub fn time_units(&self) -> TimeUnits {
        self.time_units
    }
}

/// The external simulation, as seen by the evaluator.
///
/// One implementation per working directory; the evaluator calls
/// [`ModelRunner::run`] after all parameter bindings have been stored,
/// then pulls the gridded outputs it needs. A non-zero exit code is a
/// per-candidate rejection, not an error.
pub trait ModelRunner: Send {
    /// Launch the simulation, blocking until it exits. Returns the
    /// process exit code.
    fn run(&mut self) -> Result<i32>;

    /// Open a gridded output file produced by the last run. `path` is
    /// relative to the run's working directory.
    fn open_output(&self, path: &Path) -> Result<GriddedDataset>;
}
