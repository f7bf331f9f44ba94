//! `inspect` subcommand: parse an observation file and summarize it.

use anyhow::{Context, Result};
use aq_engine::{FitOptions, ObservationKind, ObservationSet};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct InspectReport {
    source: String,
    content_hash: String,
    format: ObservationKind,
    records: usize,
    /// First and last record timestamp.
    time_range: Option<[String; 2]>,
    /// Shallowest and deepest record, downward-positive meters.
    depth_range: Option<[f64; 2]>,
    /// Smallest and largest observed value.
    value_range: Option<[f64; 2]>,
}

pub fn run(
    source: &Path,
    timeseries: bool,
    min_depth: Option<f64>,
    max_depth: Option<f64>,
    no_cache: bool,
) -> Result<()> {
    let kind = if timeseries { ObservationKind::Timeseries } else { ObservationKind::Profile };
    let mut options = FitOptions::new("", "");
    if let Some(d) = min_depth {
        options.min_depth = d;
    }
    if let Some(d) = max_depth {
        options.max_depth = d;
    }

    let set = ObservationSet::load(source, kind, options, None, !no_cache)
        .with_context(|| format!("loading observations from {}", source.display()))?;

    let time_range = match (set.times().first(), set.times().last()) {
        (Some(first), Some(last)) => Some([first.to_string(), last.to_string()]),
        _ => None,
    };
    let depth_range = set.depths().filter(|d| !d.is_empty()).map(|depths| {
        let min = depths.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = depths.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        // Depths are stored upward-negative; report downward-positive.
        [-max, -min]
    });
    let value_range = (!set.values().is_empty()).then(|| {
        let min = set.values().iter().cloned().fold(f64::INFINITY, f64::min);
        let max = set.values().iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        [min, max]
    });

    let report = InspectReport {
        source: source.display().to_string(),
        content_hash: set.content_hash().to_string(),
        format: kind,
        records: set.len(),
        time_range,
        depth_range,
        value_range,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
