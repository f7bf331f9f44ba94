//! `sample` subcommand: turn an accumulated results table into a
//! density-corrected posterior ensemble.

use anyhow::{Context, Result};
use aq_core::EnsembleTable;
use aq_engine::{resample, CalibrationConfig, ResampleOptions};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct SampleReport {
    parameter_names: Vec<String>,
    table_rows: usize,
    ensemble_size: usize,
    neighbor_count: usize,
    members: Vec<Vec<f64>>,
}

pub fn run(
    config: &Path,
    input: &Path,
    size: usize,
    neighbors: usize,
    seed: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let config = CalibrationConfig::from_json_file(config)
        .with_context(|| format!("reading calibration declaration {}", config.display()))?;
    let table = EnsembleTable::from_json_file(input)
        .with_context(|| format!("reading results table {}", input.display()))?;

    let options = ResampleOptions { neighbor_count: neighbors, seed };
    let members = resample(&table, &config.parameters, size, &options)?;

    let report = SampleReport {
        parameter_names: config.parameters.iter().map(|p| p.name.clone()).collect(),
        table_rows: table.len(),
        ensemble_size: size,
        neighbor_count: neighbors,
        members,
    };
    let text = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing ensemble to {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}
