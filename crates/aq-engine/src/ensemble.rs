//! Density-weighted ensemble resampling.
//!
//! Likelihood-based importance resampling over the accumulated score
//! table, corrected for non-uniform exploration of parameter space: a
//! candidate surrounded by many near-duplicates would otherwise be
//! over-represented simply because the search visited that region often.
//! The local sampling density around a row is approximated through the
//! volume of the hypersphere reaching its M-th nearest neighbor in
//! bounds-normalized parameter space: each row's relative likelihood is
//! divided by that density, i.e. multiplied by `radius^d`, so sparsely
//! explored rows gain weight and dense clusters lose it.
//!
//! Runs once, after all scoring is complete; no I/O, no shared state.

use aq_core::{EnsembleTable, Error, Parameter, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

/// Knobs for [`resample`].
#[derive(Debug, Clone, Copy)]
pub struct ResampleOptions {
    /// Which nearest neighbor defines the density radius.
    pub neighbor_count: usize,
    /// Seed for the categorical draw; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self { neighbor_count: 10, seed: None }
    }
}

/// Draw `ensemble_size` posterior members from the score table, with
/// replacement, according to density-corrected relative likelihood.
///
/// Each parameter dimension is normalized to `[0, 1]` using its declared
/// bounds (through `log10` for log-scaled parameters) before distances
/// are measured, so the density proxy is scale-free. Duplicate members
/// are allowed; the draw is reproducible when a seed is given.
pub fn resample(
    table: &EnsembleTable,
    parameters: &[Parameter],
    ensemble_size: usize,
    options: &ResampleOptions,
) -> Result<Vec<Vec<f64>>> {
    if table.is_empty() {
        return Err(Error::Config("cannot resample from an empty results table".into()));
    }
    let dim = parameters.len();
    for (i, row) in table.rows.iter().enumerate() {
        if row.parameters.len() != dim {
            return Err(Error::Config(format!(
                "row {i} has {} parameter values, expected {dim}",
                row.parameters.len()
            )));
        }
    }
    for p in parameters {
        if p.log_scale && p.minimum <= 0.0 {
            return Err(Error::Config(format!(
                "parameter '{}' is log-scaled but its minimum ({}) is not positive",
                p.name, p.minimum
            )));
        }
    }

    let normalized = normalize(table, parameters);
    let volumes = neighborhood_volumes(&normalized, dim, options.neighbor_count);

    let max_ll = table
        .rows
        .iter()
        .map(|r| r.log_likelihood)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_ll.is_finite() {
        return Err(Error::Config("results table holds no finite log-likelihood".into()));
    }

    // Importance correction: relative likelihood divided by the local
    // sampling density, which is the inverse of the neighborhood volume.
    let probabilities: Vec<f64> = table
        .rows
        .iter()
        .zip(&volumes)
        .map(|(row, &volume)| (row.log_likelihood - max_ll).exp() * volume)
        .collect();

    let distribution = WeightedIndex::new(&probabilities)
        .map_err(|err| Error::Config(format!("degenerate selection probabilities: {err}")))?;
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    debug!(rows = table.len(), ensemble_size, "drawing posterior ensemble");
    let members = (0..ensemble_size)
        .map(|_| table.rows[distribution.sample(&mut rng)].parameters.clone())
        .collect();
    Ok(members)
}

/// Map every row into the unit hypercube spanned by the parameter bounds.
fn normalize(table: &EnsembleTable, parameters: &[Parameter]) -> Vec<Vec<f64>> {
    table
        .rows
        .iter()
        .map(|row| {
            row.parameters
                .iter()
                .zip(parameters)
                .map(|(&value, p)| {
                    if p.log_scale {
                        let lo = p.minimum.log10();
                        let hi = p.maximum.log10();
                        (value.log10() - lo) / (hi - lo)
                    } else {
                        (value - p.minimum) / (p.maximum - p.minimum)
                    }
                })
                .collect()
        })
        .collect()
}

/// Per-row neighborhood volume: the radius to the `neighbor_count`-th
/// closest other row, raised to the parameter dimensionality.
///
/// A larger radius means a sparser neighborhood and therefore a larger
/// weight, counteracting oversampling of dense regions. A zero volume
/// (duplicate parameter vectors closer than the neighbor count) is
/// lifted to the smallest representable positive value so the weight
/// stays usable in a categorical draw.
fn neighborhood_volumes(normalized: &[Vec<f64>], dim: usize, neighbor_count: usize) -> Vec<f64> {
    let n = normalized.len();
    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut distances: Vec<f64> = normalized
                .iter()
                .map(|other| {
                    normalized[i]
                        .iter()
                        .zip(other)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect();
            distances.sort_by(f64::total_cmp);
            // Row i itself sits at distance zero, so index `neighbor_count`
            // is the M-th closest *other* row.
            let radius = distances[neighbor_count.min(n - 1)];
            let volume = radius.powi(dim as i32);
            if volume > 0.0 { volume } else { f64::MIN_POSITIVE }
        })
        .collect()
}
