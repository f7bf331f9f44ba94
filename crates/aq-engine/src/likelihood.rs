//! Likelihood evaluator: one Gaussian log-likelihood per candidate
//! parameter vector.
//!
//! An [`Evaluator`] is a job session. It owns the loaded observation
//! sets, the parameter declarations and the lazily-built interpolation
//! indexes, and drives the external collaborators: parameter bindings
//! are staged and stored, the model runner is launched, its gridded
//! outputs are opened and scored. All per-candidate failures — an
//! out-of-range parameter, a failed model run, a non-finite interpolated
//! value, a degenerate scale factor — collapse into
//! [`Fitness::Rejected`] so a long-running search is never aborted by
//! one bad candidate. Only configuration-time problems return `Err`.

use crate::dataset::{GriddedDataset, ModelRunner};
use crate::interp::{DepthConvention, InterpolationIndex};
use crate::observations::{FitOptions, ObservationSet};
use aq_core::traits::ParameterBinding;
use aq_core::{Error, Fitness, Parameter, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Name of the cell-thickness variable used to reconstruct the model
/// depth coordinate for profile fits.
const THICKNESS_VARIABLE: &str = "h";

/// Scale-factor policy for one observation set, resolved once from its
/// fit options.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ScaleFactor {
    /// Compare model and observations as they are.
    Off,
    /// Apply a configured constant factor.
    Fixed(f64),
    /// Fit the closed-form least-squares optimum, clamped into bounds.
    Optimal { min: Option<f64>, max: Option<f64> },
}

impl ScaleFactor {
    fn from_options(options: &FitOptions) -> Self {
        if options.relative_fit {
            ScaleFactor::Optimal { min: options.min_scale_factor, max: options.max_scale_factor }
        } else if let Some(factor) = options.fixed_scale_factor {
            ScaleFactor::Fixed(factor)
        } else {
            ScaleFactor::Off
        }
    }
}

/// Interpolated model values for one observation set, aligned with the
/// records that survived the time-span filter. Captured on request for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct ObservationTrace {
    /// The set's value expression.
    pub expression: String,
    /// Interpolated (unscaled) model values, one per surviving record.
    pub model_values: Vec<f64>,
}

/// Gridded outputs of one model run, keyed by output path.
pub type RunOutputs = BTreeMap<PathBuf, GriddedDataset>;

/// A job session: parameter declarations, observation sets and the
/// per-set interpolation indexes, built on first use and reused across
/// evaluations.
pub struct Evaluator {
    parameters: Vec<Parameter>,
    observations: Vec<ObservationSet>,
    indexes: Vec<Option<InterpolationIndex>>,
    check_parameter_ranges: bool,
}

impl Evaluator {
    /// Create a session from validated declarations.
    ///
    /// Fails if a parameter range is inverted, a log-scaled parameter has
    /// a non-positive bound, or no observation records survived loading.
    pub fn new(parameters: Vec<Parameter>, observations: Vec<ObservationSet>) -> Result<Self> {
        for p in &parameters {
            if p.maximum <= p.minimum {
                return Err(Error::Config(format!(
                    "parameter '{}': maximum ({}) must exceed minimum ({})",
                    p.name, p.maximum, p.minimum
                )));
            }
            if p.log_scale && p.minimum <= 0.0 {
                return Err(Error::Config(format!(
                    "parameter '{}' is log-scaled but its minimum ({}) is not positive",
                    p.name, p.minimum
                )));
            }
        }
        if observations.iter().map(ObservationSet::len).sum::<usize>() == 0 {
            return Err(Error::Config(
                "no valid observations within the declared depth and time range".into(),
            ));
        }
        let indexes = vec![None; observations.len()];
        Ok(Self { parameters, observations, indexes, check_parameter_ranges: true })
    }

    /// Enable or disable rejection of out-of-range candidates (on by
    /// default).
    pub fn with_range_check(mut self, check: bool) -> Self {
        self.check_parameter_ranges = check;
        self
    }

    /// The declared parameters, in binding order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The loaded observation sets.
    pub fn observations(&self) -> &[ObservationSet] {
        &self.observations
    }

    /// Score one candidate end to end: range check, parameter binding,
    /// model run, output scoring.
    pub fn evaluate<R: ModelRunner>(
        &mut self,
        values: &[f64],
        bindings: &mut [Box<dyn ParameterBinding>],
        runner: &mut R,
    ) -> Result<Fitness> {
        if values.len() != self.parameters.len() {
            return Err(Error::Config(format!(
                "candidate has {} values for {} declared parameters",
                values.len(),
                self.parameters.len()
            )));
        }
        if bindings.len() != self.parameters.len() {
            return Err(Error::Config(format!(
                "{} parameter bindings for {} declared parameters",
                bindings.len(),
                self.parameters.len()
            )));
        }
        debug!(?values, "evaluating candidate");

        if self.check_parameter_ranges {
            for (parameter, &value) in self.parameters.iter().zip(values) {
                if !parameter.contains(value) {
                    debug!(
                        parameter = %parameter.name,
                        value,
                        minimum = parameter.minimum,
                        maximum = parameter.maximum,
                        "parameter out of range, rejecting candidate"
                    );
                    return Ok(Fitness::Rejected);
                }
            }
        }

        for (binding, &value) in bindings.iter_mut().zip(values) {
            binding.set_value(value)?;
        }
        for binding in bindings.iter_mut() {
            binding.store()?;
        }

        let code = runner.run()?;
        if code != 0 {
            warn!(code, "model run exited abnormally, rejecting candidate");
            return Ok(Fitness::Rejected);
        }

        let mut outputs = RunOutputs::new();
        for observation in &self.observations {
            let path = &observation.options().output_path;
            if outputs.contains_key(path) {
                continue;
            }
            match runner.open_output(path) {
                Ok(dataset) => {
                    outputs.insert(path.clone(), dataset);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "model output unreadable, rejecting candidate");
                    return Ok(Fitness::Rejected);
                }
            }
        }
        self.score(&outputs)
    }

    /// Score a candidate from already-opened model outputs.
    pub fn score(&mut self, outputs: &RunOutputs) -> Result<Fitness> {
        self.score_impl(outputs, None)
    }

    /// Like [`Evaluator::score`], additionally capturing per-set traces
    /// of the interpolated model values.
    pub fn score_with_traces(
        &mut self,
        outputs: &RunOutputs,
    ) -> Result<(Fitness, Vec<ObservationTrace>)> {
        let mut traces = Vec::new();
        let fitness = self.score_impl(outputs, Some(&mut traces))?;
        Ok((fitness, traces))
    }

    fn score_impl(
        &mut self,
        outputs: &RunOutputs,
        mut traces: Option<&mut Vec<ObservationTrace>>,
    ) -> Result<Fitness> {
        let mut total = 0.0;
        for i in 0..self.observations.len() {
            let options = self.observations[i].options().clone();
            let expression = options.expression.as_str();
            let Some(dataset) = outputs.get(&options.output_path) else {
                warn!(path = %options.output_path.display(), "model output missing, rejecting candidate");
                return Ok(Fitness::Rejected);
            };

            if self.indexes[i].is_none() {
                debug!(expression, "building interpolation index");
                self.indexes[i] = Some(InterpolationIndex::build(&self.observations[i], dataset)?);
            }
            let index = self.indexes[i].as_ref().unwrap();
            if index.time_axis_len() != dataset.time().len() {
                warn!(
                    expression,
                    expected = index.time_axis_len(),
                    found = dataset.time().len(),
                    "model time axis changed between runs, rejecting candidate"
                );
                return Ok(Fitness::Rejected);
            }
            if index.is_empty() {
                debug!(expression, "no records within the model time span");
                continue;
            }

            let model_values = interpolate(index, dataset)?;
            if model_values.iter().any(|v| !v.is_finite()) {
                warn!(expression, "non-finite interpolated model values, rejecting candidate");
                return Ok(Fitness::Rejected);
            }
            if let Some(sink) = traces.as_deref_mut() {
                sink.push(ObservationTrace {
                    expression: options.expression.clone(),
                    model_values: model_values.clone(),
                });
            }

            let mut model = model_values;
            let mut observed = index.values().to_vec();
            if let Some(floor) = options.log_floor {
                for v in &mut model {
                    *v = v.max(floor).log10();
                }
                for v in &mut observed {
                    *v = v.max(floor).log10();
                }
            }

            let scale = match ScaleFactor::from_options(&options) {
                ScaleFactor::Off => None,
                ScaleFactor::Fixed(factor) => Some(factor),
                ScaleFactor::Optimal { min, max } => {
                    let fitted = if options.log_floor.is_some() {
                        // Optimal multiplicative scale from the optimal offset in log space.
                        10f64.powf(mean(&observed) - mean(&model))
                    } else {
                        if model.iter().all(|&v| v == 0.0) {
                            warn!(
                                expression,
                                "all model values are zero, optimal scale factor undefined; rejecting candidate"
                            );
                            return Ok(Fitness::Rejected);
                        }
                        let cross: f64 = observed.iter().zip(&model).map(|(o, m)| o * m).sum();
                        let norm: f64 = model.iter().map(|m| m * m).sum();
                        cross / norm
                    };
                    if !fitted.is_finite() {
                        warn!(expression, fitted, "optimal scale factor is not finite, rejecting candidate");
                        return Ok(Fitness::Rejected);
                    }
                    let mut scale = fitted;
                    if let Some(lo) = min {
                        if scale < lo {
                            debug!(expression, scale, lo, "clamping optimal scale factor to minimum");
                            scale = lo;
                        }
                    }
                    if let Some(hi) = max {
                        if scale > hi {
                            debug!(expression, scale, hi, "clamping optimal scale factor to maximum");
                            scale = hi;
                        }
                    }
                    debug!(expression, scale, "optimal model-to-observation scale factor");
                    Some(scale)
                }
            };
            if let Some(scale) = scale {
                if options.log_floor.is_some() {
                    let shift = scale.log10();
                    for v in &mut model {
                        *v += shift;
                    }
                } else {
                    for v in &mut model {
                        *v *= scale;
                    }
                }
            }

            let n = observed.len();
            let ssq: f64 = model.iter().zip(&observed).map(|(m, o)| (m - o) * (m - o)).sum();
            let sd = match options.sd {
                Some(sd) => sd,
                None => {
                    let sd = (ssq / (n as f64 - 1.0)).sqrt();
                    debug!(expression, sd, "using maximum-likelihood s.d.");
                    sd
                }
            };

            let contribution = -(n as f64) * sd.ln() - ssq / (2.0 * sd * sd);
            if !contribution.is_finite() {
                warn!(expression, sd, ssq, "degenerate likelihood contribution, rejecting candidate");
                return Ok(Fitness::Rejected);
            }
            total += contribution;
        }
        debug!(ln_likelihood = total, "candidate scored");
        Ok(Fitness::LogLikelihood(total))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Interpolate the set's value expression onto its observation records.
fn interpolate(index: &InterpolationIndex, dataset: &GriddedDataset) -> Result<Vec<f64>> {
    let columns: Vec<Vec<f64>> = index
        .expression()
        .variables()
        .iter()
        .map(|name| dataset.slice(name))
        .collect::<Result<_>>()?;
    let refs: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();
    let field = index.expression().eval_elementwise(&refs);

    match index.depth_convention() {
        None => {
            let out = index
                .brackets()
                .iter()
                .map(|b| b.weight * field[b.left] + (1.0 - b.weight) * field[b.left + 1])
                .collect();
            Ok(out)
        }
        Some(convention) => interpolate_profile(index, dataset, &field, convention),
    }
}

/// Time- then depth-interpolate a depth-resolved field.
///
/// The model depth coordinate is reconstructed from the cell-thickness
/// variable as a cumulative sum anchored at the surface, upward-negative
/// to match the observations. The bracketing depth index is clamped to
/// the interior range, so values outside the model grid are linearly
/// extrapolated.
fn interpolate_profile(
    index: &InterpolationIndex,
    dataset: &GriddedDataset,
    field: &[f64],
    convention: DepthConvention,
) -> Result<Vec<f64>> {
    if !dataset.contains(THICKNESS_VARIABLE) {
        return Err(Error::Config(format!(
            "profile fit requires the cell thickness variable '{THICKNESS_VARIABLE}'"
        )));
    }
    let thickness = dataset.slice(THICKNESS_VARIABLE)?;
    let nd = dataset.depth_len(THICKNESS_VARIABLE)?;
    if nd < 2 {
        return Err(Error::Config(format!(
            "depth interpolation needs at least two cells, '{THICKNESS_VARIABLE}' has {nd}"
        )));
    }
    let nt = dataset.time().len();

    // Depth coordinate per time step: cumulative thickness re-anchored so
    // the top interface sits at zero, cell centers half a cell below it.
    let mut z_model = vec![0.0f64; nt * nd];
    for t in 0..nt {
        let row = &thickness[t * nd..(t + 1) * nd];
        let mut cumsum = 0.0;
        let z_row = &mut z_model[t * nd..(t + 1) * nd];
        for (k, &h) in row.iter().enumerate() {
            cumsum += h;
            z_row[k] = cumsum;
        }
        let column = cumsum;
        for (k, &h) in row.iter().enumerate() {
            z_row[k] -= column;
            if convention == DepthConvention::Center {
                z_row[k] -= h / 2.0;
            }
        }
    }

    let depths = index.depths().expect("profile index always carries depths");
    let mut out = Vec::with_capacity(index.len());
    let mut profile_time = f64::NAN;
    let mut z_profile = vec![0.0f64; nd];
    let mut v_profile = vec![0.0f64; nd];
    for (record, (&numtime, bracket)) in
        index.numeric_times().iter().zip(index.brackets()).enumerate()
    {
        if numtime != profile_time {
            let (l, w) = (bracket.left, bracket.weight);
            for k in 0..nd {
                z_profile[k] = w * z_model[l * nd + k] + (1.0 - w) * z_model[(l + 1) * nd + k];
                v_profile[k] = w * field[l * nd + k] + (1.0 - w) * field[(l + 1) * nd + k];
            }
            profile_time = numtime;
        }
        let z = depths[record];
        let r = z_profile.partition_point(|&zv| zv < z).clamp(1, nd - 1);
        let zw = (z - z_profile[r - 1]) / (z_profile[r] - z_profile[r - 1]);
        out.push((1.0 - zw) * v_profile[r - 1] + zw * v_profile[r]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FitOptions {
        FitOptions::new("temp", "out.nc")
    }

    #[test]
    fn fixed_scale_only_applies_without_relative_fit() {
        let mut opts = options();
        opts.fixed_scale_factor = Some(2.0);
        assert_eq!(ScaleFactor::from_options(&opts), ScaleFactor::Fixed(2.0));

        opts.relative_fit = true;
        opts.min_scale_factor = Some(0.5);
        assert_eq!(
            ScaleFactor::from_options(&opts),
            ScaleFactor::Optimal { min: Some(0.5), max: None }
        );
    }

    #[test]
    fn no_scale_by_default() {
        assert_eq!(ScaleFactor::from_options(&options()), ScaleFactor::Off);
    }
}
