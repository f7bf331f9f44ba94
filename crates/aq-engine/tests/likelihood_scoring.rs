//! End-to-end scoring scenarios: interpolation, scale factors, noise
//! estimation and the rejection sentinel.

use approx::assert_relative_eq;
use aq_core::traits::ParameterBinding;
use aq_core::{Fitness, Parameter, Result};
use aq_engine::likelihood::RunOutputs;
use aq_engine::{
    Evaluator, FitOptions, GriddedDataset, ModelRunner, ObservationKind, ObservationSet, TimeUnits,
};
use std::fs;
use std::path::{Path, PathBuf};

fn day_units() -> TimeUnits {
    TimeUnits::parse("days since 2000-01-01 00:00:00").unwrap()
}

/// A depth-independent dataset over day offsets 0, 1, 2, ...
fn timeseries_dataset(values: &[f64]) -> GriddedDataset {
    let time: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    GriddedDataset::new(time, day_units())
        .with_variable("sst", &["time", "lat", "lon"], &[values.len(), 1, 1], values.to_vec())
        .unwrap()
}

fn load_observations(
    dir: &tempfile::TempDir,
    kind: ObservationKind,
    lines: &[&str],
    options: FitOptions,
) -> ObservationSet {
    let path = dir.path().join("obs.dat");
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    ObservationSet::load(&path, kind, options, None, false).unwrap()
}

fn outputs_for(dataset: GriddedDataset) -> RunOutputs {
    let mut outputs = RunOutputs::new();
    outputs.insert(PathBuf::from("result.nc"), dataset);
    outputs
}

fn sd_one(expression: &str) -> FitOptions {
    let mut options = FitOptions::new(expression, "result.nc");
    options.sd = Some(1.0);
    options
}

fn evaluator(observations: Vec<ObservationSet>) -> Evaluator {
    Evaluator::new(vec![Parameter::new("k", 0.0, 1.0)], observations).unwrap()
}

// ── Stub collaborators ─────────────────────────────────────────

struct StubRunner {
    exit_code: i32,
    outputs: RunOutputs,
    runs: usize,
}

impl StubRunner {
    fn new(exit_code: i32, outputs: RunOutputs) -> Self {
        Self { exit_code, outputs, runs: 0 }
    }
}

impl ModelRunner for StubRunner {
    fn run(&mut self) -> Result<i32> {
        self.runs += 1;
        Ok(self.exit_code)
    }

    fn open_output(&self, path: &Path) -> Result<GriddedDataset> {
        self.outputs
            .get(path)
            .cloned()
            .ok_or_else(|| aq_core::Error::Config(format!("no output at {}", path.display())))
    }
}

/// Accepts any staged value; the real namelist/YAML stores live outside
/// the engine.
struct StubBinding;

impl ParameterBinding for StubBinding {
    fn set_value(&mut self, _value: f64) -> Result<()> {
        Ok(())
    }

    fn store(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── Scoring ────────────────────────────────────────────────────

#[test]
fn perfect_match_scores_zero() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &[
            "2000-01-01 00:00:00 1.0",
            "2000-01-02 00:00:00 2.0",
            "2000-01-03 00:00:00 3.0",
        ],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[1.0, 2.0, 3.0]))).unwrap();
    match fitness {
        Fitness::LogLikelihood(ll) => assert_relative_eq!(ll, 0.0),
        Fitness::Rejected => panic!("perfect match must not be rejected"),
    }
}

#[test]
fn exact_timestamp_selects_the_exact_sample() {
    let dir = tempfile::tempdir().unwrap();
    // Model is nonlinear around day 1: any blending of neighbors would
    // miss the raw sample value of 20.
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-02 00:00:00 20.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[10.0, 20.0, 40.0]))).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn midpoint_interpolates_linearly() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 12:00:00 15.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[10.0, 20.0]))).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn expression_arithmetic_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 7.0"],
        sd_one("sst + 2 * wind"),
    );
    let dataset = GriddedDataset::new(vec![0.0, 1.0], day_units())
        .with_variable("sst", &["time", "lat", "lon"], &[2, 1, 1], vec![3.0, 3.0])
        .unwrap()
        .with_variable("wind", &["time", "lat", "lon"], &[2, 1, 1], vec![2.0, 2.0])
        .unwrap();
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(dataset)).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn estimated_sd_matches_the_closed_form() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = FitOptions::new("sst", "result.nc");
    options.sd = None;
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &[
            "2000-01-01 00:00:00 0.0",
            "2000-01-02 00:00:00 0.0",
            "2000-01-03 00:00:00 0.0",
        ],
        options,
    );
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[1.0, 1.0, 1.0]))).unwrap();
    // ssq = 3, n = 3, sd = sqrt(3/2); ll = -3 ln(sd) - 3 / (2 sd^2).
    let sd = (3.0f64 / 2.0).sqrt();
    let expected = -3.0 * sd.ln() - 3.0 / (2.0 * sd * sd);
    assert_relative_eq!(fitness.ln_likelihood(), expected, max_relative = 1e-12);
}

#[test]
fn optimal_scale_factor_is_least_squares() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = sd_one("sst");
    options.relative_fit = true;
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0", "2000-01-02 00:00:00 2.0"],
        options,
    );
    // Model [2, 4]: optimal scale = (1*2 + 2*4) / (4 + 16) = 0.5, after
    // which the residuals vanish.
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[2.0, 4.0]))).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn optimal_scale_factor_respects_the_clamp() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = sd_one("sst");
    options.relative_fit = true;
    options.min_scale_factor = Some(0.8);
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0", "2000-01-02 00:00:00 2.0"],
        options,
    );
    // Unclamped optimum is 0.5; with the clamp the model becomes
    // [1.6, 3.2] and ssq = 0.36 + 1.44 = 1.8.
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[2.0, 4.0]))).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), -0.9, max_relative = 1e-12);
}

#[test]
fn all_zero_model_with_relative_fit_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = sd_one("sst");
    options.relative_fit = true;
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0", "2000-01-02 00:00:00 2.0"],
        options,
    );
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[0.0, 0.0]))).unwrap();
    assert!(fitness.is_rejected());
}

#[test]
fn log_scale_clamps_to_the_floor() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = sd_one("chl");
    options.log_floor = Some(0.1);
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 0.1", "2000-01-02 00:00:00 10.0"],
        options,
    );
    // Model value 0.01 clamps up to the 0.1 floor, matching the first
    // observation exactly in log space.
    let dataset = GriddedDataset::new(vec![0.0, 1.0], day_units())
        .with_variable("chl", &["time", "lat", "lon"], &[2, 1, 1], vec![0.01, 10.0])
        .unwrap();
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(dataset)).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn fixed_scale_factor_is_additive_in_log_space() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = sd_one("chl");
    options.log_floor = Some(0.1);
    options.fixed_scale_factor = Some(10.0);
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 10.0", "2000-01-02 00:00:00 10.0"],
        options,
    );
    let dataset = GriddedDataset::new(vec![0.0, 1.0], day_units())
        .with_variable("chl", &["time", "lat", "lon"], &[2, 1, 1], vec![1.0, 1.0])
        .unwrap();
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(dataset)).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn non_finite_model_value_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 12:00:00 1.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(timeseries_dataset(&[f64::NAN, 1.0]))).unwrap();
    assert!(fitness.is_rejected());
}

#[test]
fn profile_observations_interpolate_in_depth() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Profile,
        &["2000-01-01 00:00:00 -15.0 2.0", "2000-01-01 00:00:00 -10.0 2.5"],
        sd_one("temp"),
    );
    // Three 10 m cells: centers sit at -25, -15 and -5 m. The first
    // record hits the middle center exactly; the second sits halfway
    // between the upper two centers.
    let dataset = GriddedDataset::new(vec![0.0, 1.0], day_units())
        .with_variable(
            "temp",
            &["time", "z", "lat", "lon"],
            &[2, 3, 1, 1],
            vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0],
        )
        .unwrap()
        .with_variable(
            "h",
            &["time", "z", "lat", "lon"],
            &[2, 3, 1, 1],
            vec![10.0; 6],
        )
        .unwrap();
    let mut session = evaluator(vec![obs]);
    let fitness = session.score(&outputs_for(dataset)).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}

#[test]
fn traces_carry_the_interpolated_values() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 12:00:00 0.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let (_, traces) =
        session.score_with_traces(&outputs_for(timeseries_dataset(&[10.0, 20.0]))).unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].expression, "sst");
    assert_relative_eq!(traces[0].model_values[0], 15.0);
}

#[test]
fn changed_time_axis_rejects_the_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-02 00:00:00 2.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let first = session.score(&outputs_for(timeseries_dataset(&[1.0, 2.0, 3.0]))).unwrap();
    assert!(!first.is_rejected());
    let second =
        session.score(&outputs_for(timeseries_dataset(&[1.0, 2.0, 3.0, 4.0]))).unwrap();
    assert!(second.is_rejected());
}

// ── Full evaluation flow ───────────────────────────────────────

#[test]
fn out_of_bounds_parameter_rejects_before_the_model_runs() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0"],
        sd_one("sst"),
    );
    let mut session = Evaluator::new(
        vec![Parameter::new("k", 0.0, 1.0), Parameter::new("q", 0.0, 1.0)],
        vec![obs],
    )
    .unwrap();
    let mut runner = StubRunner::new(0, outputs_for(timeseries_dataset(&[1.0, 1.0])));
    let mut bindings: Vec<Box<dyn ParameterBinding>> =
        vec![Box::new(StubBinding), Box::new(StubBinding)];
    let fitness = session.evaluate(&[0.5, 1.5], &mut bindings, &mut runner).unwrap();
    assert!(fitness.is_rejected());
    assert_eq!(runner.runs, 0);
}

#[test]
fn range_check_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0"],
        sd_one("sst"),
    );
    let mut session = Evaluator::new(vec![Parameter::new("k", 0.0, 1.0)], vec![obs])
        .unwrap()
        .with_range_check(false);
    let mut runner = StubRunner::new(0, outputs_for(timeseries_dataset(&[1.0, 1.0])));
    let mut bindings: Vec<Box<dyn ParameterBinding>> = vec![Box::new(StubBinding)];
    let fitness = session.evaluate(&[1.5], &mut bindings, &mut runner).unwrap();
    assert!(!fitness.is_rejected());
}

#[test]
fn abnormal_exit_code_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let mut runner = StubRunner::new(1, outputs_for(timeseries_dataset(&[1.0, 1.0])));
    let mut bindings: Vec<Box<dyn ParameterBinding>> = vec![Box::new(StubBinding)];
    let fitness = session.evaluate(&[0.5], &mut bindings, &mut runner).unwrap();
    assert!(fitness.is_rejected());
    assert_eq!(runner.runs, 1);
}

#[test]
fn missing_output_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let mut runner = StubRunner::new(0, RunOutputs::new());
    let mut bindings: Vec<Box<dyn ParameterBinding>> = vec![Box::new(StubBinding)];
    let fitness = session.evaluate(&[0.5], &mut bindings, &mut runner).unwrap();
    assert!(fitness.is_rejected());
}

#[test]
fn successful_evaluation_scores_the_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let obs = load_observations(
        &dir,
        ObservationKind::Timeseries,
        &["2000-01-01 00:00:00 1.0", "2000-01-02 00:00:00 1.0"],
        sd_one("sst"),
    );
    let mut session = evaluator(vec![obs]);
    let mut runner = StubRunner::new(0, outputs_for(timeseries_dataset(&[1.0, 1.0])));
    let mut bindings: Vec<Box<dyn ParameterBinding>> = vec![Box::new(StubBinding)];
    let fitness = session.evaluate(&[0.5], &mut bindings, &mut runner).unwrap();
    assert_relative_eq!(fitness.ln_likelihood(), 0.0);
}
