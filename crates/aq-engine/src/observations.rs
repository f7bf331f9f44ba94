//! Observation store: parsing, validation and caching of observed
//! time/depth/value records.
//!
//! Observation files are plain text. Each record line begins with a
//! fixed-format `YYYY MM DD HH MM SS` timestamp (any single non-digit
//! separator within the date and clock parts) followed by
//! whitespace-separated numeric fields: depth and value for profile
//! files, value alone for timeseries files. `#`-prefixed lines are
//! comments.
//!
//! A hash-addressed cache side file (`<source>.cache`, JSON) skips
//! re-parsing when the source content is unchanged. Cache problems are
//! never fatal: unreadable or stale caches fall back to a re-parse, and
//! a failed cache write is logged and swallowed.

use aq_core::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Layout of an observation file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationKind {
    /// Time + depth + value records, fitted against a depth-resolved field.
    #[serde(rename = "profiles")]
    Profile,
    /// Time + value records, fitted against a depth-independent field.
    #[serde(rename = "timeseries")]
    Timeseries,
}

/// Fit options attached to one observation set.
///
/// `log_floor` doubles as the log-scale flag: `Some(floor)` fits on a
/// base-10 logarithmic scale with both sides clamped to `floor`.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Value expression over model variables (see [`crate::expr`]).
    pub expression: String,
    /// Model output file this set is scored against, relative to the
    /// run's working directory.
    pub output_path: PathBuf,
    /// Fit an optimal scale factor between model and observations.
    pub relative_fit: bool,
    /// Fixed scale factor, applied when `relative_fit` is off.
    pub fixed_scale_factor: Option<f64>,
    /// Lower clamp for the fitted scale factor.
    pub min_scale_factor: Option<f64>,
    /// Upper clamp for the fitted scale factor.
    pub max_scale_factor: Option<f64>,
    /// Log-scale fitting floor; `None` fits on the linear scale.
    pub log_floor: Option<f64>,
    /// Fixed standard deviation of the observation noise; estimated by
    /// maximum likelihood when absent.
    pub sd: Option<f64>,
    /// Discard records within this many years of the simulation start.
    pub spinup_years: Option<u32>,
    /// Minimum depth kept, as downward-positive distance from the surface.
    pub min_depth: f64,
    /// Maximum depth kept, as downward-positive distance from the surface.
    pub max_depth: f64,
}

impl FitOptions {
    /// Options with the given expression and output path; everything else
    /// at its default (absolute fit, estimated noise, unbounded depth).
    pub fn new(expression: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            expression: expression.into(),
            output_path: output_path.into(),
            relative_fit: false,
            fixed_scale_factor: None,
            min_scale_factor: None,
            max_scale_factor: None,
            log_floor: None,
            sd: None,
            spinup_years: None,
            min_depth: f64::NEG_INFINITY,
            max_depth: f64::INFINITY,
        }
    }
}

/// One observed quantity to fit against: immutable after load.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    kind: ObservationKind,
    source: PathBuf,
    content_hash: String,
    times: Vec<NaiveDateTime>,
    depths: Option<Vec<f64>>,
    values: Vec<f64>,
    options: FitOptions,
}

/// Cache side-file payload. The records are stored as parsed (depth
/// filter applied, spin-up trim not), keyed by the source content hash.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    hash: String,
    times: Vec<NaiveDateTime>,
    depths: Option<Vec<f64>>,
    values: Vec<f64>,
}

#[derive(Debug)]
struct Records {
    times: Vec<NaiveDateTime>,
    depths: Option<Vec<f64>>,
    values: Vec<f64>,
}

impl ObservationSet {
    /// Load an observation set from a flat file.
    ///
    /// `simulation_start` anchors spin-up trimming and is required when
    /// `options.spinup_years` is set. With `cache_allowed`, a side file
    /// whose stored hash matches the current content skips the parse.
    pub fn load(
        source: &Path,
        kind: ObservationKind,
        options: FitOptions,
        simulation_start: Option<NaiveDate>,
        cache_allowed: bool,
    ) -> Result<Self> {
        if options.max_depth <= options.min_depth {
            return Err(Error::Config(format!(
                "max_depth ({}) must be greater than min_depth ({}) for '{}'",
                options.max_depth,
                options.min_depth,
                source.display()
            )));
        }
        let spinup_cutoff = match options.spinup_years {
            None => None,
            Some(years) => {
                let start = simulation_start.ok_or_else(|| {
                    Error::Config(format!(
                        "spinup_years set for '{}' but no simulation start date declared",
                        source.display()
                    ))
                })?;
                Some(spinup_cutoff(start, years)?)
            }
        };

        let bytes = std::fs::read(source)?;
        let content_hash = hex_digest(&bytes);
        let cache_path = cache_path(source);

        let mut records = None;
        if cache_allowed {
            records = read_cache(&cache_path, &content_hash, source);
        }
        let records = match records {
            Some(r) => r,
            None => {
                debug!(source = %source.display(), "parsing observation file");
                let text = String::from_utf8_lossy(&bytes);
                let parsed = parse_records(&text, kind, &options)?;
                if cache_allowed {
                    write_cache(&cache_path, &content_hash, &parsed);
                }
                parsed
            }
        };

        let Records { mut times, mut depths, mut values } = records;
        if let Some(cutoff) = spinup_cutoff {
            let keep: Vec<bool> = times.iter().map(|t| *t >= cutoff).collect();
            times = filtered(times, &keep);
            values = filtered(values, &keep);
            depths = depths.map(|d| filtered(d, &keep));
        }

        Ok(Self {
            kind,
            source: source.to_path_buf(),
            content_hash,
            times,
            depths,
            values,
            options,
        })
    }

    /// Layout of the source file.
    pub fn kind(&self) -> ObservationKind {
        self.kind
    }

    /// Path the records were loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Hex SHA-256 of the source content at load time.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Record timestamps.
    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    /// Record depths (raw sign as parsed, negative below the surface);
    /// `None` for timeseries sets.
    pub fn depths(&self) -> Option<&[f64]> {
        self.depths.as_deref()
    }

    /// Record values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Fit options for this set.
    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Year-aligned spin-up cutoff: simulation start shifted by whole years.
fn spinup_cutoff(start: NaiveDate, years: u32) -> Result<NaiveDateTime> {
    use chrono::Datelike;
    NaiveDate::from_ymd_opt(start.year() + years as i32, start.month(), start.day())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            Error::Config(format!(
                "spin-up cutoff {years} years after {start} is not a valid calendar date"
            ))
        })
}

fn filtered<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items.into_iter().zip(keep).filter_map(|(x, &k)| k.then_some(x)).collect()
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn cache_path(source: &Path) -> PathBuf {
    let mut os = source.as_os_str().to_owned();
    os.push(".cache");
    PathBuf::from(os)
}

fn read_cache(cache: &Path, hash: &str, source: &Path) -> Option<Records> {
    let text = std::fs::read_to_string(cache).ok()?;
    let parsed: CacheFile = match serde_json::from_str(&text) {
        Ok(p) => p,
        Err(err) => {
            debug!(cache = %cache.display(), %err, "ignoring unreadable observation cache");
            return None;
        }
    };
    if parsed.hash != hash {
        debug!(source = %source.display(), "cached copy is out of date, file will be re-parsed");
        return None;
    }
    debug!(source = %source.display(), "loading cached copy");
    Some(Records { times: parsed.times, depths: parsed.depths, values: parsed.values })
}

fn write_cache(cache: &Path, hash: &str, records: &Records) {
    let payload = CacheFile {
        hash: hash.to_string(),
        times: records.times.clone(),
        depths: records.depths.clone(),
        values: records.values.clone(),
    };
    let result = serde_json::to_string(&payload)
        .map_err(Error::from)
        .and_then(|text| std::fs::write(cache, text).map_err(Error::from));
    if let Err(err) = result {
        warn!(cache = %cache.display(), %err, "unable to store cached copy of observation file");
    }
}

/// Parse a `YYYY MM DD HH MM SS` timestamp at the head of a line.
///
/// Any single non-digit byte may separate the date and clock components;
/// a space separates date from clock. Returns the timestamp and the
/// offset of the remainder.
fn parse_timestamp(line: &str) -> Option<(NaiveDateTime, usize)> {
    let b = line.as_bytes();
    if b.len() < 19 || !b[..19].is_ascii() {
        return None;
    }
    let digit_spans = [(0, 4), (5, 7), (8, 10), (11, 13), (14, 16), (17, 19)];
    for &(lo, hi) in &digit_spans {
        if !b[lo..hi].iter().all(u8::is_ascii_digit) {
            return None;
        }
    }
    for &sep in &[4usize, 7, 13, 16] {
        if b[sep].is_ascii_digit() {
            return None;
        }
    }
    if b[10] != b' ' {
        return None;
    }
    let field = |lo: usize, hi: usize| line[lo..hi].parse::<u32>().unwrap();
    let date = NaiveDate::from_ymd_opt(line[0..4].parse().unwrap(), field(5, 7), field(8, 10))?;
    let time = date.and_hms_opt(field(11, 13), field(14, 16), field(17, 19))?;
    Some((time, 19))
}

fn parse_numeric(text: &str, what: &str, line_no: usize) -> Result<f64> {
    let value: f64 = text.parse().map_err(|_| Error::Data {
        line: line_no,
        message: format!("{what} is not a valid number: {text}"),
    })?;
    if !value.is_finite() {
        return Err(Error::Data {
            line: line_no,
            message: format!("{what} is not finite: {text}"),
        });
    }
    Ok(value)
}

fn parse_records(text: &str, kind: ObservationKind, options: &FitOptions) -> Result<Records> {
    let mut times = Vec::new();
    let mut depths = Vec::new();
    let mut values = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.starts_with('#') {
            continue;
        }
        let (timestamp, rest) = parse_timestamp(line).ok_or_else(|| Error::Format {
            line: line_no,
            message: format!(
                "line does not start with a 'YYYY MM DD HH MM SS' timestamp: {line}"
            ),
        })?;
        let fields: Vec<&str> = line[rest..].split_whitespace().collect();
        match kind {
            ObservationKind::Profile => {
                if fields.len() != 2 {
                    return Err(Error::Format {
                        line: line_no,
                        message: format!(
                            "expected two values (depth, observation) after the timestamp, found {}",
                            fields.len()
                        ),
                    });
                }
                let depth = parse_numeric(fields[0], "depth", line_no)?;
                let value = parse_numeric(fields[1], "observed value", line_no)?;
                // Downward-positive filter bound against upward-negative depth.
                if -depth < options.min_depth || -depth > options.max_depth {
                    continue;
                }
                times.push(timestamp);
                depths.push(depth);
                values.push(value);
            }
            ObservationKind::Timeseries => {
                if fields.len() != 1 {
                    return Err(Error::Format {
                        line: line_no,
                        message: format!(
                            "expected one value (observation) after the timestamp, found {}",
                            fields.len()
                        ),
                    });
                }
                let value = parse_numeric(fields[0], "observed value", line_no)?;
                times.push(timestamp);
                values.push(value);
            }
        }
    }
    let depths = match kind {
        ObservationKind::Profile => Some(depths),
        ObservationKind::Timeseries => None,
    };
    Ok(Records { times, depths, values })
}
