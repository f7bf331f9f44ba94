//! AquaCal CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod inspect;
mod sample;

#[derive(Parser)]
#[command(name = "aquacal")]
#[command(about = "AquaCal - calibration scoring and posterior ensembles for gridded simulation models")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw a density-corrected posterior ensemble from a results table
    Sample {
        /// Calibration declaration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Results table accumulated by the search (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Number of ensemble members to draw
        #[arg(short = 'n', long)]
        size: usize,

        /// Which nearest neighbor defines the density radius
        #[arg(long, default_value = "10")]
        neighbors: usize,

        /// RNG seed for a reproducible draw
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for the members (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse an observation file and report its contents
    Inspect {
        /// Observation file
        source: PathBuf,

        /// Treat the file as timeseries records (default: profiles)
        #[arg(long)]
        timeseries: bool,

        /// Minimum kept depth (downward-positive, meters)
        #[arg(long)]
        min_depth: Option<f64>,

        /// Maximum kept depth (downward-positive, meters)
        #[arg(long)]
        max_depth: Option<f64>,

        /// Ignore and do not write the cache side file
        #[arg(long)]
        no_cache: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    match cli.command {
        Commands::Sample { config, input, size, neighbors, seed, output } => {
            sample::run(&config, &input, size, neighbors, seed, output.as_deref())
        }
        Commands::Inspect { source, timeseries, min_depth, max_depth, no_cache } => {
            inspect::run(&source, timeseries, min_depth, max_depth, no_cache)
        }
    }
}
