//! pspec command line entry point.
//!
//! Argument parsing and process plumbing only; everything with algorithmic
//! content lives in `pspec-core`. Usage errors are reported once, before
//! any worker is launched; core failures are reported with the failing
//! rank's identity by the job driver and turn into a non-zero exit status.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pspec_core::{job, JobConfig};

/// Distributed one-sided power spectral density tool.
///
/// Reads a flat binary file of little-endian IEEE-754 doubles, runs a
/// real-to-complex Fourier transform partitioned across a fixed set of
/// workers, and writes the Parseval-normalized power spectrum as text.
#[derive(Parser, Debug)]
#[command(name = "pspec", version, about)]
struct Args {
    /// Input data file (raw little-endian f64 samples, no header)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file for the power spectrum ("# Hz, J")
    #[arg(short, long)]
    output: PathBuf,

    /// Sample rate of the input data in Hz
    #[arg(short, long)]
    sample_rate: f64,

    /// Save plan hints for later runs to this file (implies --optimize-plan)
    #[arg(short = 'e', long)]
    export_hints: Option<PathBuf>,

    /// Import plan hints from this file before plan creation
    #[arg(short = 'w', long)]
    import_hints: Option<PathBuf>,

    /// Save the raw transform output ("# re, im") to this file
    #[arg(short = 't', long)]
    export_transform: Option<PathBuf>,

    /// Create a slow-to-build, optimized execution plan
    #[arg(long)]
    optimize_plan: bool,

    /// Number of cooperating worker processes (default: available cores)
    #[arg(short = 'n', long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    let workers = args.workers.unwrap_or_else(|| {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let config = JobConfig {
        input: args.input,
        output: args.output,
        sample_rate_hz: args.sample_rate,
        // Exporting hints only makes sense for a plan worth remembering.
        optimize_plan: args.optimize_plan || args.export_hints.is_some(),
        import_hints: args.import_hints,
        export_hints: args.export_hints,
        export_transform: args.export_transform,
    };

    info!("pspec {} - power spectrum calculation tool", env!("CARGO_PKG_VERSION"));

    match job::run(workers, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_usage() => {
            error!(%err, "invalid arguments");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(%err, "job failed");
            ExitCode::FAILURE
        }
    }
}
