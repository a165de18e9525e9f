//! Job driver: the one legal calling sequence, per rank and job-wide.
//!
//! `run_rank` is the whole pipeline as seen by a single rank; `run`
//! validates the configuration, launches the fixed worker set, and turns
//! any rank's failure into a job-wide failure with the failing rank's
//! identity attached. There is no partial-result recovery: a single
//! distributed computation either completes or the whole job fails.

use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::collective::{run_job, Communicator};
use crate::error::{Result, SpectralError};
use crate::signal::SignalSource;
use crate::spectrum::{self, PowerSpectrum};
use crate::transform::{RealFftTransform, TransformConfig};

/// Everything one job needs, assembled before any collective work begins.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Input signal file: raw little-endian f64 samples.
    pub input: PathBuf,
    /// Destination for the power spectrum text export.
    pub output: PathBuf,
    /// Sample rate of the input data in Hz.
    pub sample_rate_hz: f64,
    /// Create a slow, optimized execution plan.
    pub optimize_plan: bool,
    /// Plan-hint blob to import before plan creation.
    pub import_hints: Option<PathBuf>,
    /// Destination for the plan-hint blob export.
    pub export_hints: Option<PathBuf>,
    /// Optional destination for the raw transform output.
    pub export_transform: Option<PathBuf>,
}

impl JobConfig {
    /// Check user input before any worker is launched.
    pub fn validate(&self) -> Result<()> {
        spectrum::validate_rate(self.sample_rate_hz)
    }
}

/// Run the pipeline on one rank.
///
/// Open the signal, build the transform, drive the strided read, execute
/// the transform; then, on the coordinator only, derive the spectrum and
/// write the exports. Every step is either collective or coordinator-local
/// after the last collective call.
pub fn run_rank(comm: &Communicator, config: &JobConfig) -> Result<()> {
    let signal = SignalSource::open(comm, &config.input)?;
    if comm.is_root() {
        info!(
            samples = signal.len(),
            workers = comm.size(),
            input = %config.input.display(),
            "signal opened"
        );
    }

    let transform_config = TransformConfig {
        optimize_plan: config.optimize_plan,
        import_hints: config.import_hints.clone(),
    };
    let mut transform = RealFftTransform::new(comm, &transform_config, signal)?;
    transform.read_data(comm)?;
    debug!(rank = comm.rank(), "partition read complete");
    transform.do_transform(comm)?;

    if comm.is_root() {
        let power_spectrum = PowerSpectrum::compute(&transform, config.sample_rate_hz)?;
        info!(
            entries = power_spectrum.len(),
            bin_hz = power_spectrum.bin_size(),
            "power spectrum computed"
        );
        power_spectrum.export(Some(&config.output))?;
        transform.export_transformed(config.export_transform.as_deref())?;
        transform.export_hints(config.export_hints.as_deref())?;
    }
    Ok(())
}

/// Run the whole job with a fixed set of `workers` ranks.
///
/// Usage errors are caught here, before any collective work. Core failures
/// are reported per rank; abort echoes from stood-down peers are kept out of
/// the noise. The returned error is the root cause.
pub fn run(workers: usize, config: &JobConfig) -> Result<()> {
    config.validate()?;
    if workers == 0 {
        return Err(SpectralError::Validation(
            "worker count must be at least 1".into(),
        ));
    }

    let results = run_job(workers, |comm| run_rank(comm, config));

    let mut cause = None;
    for (rank, result) in results.into_iter().enumerate() {
        if let Err(err) = result {
            if err.is_abort() {
                debug!(rank, "process stood down after a peer failure");
            } else {
                error!(rank, %err, "process failed");
                if cause.is_none() {
                    cause = Some(err);
                }
            }
        }
    }
    match cause {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
