//! Error taxonomy for the distributed spectrum pipeline.
//!
//! Every failure in the core carries a kind and a human readable diagnostic.
//! None of the components attempt local recovery: a failed step is a missing
//! precondition for the next collective call, so the only sane policy is to
//! surface the error to the job driver, which reports the failing rank and
//! converts the failure into a job-wide abort.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for spectrum pipeline operations.
pub type Result<T> = std::result::Result<T, SpectralError>;

/// Errors that can occur while computing a distributed power spectrum.
#[derive(Error, Debug)]
pub enum SpectralError {
    /// File open/read/write failure.
    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The input signal file holds zero samples.
    #[error("input data file '{path}' is lacking in data points")]
    EmptyInput { path: PathBuf },

    /// Aligned buffer allocation failed.
    #[error("couldn't allocate array of {len} reals; data may be too big to fit in memory, increase the worker count")]
    Memory { len: usize },

    /// The transform engine could not construct an execution plan.
    #[error("plan creation failed: {0}")]
    Plan(String),

    /// Malformed or out-of-range user input.
    #[error("{0}")]
    Validation(String),

    /// A peer rank failed; this rank was told to stand down before the next
    /// collective call could deadlock it.
    #[error("aborted: process #{rank} failed")]
    Aborted { rank: usize },

    /// Anything not anticipated above, including failures inside the
    /// reporting path itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpectralError {
    /// Build an I/O error with path context.
    pub fn io(path: &Path, source: io::Error) -> Self {
        SpectralError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for the stand-down error a rank receives when a peer failed.
    /// The peer carries the root cause; this one is only an echo.
    pub fn is_abort(&self) -> bool {
        matches!(self, SpectralError::Aborted { .. })
    }

    /// True for user-input errors that are reported once for the whole job.
    pub fn is_usage(&self) -> bool {
        matches!(self, SpectralError::Validation(_))
    }
}
