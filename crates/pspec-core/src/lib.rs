//! # pspec core library
//!
//! Computes a one-sided power spectral density (PSD) from a real-valued
//! time-series signal that is too big, or too slow, to transform on a
//! single worker. The raw sample file is partitioned across a fixed set of
//! cooperating ranks, pushed through a distributed real-to-complex Fourier
//! transform, and reduced into a physically normalized spectrum on the
//! coordinator rank.
//!
//! ## Pipeline
//!
//! ```text
//! signal file → SignalSource → RealFftTransform → PowerSpectrum → exports
//!                 (collective    (partition, read,    (coordinator
//!                  open, N)       plan, execute)       only)
//! ```
//!
//! Every stage boundary is a collective operation: all ranks call it, all
//! ranks leave it together, and a local failure on any rank is converted
//! into an outcome every rank observes. See [`collective`] for the runtime.
//!
//! ## Example
//!
//! ```rust
//! use std::io::Write;
//! use pspec_core::{job, JobConfig};
//!
//! // A tiny signal: raw little-endian f64 samples, no header.
//! let dir = std::env::temp_dir();
//! let input = dir.join("pspec_doc_example.f64");
//! let output = dir.join("pspec_doc_example_spectrum.txt");
//! let mut file = std::fs::File::create(&input).unwrap();
//! for i in 0..64 {
//!     let x = (2.0 * std::f64::consts::PI * 100.0 * i as f64 / 1000.0).sin();
//!     file.write_all(&x.to_le_bytes()).unwrap();
//! }
//! drop(file);
//!
//! let config = JobConfig {
//!     input,
//!     output: output.clone(),
//!     sample_rate_hz: 1000.0,
//!     optimize_plan: false,
//!     import_hints: None,
//!     export_hints: None,
//!     export_transform: None,
//! };
//! job::run(2, &config).unwrap();
//!
//! let spectrum = std::fs::read_to_string(&output).unwrap();
//! assert!(spectrum.starts_with("# Hz, J"));
//! std::fs::remove_file(&config.input).ok();
//! std::fs::remove_file(&output).ok();
//! ```

pub mod buffer;
pub mod collective;
pub mod engine;
pub mod error;
pub mod export;
pub mod job;
pub mod signal;
pub mod spectrum;
pub mod transform;

pub use buffer::PageAligned;
pub use collective::{run_job, Communicator, ROOT};
pub use engine::{Partition, Plan, PlanHints, PlanMode};
pub use error::{Result, SpectralError};
pub use job::JobConfig;
pub use signal::SignalSource;
pub use spectrum::{PowerSpectrum, SpectrumEntry};
pub use transform::{RealFftTransform, TransformConfig};
