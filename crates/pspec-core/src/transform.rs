//! Partition and transform orchestrator.
//!
//! Glues the signal source to the engine: imports plan hints, creates the
//! plan, queries this rank's partition, owns the page-aligned input buffer
//! for the lifetime of the transform, drives the strided parallel read, and
//! invokes the single-use plan. Construction and every driving method are
//! collective; all local failures are routed through the runtime's
//! checkpoint so the ranks cannot diverge.
//!
//! There is exactly one legal calling sequence —
//! `new` → `read_data` → `do_transform` — and each step checks that its
//! predecessor ran.

use std::path::{Path, PathBuf};

use num_complex::Complex64;
use tracing::debug;

use crate::buffer::PageAligned;
use crate::collective::Communicator;
use crate::engine::{Partition, Plan, PlanHints, PlanMode};
use crate::error::{Result, SpectralError};
use crate::export;
use crate::signal::SignalSource;

/// Orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct TransformConfig {
    /// Create a slow, optimized plan instead of the fast ordinary one.
    pub optimize_plan: bool,
    /// Plan-hint blob to load before plan creation. Open failure is fatal;
    /// a blob that does not parse is silently replaced by an empty store.
    pub import_hints: Option<PathBuf>,
}

/// Orchestrates the distributed real-to-complex transform for one rank.
///
/// Owns the signal source for its lifetime and the transform output after
/// [`RealFftTransform::do_transform`]; collaborators get read-only
/// accessors, never privileged access.
pub struct RealFftTransform {
    signal: SignalSource,
    partition: Partition,
    plan: Option<Plan>,
    hints: PlanHints,
    input: PageAligned,
    output: Option<Vec<Complex64>>,
    read_done: bool,
}

impl RealFftTransform {
    /// Import hints, create the plan, query the partition and allocate the
    /// input buffer. Collective.
    ///
    /// The buffer allocation is unconditional: a rank whose read region is
    /// empty still allocates `local_len` reals, because the engine's layout
    /// demands it.
    pub fn new(
        comm: &Communicator,
        config: &TransformConfig,
        signal: SignalSource,
    ) -> Result<Self> {
        let local_hints = match &config.import_hints {
            Some(path) => PlanHints::import(path),
            None => Ok(PlanHints::default()),
        };
        let mut hints = comm.checkpoint(local_hints)?;

        let mode = if config.optimize_plan {
            PlanMode::Measure
        } else {
            PlanMode::Estimate
        };
        let plan = Plan::create(comm, signal.len(), mode, &mut hints)?;
        let partition = plan.local_partition(comm)?;
        debug!(
            rank = comm.rank(),
            skip = partition.skip_count,
            read = partition.read_count,
            buffer = partition.local_len,
            "partition established"
        );

        let input = comm.checkpoint(PageAligned::zeroed(partition.local_len))?;

        Ok(Self {
            signal,
            partition,
            plan: Some(plan),
            hints,
            input,
            output: None,
            read_done: false,
        })
    }

    /// Read this rank's partition into the strided input layout and close
    /// the input file. Collective.
    pub fn read_data(&mut self, comm: &Communicator) -> Result<()> {
        let local = self
            .signal
            .read_partition(&self.partition, self.input.as_mut_slice());
        comm.checkpoint(local)?;
        self.read_done = true;
        Ok(())
    }

    /// Run the distributed transform and release the single-use plan.
    /// Collective.
    ///
    /// Afterwards the coordinator's [`RealFftTransform::output`] holds the
    /// full reduced spectrum; every other rank holds nothing.
    pub fn do_transform(&mut self, comm: &Communicator) -> Result<()> {
        let ready = if !self.read_done {
            Err(SpectralError::Internal(
                "do_transform called before read_data".into(),
            ))
        } else {
            self.plan.take().ok_or_else(|| {
                SpectralError::Internal("transform was already executed".into())
            })
        };
        let plan = comm.checkpoint(ready)?;
        self.output = plan.execute(comm, self.input.as_slice(), &self.partition)?;
        Ok(())
    }

    /// Total sample count of the input signal.
    pub fn signal_len(&self) -> u64 {
        self.signal.len()
    }

    /// This rank's partition.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// The reduced transform output. `Some` only on the coordinator, and
    /// only after [`RealFftTransform::do_transform`].
    pub fn output(&self) -> Option<&[Complex64]> {
        self.output.as_deref()
    }

    /// Export the transform output as `# re, im` text, one line per original
    /// sample index. No-op without a destination; only meaningful on the
    /// coordinator.
    pub fn export_transformed(&self, dest: Option<&Path>) -> Result<()> {
        if dest.is_none() {
            return Ok(());
        }
        let bins = self.output().ok_or_else(|| {
            SpectralError::Internal(
                "transform output export is only available on the coordinator".into(),
            )
        })?;
        export::write_pairs(dest, "# re, im", bins.iter().map(|c| (c.re, c.im)))
    }

    /// Export the plan-hint blob. No-op without a destination.
    pub fn export_hints(&self, dest: Option<&Path>) -> Result<()> {
        match dest {
            Some(path) => self.hints.export(path),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::run_job;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_signal(dir: &TempDir, samples: &[f64]) -> PathBuf {
        let path = dir.path().join("signal.f64");
        let mut file = File::create(&path).unwrap();
        for s in samples {
            file.write_all(&s.to_le_bytes()).unwrap();
        }
        path
    }

    fn full_run(
        comm: &Communicator,
        config: &TransformConfig,
        path: &Path,
    ) -> Result<RealFftTransform> {
        let signal = SignalSource::open(comm, path)?;
        let mut transform = RealFftTransform::new(comm, config, signal)?;
        transform.read_data(comm)?;
        transform.do_transform(comm)?;
        Ok(transform)
    }

    #[test]
    fn only_the_coordinator_holds_the_output() {
        let dir = TempDir::new().unwrap();
        let samples: Vec<f64> = (0..16).map(|i| (i as f64 * 0.7).sin()).collect();
        let path = write_signal(&dir, &samples);

        let results = run_job(4, |comm| {
            let transform = full_run(comm, &TransformConfig::default(), &path)?;
            Ok((comm.is_root(), transform.output().map(<[Complex64]>::len)))
        });
        for result in results {
            let (is_root, output_len) = result.unwrap();
            if is_root {
                assert_eq!(output_len, Some(16));
            } else {
                assert_eq!(output_len, None);
            }
        }
    }

    #[test]
    fn partitioned_transform_equals_single_rank_transform() {
        let dir = TempDir::new().unwrap();
        let samples: Vec<f64> = (0..24).map(|i| ((i * i) as f64).cos()).collect();
        let path = write_signal(&dir, &samples);

        let config = TransformConfig::default();
        let single = run_job(1, |comm| {
            Ok(full_run(comm, &config, &path)?.output().unwrap().to_vec())
        })
        .pop()
        .unwrap()
        .unwrap();
        let multi = run_job(5, |comm| {
            Ok(full_run(comm, &config, &path)?.output().map(<[Complex64]>::to_vec))
        })
        .into_iter()
        .next()
        .unwrap()
        .unwrap()
        .unwrap();

        assert_eq!(single.len(), multi.len());
        for (a, b) in single.iter().zip(&multi) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn transform_is_single_use() {
        let dir = TempDir::new().unwrap();
        let path = write_signal(&dir, &[1.0, 2.0, 3.0, 4.0]);
        let results = run_job(1, |comm| {
            let mut transform = full_run(comm, &TransformConfig::default(), &path)?;
            Ok(transform.do_transform(comm).is_err())
        });
        assert!(results.into_iter().next().unwrap().unwrap());
    }

    #[test]
    fn transform_before_read_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_signal(&dir, &[1.0, 2.0]);
        let results = run_job(1, |comm| {
            let signal = SignalSource::open(comm, &path)?;
            let mut transform =
                RealFftTransform::new(comm, &TransformConfig::default(), signal)?;
            Ok(transform.do_transform(comm).is_err())
        });
        assert!(results.into_iter().next().unwrap().unwrap());
    }

    #[test]
    fn missing_hint_file_fails_the_whole_job() {
        let dir = TempDir::new().unwrap();
        let path = write_signal(&dir, &[1.0, 2.0, 3.0]);
        let config = TransformConfig {
            optimize_plan: false,
            import_hints: Some(PathBuf::from("/no/such/hints.json")),
        };
        let results = run_job(2, |comm| {
            let signal = SignalSource::open(comm, &path)?;
            RealFftTransform::new(comm, &config, signal).map(|_| ())
        });
        for result in results {
            // Every rank tried the import itself, so each observes the I/O
            // failure directly.
            assert!(matches!(result, Err(SpectralError::Io { .. })));
        }
    }

    #[test]
    fn hint_export_round_trips_through_a_measured_plan() {
        let dir = TempDir::new().unwrap();
        let path = write_signal(&dir, &(0..8).map(|i| i as f64).collect::<Vec<_>>());
        let hints_path = dir.path().join("hints.json");

        let config = TransformConfig {
            optimize_plan: true,
            import_hints: None,
        };
        run_job(1, |comm| {
            let transform = full_run(comm, &config, &path)?;
            transform.export_hints(Some(&hints_path))
        })
        .pop()
        .unwrap()
        .unwrap();

        let reimport = TransformConfig {
            optimize_plan: true,
            import_hints: Some(hints_path.clone()),
        };
        let ok = run_job(1, |comm| full_run(comm, &reimport, &path).map(|_| ()));
        assert!(ok.into_iter().next().unwrap().is_ok());
    }

    #[test]
    fn transformed_export_writes_one_row_per_sample() {
        let dir = TempDir::new().unwrap();
        let path = write_signal(&dir, &[1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
        let out = dir.path().join("bins.txt");
        run_job(2, |comm| {
            let transform = full_run(comm, &TransformConfig::default(), &path)?;
            if comm.is_root() {
                transform.export_transformed(Some(&out))?;
            }
            transform.export_transformed(None) // no destination, no-op anywhere
        })
        .into_iter()
        .for_each(|r| r.unwrap());

        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# re, im");
        assert_eq!(lines.len(), 1 + 6);
    }
}
