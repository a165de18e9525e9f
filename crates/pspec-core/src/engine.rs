//! Distributed real-FFT engine facade.
//!
//! Owns everything the rest of the pipeline must not care about: the
//! domain-decomposition rule that turns a signal length and a rank count
//! into per-rank partitions, the plan-hint ("wisdom") store, and the
//! arithmetic kernel itself (rustfft). The orchestrator only sees three
//! operations: create a plan, query the local partition, execute the plan
//! once.
//!
//! Plan creation and execution are collective: every rank must make the
//! identical call, and the engine verifies that before planning rather than
//! leaving divergence as undefined behavior.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collective::Communicator;
use crate::error::{Result, SpectralError};

/// Plan creation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Fast creation, ordinary transform quality.
    Estimate,
    /// Slow creation, optimized transform quality.
    Measure,
}

impl PlanMode {
    fn tag(self) -> u64 {
        match self {
            PlanMode::Estimate => 0,
            PlanMode::Measure => 1,
        }
    }
}

/// Per-rank slice of the input signal, as dictated by the engine's
/// decomposition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Samples to skip before this rank's read region.
    pub skip_count: u64,
    /// Samples this rank reads and contributes to the transform.
    pub read_count: u64,
    /// Length in reals of the rank-local input buffer. At least
    /// `2 * read_count` (the strided layout pads each real with a slot for
    /// an implicit imaginary part) and uniform across ranks, so the buffer
    /// must be allocated even when `read_count` is zero.
    pub local_len: usize,
}

/// Opaque, reusable plan-hint store.
///
/// A serialized blob of sizes the engine has already planned in `Measure`
/// mode. Importing it lets a later run skip the slow optimization pass.
/// Everything outside this module treats the file as opaque bytes; only the
/// open/read/write failures are part of the contract.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PlanHints {
    measured: HashSet<u64>,
}

impl PlanHints {
    /// Load hints from a file.
    ///
    /// Failure to open (or read) the file is fatal. A blob that opens but
    /// does not parse is not: the import is best-effort and degrades to an
    /// empty store with a warning.
    pub fn import(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| SpectralError::io(path, e))?;
        match serde_json::from_slice(&bytes) {
            Ok(hints) => Ok(hints),
            Err(err) => {
                warn!(path = %path.display(), %err, "plan hint blob is malformed, ignoring it");
                Ok(Self::default())
            }
        }
    }

    /// Serialize the store to a file.
    pub fn export(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| SpectralError::Internal(format!("couldn't serialize plan hints: {e}")))?;
        fs::write(path, bytes).map_err(|e| SpectralError::io(path, e))
    }

    fn knows(&self, len: u64) -> bool {
        self.measured.contains(&len)
    }

    fn record(&mut self, len: u64) {
        self.measured.insert(len);
    }
}

/// A single-use execution plan for a real-to-complex transform of a fixed
/// signal length.
pub struct Plan {
    len: u64,
    mode: PlanMode,
    kernel: Arc<dyn Fft<f64>>,
}

impl Plan {
    /// Create a plan collectively.
    ///
    /// Every rank must call this with the same length and mode; the engine
    /// checks that first and fails the whole job with a plan error on
    /// divergence. Local creation failure is likewise converted into a
    /// collective outcome, so no rank proceeds past a plan its peers do not
    /// have.
    pub fn create(
        comm: &Communicator,
        len: u64,
        mode: PlanMode,
        hints: &mut PlanHints,
    ) -> Result<Self> {
        if !comm.all_same_u64(len)? || !comm.all_same_u64(mode.tag())? {
            return Err(SpectralError::Plan(
                "plan parameters diverge across processes".into(),
            ));
        }
        let local = Self::create_local(len, mode, hints);
        comm.checkpoint(local)
    }

    fn create_local(len: u64, mode: PlanMode, hints: &mut PlanHints) -> Result<Self> {
        if len == 0 {
            return Err(SpectralError::Plan(
                "cannot plan a transform of zero samples".into(),
            ));
        }
        let size = usize::try_from(len)
            .ok()
            .filter(|s| s.checked_mul(2).is_some())
            .ok_or_else(|| {
                SpectralError::Plan(format!("signal of {len} samples is too long to address"))
            })?;

        let mut planner = FftPlanner::new();
        let kernel = planner.plan_fft_forward(size);

        if mode == PlanMode::Measure {
            if hints.knows(len) {
                debug!(len, "plan hint hit, skipping the optimization pass");
            } else {
                // The slow path: settle the kernel's internal strategy with a
                // throwaway execution, then remember the size for next time.
                let mut scratch = vec![Complex64::new(0.0, 0.0); size];
                let mut work =
                    vec![Complex64::new(0.0, 0.0); kernel.get_inplace_scratch_len()];
                kernel.process_with_scratch(&mut scratch, &mut work);
                hints.record(len);
            }
        }

        Ok(Self { len, mode, kernel })
    }

    /// Signal length the plan was created for.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Mode the plan was created with.
    pub fn mode(&self) -> PlanMode {
        self.mode
    }

    /// The decomposition rule: contiguous blocks of `ceil(len / size)`
    /// samples in rank order, with the tail ranks possibly reading less (or
    /// nothing). Pure; the collective entry point is
    /// [`Plan::local_partition`].
    pub fn partition_for(&self, rank: usize, size: usize) -> Partition {
        let block = self.len.div_ceil(size as u64);
        let skip_count = (rank as u64 * block).min(self.len);
        let read_count = block.min(self.len - skip_count);
        Partition {
            skip_count,
            read_count,
            // Uniform padded length; create_local guarantees the cast fits.
            local_len: (2 * block) as usize,
        }
    }

    /// Query this rank's partition.
    ///
    /// Collective: every rank must ask, including ranks whose read region is
    /// empty, because the answer obliges them to allocate the local buffer.
    pub fn local_partition(&self, comm: &Communicator) -> Result<Partition> {
        let part = self.partition_for(comm.rank(), comm.size());
        comm.barrier()?;
        Ok(part)
    }

    /// Execute the transform and consume the plan.
    ///
    /// Collective. Each rank contributes the `read_count` samples sitting at
    /// the even slots of its strided input buffer; the runtime gathers them
    /// in rank order onto the coordinator, which runs the forward transform.
    /// The coordinator's return value holds all `len` complex bins (the
    /// reduction target of the transform is that single rank's memory);
    /// every other rank gets `None`.
    pub fn execute(
        self,
        comm: &Communicator,
        local_input: &[f64],
        part: &Partition,
    ) -> Result<Option<Vec<Complex64>>> {
        let read_count = part.read_count as usize;
        let mut contribution = Vec::with_capacity(read_count);
        for i in 0..read_count {
            contribution.push(local_input[2 * i]);
        }
        let gathered = comm.gather_f64(&contribution)?;

        let output = match gathered {
            Some(samples) => {
                if samples.len() as u64 != self.len {
                    return Err(SpectralError::Internal(format!(
                        "gathered {} samples for a transform of {}",
                        samples.len(),
                        self.len
                    )));
                }
                let mut bins: Vec<Complex64> =
                    samples.iter().map(|&x| Complex64::new(x, 0.0)).collect();
                let mut scratch =
                    vec![Complex64::new(0.0, 0.0); self.kernel.get_inplace_scratch_len()];
                self.kernel.process_with_scratch(&mut bins, &mut scratch);
                Some(bins)
            }
            None => None,
        };
        // All ranks leave the transform together; the plan is dropped on
        // return, it is single-use.
        comm.barrier()?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::run_job;

    fn plan_of(len: u64) -> Plan {
        Plan::create_local(len, PlanMode::Estimate, &mut PlanHints::default()).unwrap()
    }

    #[test]
    fn partitions_cover_the_signal_exactly() {
        for (len, ranks) in [(1, 1), (7, 3), (8, 3), (100, 7), (5, 8), (16, 4)] {
            let plan = plan_of(len);
            let mut total = 0;
            let mut next_start = 0;
            for rank in 0..ranks {
                let part = plan.partition_for(rank, ranks);
                assert_eq!(part.skip_count, next_start, "len={len} ranks={ranks} rank={rank}");
                assert!(part.local_len >= 2 * part.read_count as usize);
                total += part.read_count;
                next_start = (next_start + part.read_count).min(len);
            }
            assert_eq!(total, len, "len={len} ranks={ranks}");
        }
    }

    #[test]
    fn buffer_length_is_uniform_even_for_idle_ranks() {
        // 5 samples over 8 ranks: ranks 5..8 read nothing but still get the
        // same padded buffer length as everyone else.
        let plan = plan_of(5);
        let lens: Vec<usize> = (0..8).map(|r| plan.partition_for(r, 8).local_len).collect();
        assert!(lens.iter().all(|&l| l == lens[0] && l > 0));
        assert_eq!(plan.partition_for(7, 8).read_count, 0);
    }

    #[test]
    fn zero_length_plan_is_a_plan_error() {
        let err = Plan::create_local(0, PlanMode::Estimate, &mut PlanHints::default())
            .err()
            .unwrap();
        assert!(matches!(err, SpectralError::Plan(_)));
    }

    #[test]
    fn divergent_plan_arguments_fail_every_rank() {
        let results = run_job(2, |comm| {
            let mut hints = PlanHints::default();
            Plan::create(comm, 8 + comm.rank() as u64, PlanMode::Estimate, &mut hints)
                .map(|_| ())
        });
        for result in results {
            assert!(matches!(result, Err(SpectralError::Plan(_))));
        }
    }

    #[test]
    fn measure_mode_records_a_hint() {
        let mut hints = PlanHints::default();
        assert!(!hints.knows(16));
        Plan::create_local(16, PlanMode::Measure, &mut hints).unwrap();
        assert!(hints.knows(16));
    }

    #[test]
    fn hints_round_trip_through_the_blob() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hints.json");
        let mut hints = PlanHints::default();
        hints.record(1024);
        hints.export(&path).unwrap();
        let back = PlanHints::import(&path).unwrap();
        assert!(back.knows(1024));
        assert!(!back.knows(512));
    }

    #[test]
    fn missing_hint_file_is_an_io_error() {
        let err = PlanHints::import(Path::new("/no/hints/here.json"))
            .err()
            .unwrap();
        assert!(matches!(err, SpectralError::Io { .. }));
    }

    #[test]
    fn malformed_hint_blob_degrades_to_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, b"not json at all").unwrap();
        let hints = PlanHints::import(&path).unwrap();
        assert!(!hints.knows(8));
    }

    #[test]
    fn distributed_execute_matches_a_direct_transform() {
        // Constant signal: all energy in the DC bin regardless of how the
        // samples were partitioned.
        let n = 12u64;
        let results = run_job(3, |comm| {
            let mut hints = PlanHints::default();
            let plan = Plan::create(comm, n, PlanMode::Estimate, &mut hints)?;
            let part = plan.local_partition(comm)?;
            let mut buf = vec![0.0; part.local_len];
            for i in 0..part.read_count as usize {
                buf[2 * i] = 1.0;
            }
            plan.execute(comm, &buf, &part)
        });
        for (rank, result) in results.into_iter().enumerate() {
            let output = result.unwrap();
            if rank == 0 {
                let bins = output.unwrap();
                assert_eq!(bins.len(), n as usize);
                assert!((bins[0].re - n as f64).abs() < 1e-9);
                assert!(bins[0].im.abs() < 1e-9);
                for bin in &bins[1..] {
                    assert!(bin.norm() < 1e-9);
                }
            } else {
                assert!(output.is_none());
            }
        }
    }
}
