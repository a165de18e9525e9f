//! Collective-operations runtime for the SPMD worker set.
//!
//! The job runs as a fixed set of cooperating ranks, all executing the same
//! program text. Every primitive here is a *collective operation*: all ranks
//! must call it, in the same order, and all ranks leave it together. The
//! primitives double as the only legal way to move data between ranks; there
//! is no shared mutable signal data, only rank-local buffers plus these
//! explicit exchanges.
//!
//! A rank that fails locally must never simply return while its peers are
//! blocked inside the next collective call, so the runtime provides two
//! escalation channels:
//!
//! - [`Communicator::checkpoint`] converts a local `Result` into an outcome
//!   observable by every rank: if any rank failed, all ranks come out of the
//!   checkpoint with an error (the failing rank keeps its own, survivors get
//!   [`SpectralError::Aborted`] naming the lowest failing rank).
//! - [`Communicator::poison`] is the emergency valve: it wakes every rank
//!   blocked at any synchronization point with an abort error instead of
//!   letting them deadlock. The job launcher arms it automatically when a
//!   rank panics.
//!
//! ## Example
//!
//! ```rust
//! use pspec_core::collective::run_job;
//!
//! let results = run_job(4, |comm| {
//!     // Rank-ordered gather: only the coordinator sees the data.
//!     let gathered = comm.gather_f64(&[comm.rank() as f64])?;
//!     if comm.is_root() {
//!         assert_eq!(gathered.unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
//!     } else {
//!         assert!(gathered.is_none());
//!     }
//!     Ok(comm.rank())
//! });
//! assert_eq!(results.len(), 4);
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::error::{Result, SpectralError};

/// The coordinator rank. The reduced transform output, the spectrum and all
/// text exports live on this rank only.
pub const ROOT: usize = 0;

/// Barrier with an abort channel.
///
/// `std::sync::Barrier` has no way to wake waiters early, which is exactly
/// what a dying rank needs, so this is a generation-counted barrier built on
/// `Mutex`/`Condvar` with a poison flag folded into the wait condition.
struct SyncPoint {
    state: Mutex<SyncState>,
    cond: Condvar,
    size: usize,
}

struct SyncState {
    arrived: usize,
    generation: u64,
    poisoned_by: Option<usize>,
}

impl SyncPoint {
    fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(SyncState {
                arrived: 0,
                generation: 0,
                poisoned_by: None,
            }),
            cond: Condvar::new(),
            size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // Lock poisoning only happens when a holder panicked; the abort path
        // must still make progress then.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until all ranks arrive, or until some rank poisons the job.
    fn wait(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(rank) = state.poisoned_by {
            return Err(SpectralError::Aborted { rank });
        }
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cond.notify_all();
            return Ok(());
        }
        let generation = state.generation;
        while state.generation == generation && state.poisoned_by.is_none() {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match state.poisoned_by {
            Some(rank) => Err(SpectralError::Aborted { rank }),
            None => Ok(()),
        }
    }

    fn poison(&self, rank: usize) {
        let mut state = self.lock();
        if state.poisoned_by.is_none() {
            state.poisoned_by = Some(rank);
        }
        self.cond.notify_all();
    }
}

/// Exchange boards shared by all ranks of one job.
struct JobShared {
    sync: SyncPoint,
    /// Lowest rank that reported a failure at the current checkpoint.
    failed: Mutex<Option<usize>>,
    /// Per-rank deposit slots for `gather_f64`.
    gather: Mutex<Vec<Option<Vec<f64>>>>,
    /// Per-rank deposit slots for `all_same_u64`.
    uniform: Mutex<Vec<Option<u64>>>,
}

impl JobShared {
    fn new(size: usize) -> Self {
        Self {
            sync: SyncPoint::new(size),
            failed: Mutex::new(None),
            gather: Mutex::new(vec![None; size]),
            uniform: Mutex::new(vec![None; size]),
        }
    }

    fn lock<'a, T>(board: &'a Mutex<T>) -> MutexGuard<'a, T> {
        board.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the collective runtime, one per rank.
#[derive(Clone)]
pub struct Communicator {
    rank: usize,
    size: usize,
    shared: Arc<JobShared>,
}

impl Communicator {
    /// This rank's index, `0..size`.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of cooperating ranks, fixed at job launch.
    pub fn size(&self) -> usize {
        self.size
    }

    /// True on the coordinator rank.
    pub fn is_root(&self) -> bool {
        self.rank == ROOT
    }

    /// Plain synchronization barrier.
    ///
    /// Fails with [`SpectralError::Aborted`] once the job is poisoned.
    pub fn barrier(&self) -> Result<()> {
        self.shared.sync.wait()
    }

    /// Collective error check.
    ///
    /// Every rank passes the result of its local step. If all ranks
    /// succeeded, each gets its own value back. If any rank failed, every
    /// rank leaves with an error: the failing rank keeps its own, the
    /// survivors get an abort naming the lowest failing rank. Either way no
    /// rank can diverge from its peers on whether the step happened.
    pub fn checkpoint<T>(&self, local: Result<T>) -> Result<T> {
        if local.is_err() {
            let mut failed = JobShared::lock(&self.shared.failed);
            let lowest = failed.map_or(self.rank, |r| r.min(self.rank));
            *failed = Some(lowest);
        }
        let verdict = self.read_and_reset_failed();
        match (verdict, local) {
            // A poisoned barrier outranks everything except our own error.
            (Err(abort), Ok(_)) => Err(abort),
            (_, Err(err)) => Err(err),
            (Ok(None), Ok(value)) => Ok(value),
            (Ok(Some(rank)), Ok(_)) => Err(SpectralError::Aborted { rank }),
        }
    }

    fn read_and_reset_failed(&self) -> Result<Option<usize>> {
        self.shared.sync.wait()?; // all deposits visible
        let verdict = *JobShared::lock(&self.shared.failed);
        self.shared.sync.wait()?; // all ranks have read
        if self.is_root() {
            *JobShared::lock(&self.shared.failed) = None;
        }
        self.shared.sync.wait()?; // reset visible before the board is reused
        Ok(verdict)
    }

    /// Gather each rank's slice to the coordinator, concatenated in rank
    /// order. Returns `Some` on the coordinator, `None` everywhere else.
    pub fn gather_f64(&self, local: &[f64]) -> Result<Option<Vec<f64>>> {
        JobShared::lock(&self.shared.gather)[self.rank] = Some(local.to_vec());
        self.shared.sync.wait()?; // all deposits visible
        let out = if self.is_root() {
            let mut slots = JobShared::lock(&self.shared.gather);
            let mut all = Vec::new();
            for slot in slots.iter_mut() {
                match slot.take() {
                    Some(part) => all.extend_from_slice(&part),
                    None => {
                        return Err(SpectralError::Internal(
                            "gather slot missing a deposit".into(),
                        ))
                    }
                }
            }
            Some(all)
        } else {
            None
        };
        self.shared.sync.wait()?; // coordinator done draining the slots
        Ok(out)
    }

    /// Collective uniformity check: true iff every rank passed the same
    /// value. Used to enforce that collective calls with parameters are made
    /// identically on all ranks.
    pub fn all_same_u64(&self, value: u64) -> Result<bool> {
        JobShared::lock(&self.shared.uniform)[self.rank] = Some(value);
        self.shared.sync.wait()?;
        let same = {
            let slots = JobShared::lock(&self.shared.uniform);
            slots.iter().all(|slot| *slot == Some(value))
        };
        self.shared.sync.wait()?;
        if self.is_root() {
            JobShared::lock(&self.shared.uniform).fill(None);
        }
        self.shared.sync.wait()?;
        Ok(same)
    }

    /// Emergency abort: wake every rank blocked at any synchronization point
    /// with an abort error. Idempotent; the first poisoner is remembered.
    pub fn poison(&self) {
        self.shared.sync.poison(self.rank);
    }
}

/// Poisons the job if the rank unwinds instead of returning.
struct AbortOnUnwind<'a> {
    comm: &'a Communicator,
    armed: bool,
}

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::error!(rank = self.comm.rank(), "worker panicked, poisoning the job");
            self.comm.poison();
        }
    }
}

/// Launch `workers` ranks over scoped threads, run `f` on each, and return
/// the per-rank results in rank order.
///
/// The worker count is fixed for the lifetime of the job. A rank that
/// returns an error or panics poisons the job so that no peer is left
/// blocked at a collective call.
pub fn run_job<T, F>(workers: usize, f: F) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(&Communicator) -> Result<T> + Sync,
{
    if workers == 0 {
        return Vec::new();
    }
    let shared = Arc::new(JobShared::new(workers));
    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = (0..workers)
            .map(|rank| {
                let comm = Communicator {
                    rank,
                    size: workers,
                    shared: Arc::clone(&shared),
                };
                scope.spawn(move || {
                    let mut guard = AbortOnUnwind {
                        comm: &comm,
                        armed: true,
                    };
                    let out = f(&comm);
                    guard.armed = false;
                    if out.is_err() {
                        // Cooperative failure: peers blocked on a later
                        // collective must still be released.
                        comm.poison();
                    }
                    out
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(SpectralError::Internal("worker thread panicked".into()))
                })
            })
            .collect()
    })
}
