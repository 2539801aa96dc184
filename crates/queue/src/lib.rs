//! `queue` crate: the in-memory FIFO of runs waiting to execute.
//!
//! The queue also owns the worker-slot counter, so "push and maybe start a
//! worker" and "pop or retire this worker" are each a single critical
//! section. A run can therefore never be stranded in the queue with no worker
//! left to drain it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

/// What the caller of [`RunQueue::push`] must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Admission {
    /// A worker slot was reserved for the caller; it must start a drain loop.
    StartWorker,
    /// Every slot is busy; an existing worker will pick the run up.
    Waiting,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Uuid>,
    active_workers: usize,
}

/// FIFO run queue drained by at most `max_workers` concurrent loops.
#[derive(Debug)]
pub struct RunQueue {
    state: Mutex<State>,
    max_workers: usize,
}

impl RunQueue {
    /// `max_workers` is clamped to at least 1.
    pub fn new(max_workers: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_workers: max_workers.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a run to the tail of the queue.
    pub fn push(&self, run_id: Uuid) -> Admission {
        let mut state = self.state();
        state.pending.push_back(run_id);
        if state.active_workers < self.max_workers {
            state.active_workers += 1;
            debug!(%run_id, workers = state.active_workers, "queued run, starting worker");
            Admission::StartWorker
        } else {
            debug!(%run_id, pending = state.pending.len(), "queued run behind busy workers");
            Admission::Waiting
        }
    }

    /// Pop the head of the queue for a running worker.
    ///
    /// `None` means the queue is empty and the caller's worker slot has been
    /// released; the worker must exit.
    pub fn next_for_worker(&self) -> Option<Uuid> {
        let mut state = self.state();
        match state.pending.pop_front() {
            Some(run_id) => Some(run_id),
            None => {
                state.active_workers = state.active_workers.saturating_sub(1);
                None
            }
        }
    }

    /// Drop a run that has not started yet. Returns whether it was queued.
    pub fn remove(&self, run_id: Uuid) -> bool {
        let mut state = self.state();
        let before = state.pending.len();
        state.pending.retain(|id| *id != run_id);
        state.pending.len() != before
    }

    /// Take every run that has not started yet, leaving the queue empty.
    pub fn drain_pending(&self) -> Vec<Uuid> {
        self.state().pending.drain(..).collect()
    }

    /// Runs waiting for a worker.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_workers(&self) -> usize {
        self.state().active_workers
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}
