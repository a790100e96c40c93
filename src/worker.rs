//! This module contains the worker loop: the state machine each participating
//! thread runs to claim chunks from the shared task state and execute them.

use tracing::trace;
use tracing::trace_span;

use crate::locality::LocalityHint;
use crate::state::Shared;
use crate::task::Task;
use crate::util::RandomSource;

// -----------------------------------------------------------------------------
// Worker seed

/// The per-thread bookkeeping handed to each worker loop when a run starts.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Seed {
    /// The position of this worker in the run. The calling thread is zero.
    pub index: usize,
    /// The locality this worker should start in, if it has work there.
    pub home: Option<usize>,
}

// -----------------------------------------------------------------------------
// Placement

/// Tracks which locality the current thread has been hinted toward, and
/// restores the thread's original placement when dropped (including while
/// unwinding).
struct Placement<'h, H: LocalityHint> {
    hint: &'h H,
    current: Option<usize>,
    migrated: bool,
}

impl<'h, H: LocalityHint> Placement<'h, H> {
    fn new(hint: &'h H) -> Self {
        Placement {
            hint,
            current: None,
            migrated: false,
        }
    }

    /// Moves the thread toward `locality`, if it is not already there.
    fn move_to(&mut self, locality: Option<usize>) {
        let Some(locality) = locality else {
            return;
        };
        if self.current == Some(locality) {
            return;
        }
        self.migrated = true;
        if self.hint.migrate(locality) {
            trace!("migrated to locality {}", locality);
            self.current = Some(locality);
        } else {
            trace!("locality hint {} was not applied", locality);
            self.current = None;
        }
    }
}

impl<H: LocalityHint> Drop for Placement<'_, H> {
    fn drop(&mut self) {
        if self.migrated {
            self.hint.restore();
        }
    }
}

// -----------------------------------------------------------------------------
// Main worker loop

/// Claims and executes chunks until the task is out of work or poisoned.
///
/// Each iteration locks the task state, picks a range if the current one is
/// empty, claims up to one chunk from it and unlocks. The chunk is then
/// handed to `work` without the lock held, and the lock is re-taken to record
/// the outcome. Reaching `DONE` is reported by the caller through
/// [`Shared::finish`], so that panics escaping this function are accounted
/// for as well.
pub(crate) fn worker_loop<C, E, A, W, U, H, R>(
    shared: &Shared<C, E, R>,
    task: &Task<C, E, A, W, U>,
    hint: &H,
    seed: Seed,
) where
    C: Clone,
    A: Fn(&C, usize) -> C,
    W: Fn(C, C) -> Result<(), E>,
    H: LocalityHint,
    R: RandomSource,
{
    let span = trace_span!("worker", index = seed.index);
    let _enter = span.enter();

    trace!("starting worker loop");

    let mut placement = Placement::new(hint);
    let mut current: Option<usize> = None;
    let mut first_pick = true;
    let record_completed = task.undo.is_some();

    let mut state = shared.lock();
    loop {
        if state.is_done() {
            break;
        }

        // Keep draining the current range; otherwise pick a new one. Only the
        // very first pick honors the worker's home locality.
        let index = match current.filter(|&index| state.has_work(index)) {
            Some(index) => index,
            None => {
                let preferred = if first_pick { seed.home } else { None };
                first_pick = false;
                // Nothing left anywhere. Another worker claimed the last chunk
                // between our checks.
                let Some(index) = state.pick_range(preferred) else {
                    break;
                };
                trace!("switching to range {}", index);
                index
            }
        };

        let Some((start, end)) = state.claim(index, &task.advance) else {
            break;
        };
        let locality = state.locality(index);
        drop(state);

        trace!("claimed chunk from range {}", index);

        if current != Some(index) {
            current = Some(index);
            placement.move_to(locality);
        }

        let kept = record_completed.then(|| (start.clone(), end.clone()));
        let outcome = (task.work)(start, end);

        state = shared.lock();
        match outcome {
            Ok(()) => {
                if let Some((start, end)) = kept {
                    state.record_success(start, end);
                }
            }
            Err(error) => {
                trace!("chunk failed, poisoning task");
                state.record_failure(error);
            }
        }
    }
    drop(state);

    trace!("exiting worker loop");
}
