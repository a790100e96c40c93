//! This module contains the shared coordination state for a single run of a
//! task. All mutation happens under one mutex; the lock is only ever held for
//! constant-time bookkeeping (plus one call to the task's `advance`), never
//! while client work runs.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use core::cmp;
use core::mem;
use std::sync::PoisonError;

use crate::platform::*;
use crate::range::WorkRange;
use crate::util::RandomSource;

// -----------------------------------------------------------------------------
// Range state

/// The unfinished part of one of the caller's ranges.
struct RangeState<C> {
    start: C,
    remaining: usize,
    locality: Option<usize>,
}

// -----------------------------------------------------------------------------
// Task state

/// The mutable state shared by every worker loop of a run.
pub(crate) struct TaskState<C, E, R> {
    /// The caller's ranges, in the order they were given.
    ranges: Vec<RangeState<C>>,
    /// The sum of `remaining` over all ranges.
    total_remaining: usize,
    /// The number of ranges with `remaining > 0`.
    ranges_with_work_left: usize,
    /// The number of steps taken by each claim. Fixed for the run.
    chunk_size: usize,
    /// The number of worker loops taking part in the run.
    threads_total: usize,
    /// The number of worker loops that have reached `DONE`.
    threads_finished: usize,
    /// The first error returned by `work`. Once set, no new chunks are claimed.
    first_error: Option<E>,
    /// The number of failed `work` calls, including the first.
    failures: usize,
    /// The payload of the first panic raised by a worker loop. Latches the
    /// task just like an error does.
    panic: Option<Box<dyn Any + Send>>,
    /// Chunks for which `work` succeeded, kept only when the task can be undone.
    completed: Option<Vec<(C, C)>>,
    /// The number of chunks claimed so far.
    chunks_claimed: usize,
    /// Set when launching the run's workers failed part way through.
    abandoned: bool,
    /// Picks ranges when rebalancing. Taken along with the outcome.
    rng: Option<R>,
}

/// The outcome of a run, taken out of the task state once every worker has
/// finished.
pub(crate) struct Outcome<C, E> {
    pub first_error: Option<E>,
    pub failures: usize,
    pub panic: Option<Box<dyn Any + Send>>,
    pub completed: Vec<(C, C)>,
    pub chunks_claimed: usize,
}

impl<C, E, R> TaskState<C, E, R>
where
    C: Clone,
    R: RandomSource,
{
    /// Creates the state for a new run.
    pub fn new(
        ranges: Vec<WorkRange<C>>,
        chunk_size: usize,
        threads_total: usize,
        rng: R,
        record_completed: bool,
    ) -> TaskState<C, E, R> {
        let ranges: Vec<RangeState<C>> = ranges
            .into_iter()
            .map(|range| RangeState {
                start: range.start,
                remaining: range.size,
                locality: range.locality,
            })
            .collect();

        let total_remaining = ranges.iter().map(|range| range.remaining).sum();
        let ranges_with_work_left = ranges.iter().filter(|range| range.remaining > 0).count();

        TaskState {
            ranges,
            total_remaining,
            ranges_with_work_left,
            chunk_size,
            threads_total,
            threads_finished: 0,
            first_error: None,
            failures: 0,
            panic: None,
            completed: record_completed.then(Vec::new),
            chunks_claimed: 0,
            abandoned: false,
            rng: Some(rng),
        }
    }

    /// Returns true if the task is either out of work or poisoned. Workers
    /// stop claiming chunks once this returns true.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.total_remaining == 0 || self.is_poisoned()
    }

    /// Returns true if a `work` call has failed, a worker has panicked or the
    /// run was abandoned.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.first_error.is_some() || self.panic.is_some() || self.abandoned
    }

    /// Returns true if the range at `index` still has work in it.
    #[inline]
    pub fn has_work(&self, index: usize) -> bool {
        self.ranges[index].remaining > 0
    }

    /// Returns the locality of the range at `index`.
    #[inline]
    pub fn locality(&self, index: usize) -> Option<usize> {
        self.ranges[index].locality
    }

    /// Picks a range with work left and returns its index.
    ///
    /// If `preferred` names a locality, the first range in that locality with
    /// work left is chosen. Otherwise (or if there is no such range) a range is
    /// chosen uniformly at random among those with work left. Large ranges are
    /// not favoured over small ones. Returns `None` if no range has work.
    pub fn pick_range(&mut self, preferred: Option<usize>) -> Option<usize> {
        if self.ranges_with_work_left == 0 {
            return None;
        }

        if let Some(locality) = preferred {
            let local = self
                .ranges
                .iter()
                .position(|range| range.remaining > 0 && range.locality == Some(locality));
            if local.is_some() {
                return local;
            }
        }

        let rng = self.rng.as_mut()?;
        let nth = rng.next_usize(self.ranges_with_work_left);
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, range)| range.remaining > 0)
            .nth(nth)
            .map(|(index, _)| index)
    }

    /// Claims the next chunk from the range at `index`, returning its bounds.
    /// Returns `None` if the range is empty.
    ///
    /// The chunk is at most `chunk_size` steps long. `advance` is called
    /// before any state is changed, so a panicking `advance` leaves the state
    /// consistent.
    pub fn claim<A>(&mut self, index: usize, advance: &A) -> Option<(C, C)>
    where
        A: Fn(&C, usize) -> C,
    {
        let range = &mut self.ranges[index];
        let steps = cmp::min(self.chunk_size, range.remaining);
        if steps == 0 {
            return None;
        }

        let end = advance(&range.start, steps);
        let start = mem::replace(&mut range.start, end.clone());
        range.remaining -= steps;
        self.total_remaining -= steps;
        if range.remaining == 0 {
            self.ranges_with_work_left -= 1;
        }
        self.chunks_claimed += 1;

        Some((start, end))
    }

    /// Records a chunk for which `work` succeeded.
    #[inline]
    pub fn record_success(&mut self, start: C, end: C) {
        if let Some(completed) = &mut self.completed {
            completed.push((start, end));
        }
    }

    /// Records a failed `work` call. The first error wins; later ones are
    /// counted and dropped.
    pub fn record_failure(&mut self, error: E) {
        self.failures += 1;
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    /// Returns the number of steps taken by each claim.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<C, E, R> TaskState<C, E, R> {
    /// Records a panic from a worker loop. Only the first payload is kept.
    pub fn record_panic(&mut self, payload: Box<dyn Any + Send>) {
        if self.panic.is_none() {
            self.panic = Some(payload);
        }
    }

    /// Stops new claims and counts `workers` loops that will never start as
    /// finished.
    pub fn abandon(&mut self, workers: usize) {
        self.abandoned = true;
        self.threads_finished += workers;
    }

    /// Takes the results of the run out of the state.
    ///
    /// The leftover cursors and the random source are dropped here as well.
    /// The state itself may be freed by whichever worker lets go of it last,
    /// after the run has returned, and by then it must not own anything the
    /// run borrowed.
    pub fn take_outcome(&mut self) -> Outcome<C, E> {
        drop(mem::take(&mut self.ranges));
        self.rng = None;
        Outcome {
            first_error: self.first_error.take(),
            failures: self.failures,
            panic: self.panic.take(),
            completed: self.completed.take().unwrap_or_default(),
            chunks_claimed: self.chunks_claimed,
        }
    }
}

// -----------------------------------------------------------------------------
// Shared state

/// The task state together with the signal used to report completion. This
/// lives behind an `Arc`, so that the last worker to finish can signal the
/// coordinator without racing against it being deallocated.
pub(crate) struct Shared<C, E, R> {
    state: Mutex<TaskState<C, E, R>>,
    all_finished: Condvar,
}

impl<C, E, R> Shared<C, E, R> {
    /// Wraps a task state for sharing.
    pub fn new(state: TaskState<C, E, R>) -> Shared<C, E, R> {
        Shared {
            state: Mutex::new(state),
            all_finished: Condvar::new(),
        }
    }

    /// Locks the task state.
    ///
    /// Panics inside worker loops are captured and recorded separately, and a
    /// panic while the lock is held (in `advance`) leaves the state
    /// consistent, so poisoning is ignored.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, TaskState<C, E, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks one worker loop as finished, recording its panic if it had one.
    /// Wakes the coordinator when the last worker finishes.
    pub fn finish(&self, result: std::thread::Result<()>) {
        let mut state = self.lock();
        if let Err(payload) = result {
            state.record_panic(payload);
        }
        state.threads_finished += 1;
        debug_assert!(state.threads_finished <= state.threads_total);
        if state.threads_finished == state.threads_total {
            // Notify while holding the lock. The coordinator cannot observe the
            // final count until this guard is dropped.
            self.all_finished.notify_all();
        }
    }

    /// Gives up on a run whose workers could not all be launched. The `workers`
    /// loops that never started count as finished, and the ones already
    /// running stop at their next claim.
    pub fn abandon(&self, workers: usize) {
        self.lock().abandon(workers);
    }

    /// Blocks until every worker loop has finished, then returns the locked
    /// state.
    pub fn wait(&self) -> MutexGuard<'_, TaskState<C, E, R>> {
        let mut state = self.lock();
        while state.threads_finished < state.threads_total {
            state = self
                .all_finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }
}

// -----------------------------------------------------------------------------
// Worker slots

/// One background worker's share of a run. Consuming the slot with
/// [`WorkerSlot::finish`] reports the worker as finished. A slot dropped
/// without finishing (because an executor discarded the job holding it)
/// reports the worker as finished too, so the run never waits on a job that
/// will not run.
pub(crate) struct WorkerSlot<C, E, R> {
    shared: Arc<Shared<C, E, R>>,
    finished: bool,
}

impl<C, E, R> WorkerSlot<C, E, R> {
    pub fn new(shared: Arc<Shared<C, E, R>>) -> WorkerSlot<C, E, R> {
        WorkerSlot {
            shared,
            finished: false,
        }
    }

    #[inline]
    pub fn shared(&self) -> &Shared<C, E, R> {
        &self.shared
    }

    /// Reports the worker as finished. See [`Shared::finish`].
    pub fn finish(mut self, result: std::thread::Result<()>) {
        self.finished = true;
        self.shared.finish(result);
    }
}

impl<C, E, R> Drop for WorkerSlot<C, E, R> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.finish(Ok(()));
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
