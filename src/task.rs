//! This module defines [`Task`], which bundles the client's iteration contract
//! (`advance` and `work`) with the per-task knobs the scheduler consults.

use core::marker::PhantomData;

// -----------------------------------------------------------------------------
// Allocation policy

/// Controls how the scheduler allocates per-thread bookkeeping for a run.
///
/// Whatever the policy, failing to allocate never fails the task: the run
/// degrades to executing every chunk on the calling thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocPolicy {
    /// Reserve bookkeeping with a fallible allocation, and fall back to a
    /// single thread if it fails.
    #[default]
    TryReserve,
    /// Behave as if the allocation always fails. Useful for exercising the
    /// single-threaded fallback.
    SimulateFailure,
}

// -----------------------------------------------------------------------------
// Task

/// A divisible unit of work, described by two functions over an opaque cursor
/// type `C`:
///
/// + `advance(&start, n)` returns the cursor `n` iteration steps after `start`.
///   It must be pure and restartable; the scheduler calls it while holding its
///   internal lock, so it should also be cheap.
///
/// + `work(start, end)` performs the computation for `[start, end)`. It is
///   called without any scheduler lock held, and is called concurrently from
///   several threads on disjoint ranges.
///
/// An optional `undo(start, end)` function reverts a chunk for which `work`
/// succeeded. When present, a failed task calls it for every chunk that
/// completed successfully before returning the error.
pub struct Task<C, E, A, W, U = fn(C, C)> {
    pub(crate) advance: A,
    pub(crate) work: W,
    pub(crate) undo: Option<U>,
    pub(crate) min_chunk_size: usize,
    pub(crate) max_threads: Option<usize>,
    pub(crate) alloc_policy: AllocPolicy,
    marker: PhantomData<fn(&C) -> (C, E)>,
}

impl<C, E, A, W> Task<C, E, A, W>
where
    A: Fn(&C, usize) -> C + Sync,
    W: Fn(C, C) -> Result<(), E> + Sync,
{
    /// Creates a new task from an `advance` and a `work` function. The minimum
    /// chunk size defaults to one step.
    pub fn new(advance: A, work: W) -> Task<C, E, A, W> {
        Task {
            advance,
            work,
            undo: None,
            min_chunk_size: 1,
            max_threads: None,
            alloc_policy: AllocPolicy::default(),
            marker: PhantomData,
        }
    }
}

impl<C, E, A, W, U> Task<C, E, A, W, U> {
    /// Sets the smallest number of steps worth handing to a thread in one go.
    ///
    /// # Panics
    ///
    /// Panics if `min_chunk_size` is zero.
    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        assert!(min_chunk_size > 0, "minimum chunk size must be at least one");
        self.min_chunk_size = min_chunk_size;
        self
    }

    /// Caps the number of threads used for this task, on top of the cap set by
    /// the scheduler's [`Config`](crate::Config).
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = Some(max_threads);
        self
    }

    /// Overrides how per-thread bookkeeping is allocated.
    pub fn with_alloc_policy(mut self, alloc_policy: AllocPolicy) -> Self {
        self.alloc_policy = alloc_policy;
        self
    }

    /// Registers a function that reverts successfully completed chunks when
    /// the task as a whole fails.
    pub fn with_undo<V>(self, undo: V) -> Task<C, E, A, W, V>
    where
        V: Fn(C, C) + Sync,
    {
        Task {
            advance: self.advance,
            work: self.work,
            undo: Some(undo),
            min_chunk_size: self.min_chunk_size,
            max_threads: self.max_threads,
            alloc_policy: self.alloc_policy,
            marker: PhantomData,
        }
    }

    /// Returns the minimum chunk size.
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }
}

// -----------------------------------------------------------------------------
// Index iteration

/// An `advance` function for tasks that iterate over plain indices.
#[inline]
pub fn advance_index(start: &usize, n: usize) -> usize {
    start + n
}

// -----------------------------------------------------------------------------
// Tests
