//! Pure functions deciding how many threads a run uses and how many steps each
//! chunk claim takes.

use core::cmp;

/// Chunks are `1 / 2^LOAD_BALANCE_SHIFT` of an even per-thread split, so that
/// each thread claims several chunks over the lifetime of a task. This is what
/// lets fast threads pick up work that slow threads would otherwise hold.
pub const LOAD_BALANCE_SHIFT: u32 = 2;

/// The inputs of the sizing policy that do not depend on the task's size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizingParameters {
    /// The smallest number of steps worth handing to a thread, at least one.
    pub min_chunk_size: usize,
    /// The configured cap on threads for one run.
    pub max_threads: usize,
    /// The parallelism reported by the host runtime.
    pub available_parallelism: usize,
}

impl SizingParameters {
    /// Computes the thread count and chunk size for a task of `total_size`
    /// steps.
    pub fn plan(&self, total_size: usize) -> (usize, usize) {
        let threads = thread_count(
            total_size,
            self.min_chunk_size,
            self.max_threads,
            self.available_parallelism,
        );
        (threads, chunk_size(total_size, self.min_chunk_size, threads))
    }
}

/// Returns the number of threads to use for a task of `total_size` steps: one
/// thread per `min_chunk_size` steps (rounded up), but at least one and no more
/// than both `available_parallelism` and `max_threads`.
pub fn thread_count(
    total_size: usize,
    min_chunk_size: usize,
    max_threads: usize,
    available_parallelism: usize,
) -> usize {
    debug_assert!(min_chunk_size > 0);
    let cap = cmp::max(cmp::min(available_parallelism, max_threads), 1);
    total_size.div_ceil(min_chunk_size).clamp(1, cap)
}

/// Returns the number of steps each chunk claim takes when `threads` threads
/// split a task of `total_size` steps.
///
/// A single thread takes the whole task in one claim. Otherwise the even
/// per-thread split is shrunk by [`LOAD_BALANCE_SHIFT`] and rounded down to a
/// multiple of `min_chunk_size`, but never below `min_chunk_size`.
pub fn chunk_size(total_size: usize, min_chunk_size: usize, threads: usize) -> usize {
    debug_assert!(min_chunk_size > 0);
    if threads <= 1 {
        return total_size;
    }
    let shrunk = (total_size / threads) >> LOAD_BALANCE_SHIFT;
    let rounded = shrunk - shrunk % min_chunk_size;
    cmp::max(min_chunk_size, rounded)
}

// -----------------------------------------------------------------------------
// Tests
