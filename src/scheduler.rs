//! This module contains the [`Scheduler`], the entry point for running tasks.

use alloc::vec::Vec;
use core::mem;
use core::ops::Range;
use core::ptr::NonNull;

use tracing::debug;
use tracing::trace;

use crate::config::Config;
use crate::executor::Executor;
use crate::executor::ThreadSpawner;
use crate::job::HeapJob;
use crate::locality::LocalityHint;
use crate::locality::NoHint;
use crate::platform::*;
use crate::range::WorkRange;
use crate::sizing;
use crate::sizing::SizingParameters;
use crate::state::Shared;
use crate::state::TaskState;
use crate::state::WorkerSlot;
use crate::task::AllocPolicy;
use crate::task::Task;
use crate::task::advance_index;
use crate::unwind;
use crate::util::RandomSource;
use crate::util::XorShift64Star;
use crate::worker::Seed;
use crate::worker::worker_loop;

// -----------------------------------------------------------------------------
// Scheduler

/// Runs tasks by splitting them into chunks and spreading the chunks across
/// several threads.
///
/// A scheduler owns the process-wide [`Config`], the [`Executor`] used to
/// start background workers (by default, a [`ThreadSpawner`]), the
/// [`LocalityHint`] used to move workers between localities (by default,
/// [`NoHint`]) and the [`RandomSource`] used to pick ranges when rebalancing.
///
/// The calling thread always takes part in a run as one of the workers, so a
/// run with a thread count of `n` only asks the executor for `n - 1` threads.
///
/// ```
/// use parcel::{Config, Scheduler, ThreadSpawner};
///
/// let mut data = vec![0u32; 10_000];
/// let scheduler = Scheduler::new(Config::new(4))
///     .with_executor(ThreadSpawner::with_parallelism(4));
///
/// // Each chunk of indices gets written by exactly one thread.
/// let base = data.as_mut_ptr() as usize;
/// scheduler
///     .run_indices(0..data.len(), 256, |start, end| -> Result<(), ()> {
///         for i in start..end {
///             // SAFETY: Chunks are disjoint, and `data` outlives the run.
///             unsafe { *(base as *mut u32).add(i) = i as u32 };
///         }
///         Ok(())
///     })
///     .unwrap();
///
/// assert!(data.iter().enumerate().all(|(i, &x)| x == i as u32));
/// ```
pub struct Scheduler<X = ThreadSpawner, H = NoHint, R = XorShift64Star> {
    config: Config,
    executor: X,
    hint: H,
    rng: R,
}

impl Scheduler {
    /// Creates a scheduler with the given config, spawning a thread per
    /// background worker and ignoring localities.
    pub fn new(config: Config) -> Scheduler {
        let rng = match config.seed {
            Some(seed) => XorShift64Star::from_seed(seed),
            None => XorShift64Star::new(),
        };
        Scheduler {
            config,
            executor: ThreadSpawner::new(),
            hint: NoHint,
            rng,
        }
    }
}

impl<X, H, R> Scheduler<X, H, R> {
    /// Replaces the executor used to run background workers.
    pub fn with_executor<Y>(self, executor: Y) -> Scheduler<Y, H, R>
    where
        Y: Executor,
    {
        Scheduler {
            config: self.config,
            executor,
            hint: self.hint,
            rng: self.rng,
        }
    }

    /// Replaces the locality hint used when workers switch localities.
    pub fn with_locality_hint<I>(self, hint: I) -> Scheduler<X, I, R>
    where
        I: LocalityHint,
    {
        Scheduler {
            config: self.config,
            executor: self.executor,
            hint,
            rng: self.rng,
        }
    }

    /// Replaces the random source used to pick ranges when rebalancing. Each
    /// run starts from a fresh clone of `rng`.
    pub fn with_random_source<S>(self, rng: S) -> Scheduler<X, H, S>
    where
        S: RandomSource + Clone,
    {
        Scheduler {
            config: self.config,
            executor: self.executor,
            hint: self.hint,
            rng,
        }
    }

    /// Returns the scheduler's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the scheduler's executor.
    pub fn executor(&self) -> &X {
        &self.executor
    }
}

// -----------------------------------------------------------------------------
// Running tasks

/// The borrowed parts of a run that background workers need. Workers reach
/// it through a raw pointer, see [`Scheduler::run`].
struct Borrowed<'a, T, H> {
    task: &'a T,
    hint: &'a H,
}

/// A type-erased pointer to a [`Borrowed`] that can be moved into a job.
struct BorrowedPtr(NonNull<()>);

// SAFETY: The pointee only holds shared references to `Sync` data (the task
// and hint bounds in `Scheduler::run` require it), so it may be read from any
// thread.
unsafe impl Send for BorrowedPtr {}

impl BorrowedPtr {
    /// # Safety
    ///
    /// The pointer must have been created from a `Borrowed<'_, T, H>` that is
    /// still alive, and stays alive for as long as the returned reference is
    /// used.
    unsafe fn get<'a, T, H>(&self) -> &'a Borrowed<'a, T, H> {
        // SAFETY: Guaranteed by the caller.
        unsafe { self.0.cast::<Borrowed<'a, T, H>>().as_ref() }
    }
}

/// Waits for the background workers of a run if launching them unwinds (for
/// example because [`Executor::submit`] panicked), so that no worker outlives
/// the data borrowed by the run.
struct LaunchGuard<'s, C, E, R> {
    shared: &'s Shared<C, E, R>,
    /// Worker loops that have not been handed to a job yet, including the one
    /// the calling thread would run.
    unlaunched: usize,
}

impl<C, E, R> Drop for LaunchGuard<'_, C, E, R> {
    fn drop(&mut self) {
        debug!("launching workers unwound, waiting for launched workers");
        self.shared.abandon(self.unlaunched);
        let outcome = self.shared.wait().take_outcome();
        drop(outcome);
    }
}

impl<X, H, R> Scheduler<X, H, R>
where
    X: Executor,
    H: LocalityHint,
    R: RandomSource + Clone,
{
    /// Runs `task` over every range in `ranges`, in parallel, and blocks until
    /// it completes.
    ///
    /// Every step of every range is handed to the task's `work` function
    /// exactly once, as part of some `[start, end)` chunk, unless the task
    /// fails first. No ordering between chunks is guaranteed.
    ///
    /// Returns the first error returned by `work`. After the first error no
    /// new chunks are started, but chunks already running on other threads
    /// finish. If the task has an undo function, every chunk that succeeded is
    /// then undone on the calling thread before the error is returned.
    ///
    /// Ranges that sum to zero steps complete immediately without calling
    /// `work`. If the threads for a run cannot be set up, the run silently
    /// falls back to the calling thread alone.
    ///
    /// # Panics
    ///
    /// If `work`, `advance` or `undo` panics, the panic is propagated to the
    /// caller once every worker has stopped. A panic from the executor while
    /// workers are being launched is propagated the same way, after the
    /// workers it already accepted have stopped. Also panics if a range has a
    /// locality outside of the range reported by the locality hint.
    pub fn run<C, E, A, W, U>(
        &self,
        ranges: impl IntoIterator<Item = WorkRange<C>>,
        task: &Task<C, E, A, W, U>,
    ) -> Result<(), E>
    where
        C: Clone + Send,
        E: Send,
        A: Fn(&C, usize) -> C + Sync,
        W: Fn(C, C) -> Result<(), E> + Sync,
        U: Fn(C, C) + Sync,
    {
        let ranges: Vec<WorkRange<C>> = ranges.into_iter().collect();

        if let Some(count) = self.hint.locality_count() {
            for range in &ranges {
                if let Some(locality) = range.locality {
                    assert!(
                        locality < count,
                        "range locality {locality} is out of bounds, there are only {count} localities"
                    );
                }
            }
        }

        // Nothing to do; don't bother anybody.
        let total_size: usize = ranges.iter().map(|range| range.size).sum();
        if total_size == 0 {
            trace!("skipping empty task");
            return Ok(());
        }

        // Size the run.
        let max_threads = match task.max_threads {
            Some(max_threads) => self.config.max_threads.min(max_threads),
            None => self.config.max_threads,
        };
        let params = SizingParameters {
            min_chunk_size: task.min_chunk_size,
            max_threads,
            available_parallelism: self.executor.available_parallelism(),
        };
        let (mut threads, mut chunk_size) = params.plan(total_size);

        // Seed each worker with a home locality, round-robin over the ranges.
        // The calling thread's seed lives on the stack. If we can't get room
        // for the others, run on this thread alone.
        let caller = Seed {
            index: 0,
            home: ranges[0].locality,
        };
        let mut helpers: Vec<Seed> = Vec::new();
        let reserved = match task.alloc_policy {
            AllocPolicy::TryReserve => helpers.try_reserve_exact(threads - 1).is_ok(),
            AllocPolicy::SimulateFailure => false,
        };
        if reserved {
            helpers.extend((1..threads).map(|index| Seed {
                index,
                home: ranges[index % ranges.len()].locality,
            }));
        } else {
            debug!("failed to allocate worker bookkeeping, running single threaded");
            threads = 1;
            chunk_size = sizing::chunk_size(total_size, task.min_chunk_size, 1);
        }

        debug!(
            "running task of {} steps over {} ranges with {} thread(s) and chunk size {}",
            total_size,
            ranges.len(),
            threads,
            chunk_size
        );

        let state = TaskState::new(
            ranges,
            chunk_size,
            threads,
            self.rng.clone(),
            task.undo.is_some(),
        );
        let shared = Arc::new(Shared::new(state));

        let borrowed = Borrowed {
            task,
            hint: &self.hint,
        };

        // Launch the background workers.
        let mut guard = LaunchGuard {
            shared: &shared,
            unlaunched: threads,
        };
        for &seed in &helpers {
            let slot = WorkerSlot::new(shared.clone());
            let borrowed_ptr = BorrowedPtr(NonNull::from(&borrowed).cast());
            let job = HeapJob::new(move || {
                let result = unwind::halt_unwinding(|| {
                    // SAFETY: `borrowed` lives on the stack of `run`, which does
                    // not return or unwind past it until this worker has been
                    // reported as finished through `slot`. The reference does
                    // not escape this closure, and `worker_loop` returns before
                    // `slot` is finished below.
                    let borrowed = unsafe { borrowed_ptr.get::<Task<C, E, A, W, U>, H>() };
                    worker_loop(slot.shared(), borrowed.task, borrowed.hint, seed);
                });
                slot.finish(result);
            });

            // SAFETY: The job closes over a slot (reference counted) and a
            // pointer to `borrowed`. `run` blocks until every slot has been
            // finished, either by the job running or by the job being dropped,
            // and `guard` blocks the same way if this loop unwinds. So
            // `borrowed` outlives every use of the pointer.
            let job_ref = unsafe { job.into_job_ref() };
            guard.unlaunched -= 1;
            if let Err(job_ref) = self.executor.submit(job_ref) {
                debug!("executor rejected worker {}, running it inline", seed.index);
                job_ref.execute();
            }
        }
        mem::forget(guard);

        // Take part in the run from this thread.
        let result = unwind::halt_unwinding(|| {
            worker_loop(&shared, borrowed.task, borrowed.hint, caller);
        });
        shared.finish(result);

        // Wait for the background workers to come home.
        let outcome = shared.wait().take_outcome();

        debug!(
            "task finished after {} chunk(s) with {} failure(s)",
            outcome.chunks_claimed, outcome.failures
        );

        if let Some(payload) = outcome.panic {
            unwind::resume_unwinding(payload);
        }

        match outcome.first_error {
            None => Ok(()),
            Some(error) => {
                if let Some(undo) = &task.undo {
                    debug!("undoing {} completed chunk(s)", outcome.completed.len());
                    for (start, end) in outcome.completed {
                        undo(start, end);
                    }
                }
                Err(error)
            }
        }
    }

    /// Runs `task` over a single range. See [`Scheduler::run`].
    pub fn run_single<C, E, A, W, U>(
        &self,
        range: WorkRange<C>,
        task: &Task<C, E, A, W, U>,
    ) -> Result<(), E>
    where
        C: Clone + Send,
        E: Send,
        A: Fn(&C, usize) -> C + Sync,
        W: Fn(C, C) -> Result<(), E> + Sync,
        U: Fn(C, C) + Sync,
    {
        self.run([range], task)
    }

    /// Runs `work` over a range of indices, in chunks of at least
    /// `min_chunk_size` indices. See [`Scheduler::run`].
    pub fn run_indices<E, W>(&self, indices: Range<usize>, min_chunk_size: usize, work: W) -> Result<(), E>
    where
        E: Send,
        W: Fn(usize, usize) -> Result<(), E> + Sync,
    {
        let size = indices.end.saturating_sub(indices.start);
        let task = Task::new(advance_index, work).with_min_chunk_size(min_chunk_size);
        self.run_single(WorkRange::new(indices.start, size), &task)
    }
}
