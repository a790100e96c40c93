//! This module contains a resizable pool of worker threads, usable as an
//! [`Executor`] for the scheduler.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::vec::Vec;
use core::cell::Cell;
use core::cmp;
use core::num::NonZero;
use core::ptr;
use std::sync::PoisonError;

use tracing::debug;
use tracing::trace;
use tracing::trace_span;

use crate::executor::Executor;
use crate::job::JobRef;
use crate::platform::*;

// -----------------------------------------------------------------------------
// Thread pool types

/// A pool of long-lived worker threads that execute submitted jobs in the
/// order they arrive.
///
/// # Creating Thread Pools
///
/// Thread pools must be static and const constructed. To create a new thread
/// pool, just call [`ThreadPool::new`].
///
/// ```
/// use parcel::{Config, Scheduler, ThreadPool};
///
/// // Allocate a new thread pool.
/// static THREAD_POOL: ThreadPool = ThreadPool::new();
///
/// // Give it a few threads.
/// THREAD_POOL.resize_to(3);
///
/// // Run tasks on it.
/// let scheduler = Scheduler::new(Config::new(4)).with_executor(&THREAD_POOL);
/// scheduler
///     .run_indices(0..1000, 10, |_start, _end| -> Result<(), ()> { Ok(()) })
///     .unwrap();
///
/// // Halt all the threads in the pool.
/// THREAD_POOL.depopulate();
/// ```
///
/// # Resizing Thread Pools
///
/// Thread pools are dynamically sized; When your program starts they have size
/// zero (meaning no threads are running), and you will have to add threads by
/// resizing it. A pool with no threads rejects every job, which makes the
/// scheduler run everything on the calling thread. The simplest way to resize
/// a pool is via [`ThreadPool::resize_to_available`] which will simply fill all
/// the available space. More granular control is possible through other
/// methods such as [`ThreadPool::grow`], [`ThreadPool::shrink`], or
/// [`ThreadPool::resize_to`].
///
/// Resizing must not be done from one of the pool's own threads.
pub struct ThreadPool {
    state: Mutex<ThreadPoolState>,
    job_is_ready: Condvar,
}

struct ThreadPoolState {
    /// Jobs waiting for a worker, oldest first.
    shared_jobs: VecDeque<JobRef>,
    /// Thread controls for workers spawned by the pool.
    workers: Vec<ManagedWorker>,
}

/// Represents a worker thread that is managed by the pool.
struct ManagedWorker {
    /// The index of this worker, used for naming and tracing.
    index: usize,
    /// Controls used to manage the lifecycle of the worker.
    control: ThreadControl,
}

/// Used to manage the lifecycle of a thread.
struct ThreadControl {
    /// Tells the thread to shut down once the job queue is empty, when set to
    /// true.
    halt: Arc<AtomicBool>,
    /// The handle used to wait for the thread to complete.
    handle: JoinHandle<()>,
}

// -----------------------------------------------------------------------------
// Worker thread data

thread_local! {
    /// The id of the pool the current thread works for, or zero.
    static CURRENT_POOL: Cell<usize> = Cell::new(0);
}

// -----------------------------------------------------------------------------
// Thread pool creation and maintenance

#[allow(clippy::new_without_default)]
impl ThreadPool {
    /// Creates a new thread pool.
    #[cfg(not(feature = "shuttle"))]
    pub const fn new() -> ThreadPool {
        ThreadPool {
            state: Mutex::new(ThreadPoolState {
                shared_jobs: VecDeque::new(),
                workers: Vec::new(),
            }),
            job_is_ready: Condvar::new(),
        }
    }

    /// Non-const constructor variant for shuttle.
    #[cfg(feature = "shuttle")]
    pub fn new() -> ThreadPool {
        ThreadPool {
            state: Mutex::new(ThreadPoolState {
                shared_jobs: VecDeque::new(),
                workers: Vec::new(),
            }),
            job_is_ready: Condvar::new(),
        }
    }

    #[inline]
    fn lock_state(&self) -> MutexGuard<'_, ThreadPoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of worker threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.lock_state().workers.len()
    }

    /// Resizes the thread pool to fill all available space, leaving room for
    /// the calling thread. After this returns, the pool will have at least one
    /// worker thread. Returns the new size of the pool.
    ///
    /// See [`ThreadPool::resize`] for more information about resizing.
    pub fn resize_to_available(&'static self) -> usize {
        let available = available_parallelism().map(NonZero::get).unwrap_or(1);
        self.resize_to(cmp::max(available.saturating_sub(1), 1))
    }

    /// Resizes the pool to the specified number of threads. Returns the new
    /// size of the thread pool, which may be smaller than requested.
    ///
    /// See [`ThreadPool::resize`] for more information about resizing.
    pub fn resize_to(&'static self, new_size: usize) -> usize {
        self.resize(|_| new_size)
    }

    /// Adds the given number of threads to the thread pool. Returns the new
    /// size of the pool, which may be smaller than requested.
    ///
    /// See [`ThreadPool::resize`] for more information about resizing.
    pub fn grow(&'static self, added_threads: usize) -> usize {
        self.resize(|current_size| current_size + added_threads)
    }

    /// Removes the given number of thread from the thread pool. Returns the new
    /// size of the pool.
    ///
    /// See [`ThreadPool::resize`] for more information about resizing.
    pub fn shrink(&'static self, terminated_threads: usize) -> usize {
        self.resize(|current_size| current_size.saturating_sub(terminated_threads))
    }

    /// Ensures that there is at least one worker thread attached to the thread
    /// pool. Returns the new size of the pool, which will be either the old
    /// size or one.
    ///
    /// See [`ThreadPool::resize`] for more information about resizing.
    pub fn populate(&'static self) -> usize {
        self.resize(
            |current_size| {
                if current_size == 0 { 1 } else { current_size }
            },
        )
    }

    /// Removes all worker threads from the thread pool. Jobs already queued
    /// are executed before the threads exit.
    ///
    /// See [`ThreadPool::resize`] for more information about resizing.
    pub fn depopulate(&'static self) -> usize {
        self.resize_to(0)
    }

    /// Resizes the pool, and returns the new size.
    ///
    /// Note that the new size may be different from the size requested: if a
    /// thread fails to spawn, the pool stops growing. When shrinking, this
    /// blocks until the removed threads have drained the job queue and exited.
    #[cold]
    pub fn resize<F>(&'static self, get_size: F) -> usize
    where
        F: Fn(usize) -> usize,
    {
        debug!("starting threadpool resize");

        // Resizing a pool is a critical section; only one thread can resize the
        // pool at a time. This is implemented using the mutex on the state.
        trace!("locking state");
        let mut state = self.lock_state();

        // Compute the new size of the pool, given the current size.
        let current_size = state.workers.len();
        let mut new_size = get_size(current_size);

        trace!(
            "attempting to resize thread pool from {} to {} thread(s)",
            current_size, new_size
        );

        match new_size.cmp(&current_size) {
            // The size remained the same
            cmp::Ordering::Equal => {
                debug!("completed threadpool resize, size unchanged");
                return current_size;
            }
            // The size increased
            cmp::Ordering::Greater => {
                for index in current_size..new_size {
                    debug!("spawning managed worker with index {}", index);
                    let halt = Arc::new(AtomicBool::new(false));
                    let worker_halt = halt.clone();
                    let spawned = ThreadBuilder::new()
                        .name(format!("parcel pool worker {index}"))
                        .spawn(move || {
                            managed_worker(self, index, worker_halt);
                        });
                    match spawned {
                        Ok(handle) => {
                            let control = ThreadControl { halt, handle };
                            state.workers.push(ManagedWorker { index, control });
                        }
                        Err(error) => {
                            // Scale back the new size to what we can actually spawn.
                            debug!("failed to spawn managed worker {}: {}", index, error);
                            new_size = index;
                            break;
                        }
                    }
                }
            }
            // The size decreased
            cmp::Ordering::Less => {
                // Pull the workers we intend to halt out of the pool.
                let terminating_workers = state.workers.split_off(new_size);

                // Tell the workers to halt. They only check the flag under the
                // state lock, so none of them can miss it.
                for worker in &terminating_workers {
                    worker.control.halt.store(true, Ordering::Relaxed);
                }

                // Wake any sleeping workers to ensure they will eventually see the termination notice.
                self.job_is_ready.notify_all();

                // Let the workers drain the queue.
                drop(state);

                // Wait for the workers to fully halt.
                for worker in terminating_workers {
                    trace!("joining managed worker {}", worker.index);
                    let _ = worker.control.handle.join();
                }
            }
        }

        debug!("completed thread pool resize");

        // Return the new size of the threadpool
        new_size
    }

    /// Returns an opaque identifier for this thread pool.
    #[inline(always)]
    pub fn id(&self) -> usize {
        // We can rely on `self` not to change since it's a static ref.
        ptr::from_ref(self) as usize
    }

    /// Returns true if the calling thread is one of this pool's workers.
    #[inline]
    fn is_current(&self) -> bool {
        CURRENT_POOL.with(Cell::get) == self.id()
    }
}

// -----------------------------------------------------------------------------
// Executor implementation

impl Executor for ThreadPool {
    /// The pool's threads, plus the calling thread.
    fn available_parallelism(&self) -> usize {
        self.num_threads() + 1
    }

    /// Queues the job for the pool's workers. Jobs are rejected when the pool
    /// has no threads, and when submitted from one of the pool's own threads
    /// (which could otherwise deadlock, with every worker blocked waiting on
    /// jobs queued behind it).
    fn submit(&self, job: JobRef) -> Result<(), JobRef> {
        if self.is_current() {
            return Err(job);
        }

        let mut state = self.lock_state();
        if state.workers.is_empty() {
            return Err(job);
        }
        state.shared_jobs.push_back(job);
        self.job_is_ready.notify_one();
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Main worker loop

/// This is the main loop for a worker thread. It executes queued jobs in
/// order, and sleeps while the queue is empty. It exits once it has been told
/// to halt and the queue is empty, so that every accepted job is executed.
fn managed_worker(thread_pool: &'static ThreadPool, index: usize, halt: Arc<AtomicBool>) {
    let span = trace_span!("pool_worker", index);
    let _enter = span.enter();

    trace!("starting managed worker");

    CURRENT_POOL.with(|pool| pool.set(thread_pool.id()));

    let mut state = thread_pool.lock_state();
    loop {
        if let Some(job) = state.shared_jobs.pop_front() {
            drop(state);
            job.execute();
            state = thread_pool.lock_state();
            continue;
        }

        if halt.load(Ordering::Relaxed) {
            break;
        }

        state = thread_pool
            .job_is_ready
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
    drop(state);

    CURRENT_POOL.with(|pool| pool.set(0));

    trace!("exiting managed worker");
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(all(test, not(feature = "shuttle")))]
mod tests {
    use super::*;
    use crate::job::HeapJob;
    use core::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn counting_job(counter: &'static AtomicUsize) -> JobRef {
        let job = HeapJob::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // SAFETY: The job only closes over static data.
        unsafe { job.into_job_ref() }
    }

    #[test]
    fn resize() {
        static THREAD_POOL: ThreadPool = ThreadPool::new();
        assert_eq!(THREAD_POOL.num_threads(), 0);
        assert_eq!(THREAD_POOL.resize_to(3), 3);
        assert_eq!(THREAD_POOL.grow(2), 5);
        assert_eq!(THREAD_POOL.shrink(4), 1);
        assert_eq!(THREAD_POOL.populate(), 1);
        assert_eq!(THREAD_POOL.available_parallelism(), 2);
        assert_eq!(THREAD_POOL.depopulate(), 0);
        assert_eq!(THREAD_POOL.shrink(1), 0);
    }

    #[test]
    fn empty_pool_rejects_jobs() {
        static THREAD_POOL: ThreadPool = ThreadPool::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let job = THREAD_POOL.submit(counting_job(&COUNTER)).unwrap_err();
        job.execute();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn depopulate_drains_queue() {
        static THREAD_POOL: ThreadPool = ThreadPool::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        THREAD_POOL.resize_to(2);
        for _ in 0..100 {
            assert!(THREAD_POOL.submit(counting_job(&COUNTER)).is_ok());
        }
        THREAD_POOL.depopulate();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn workers_reject_own_pool() {
        static THREAD_POOL: ThreadPool = ThreadPool::new();
        THREAD_POOL.resize_to(1);
        let (sender, receiver) = mpsc::channel();
        let job = HeapJob::new(move || {
            static NESTED: AtomicUsize = AtomicUsize::new(0);
            let rejected = THREAD_POOL.submit(counting_job(&NESTED));
            let was_rejected = match rejected {
                Ok(()) => false,
                Err(job) => {
                    job.execute();
                    true
                }
            };
            sender.send(was_rejected).unwrap();
        });
        // SAFETY: The job only closes over owned and static data.
        let job = unsafe { job.into_job_ref() };
        assert!(THREAD_POOL.submit(job).is_ok());
        assert!(receiver.recv().unwrap());
        THREAD_POOL.depopulate();
    }
}
