//! The host runtime interface. The scheduler never creates threads on its own;
//! it asks an [`Executor`] to run worker loops in the background.

use alloc::string::ToString;
use core::num::NonZero;
use std::sync::PoisonError;

use tracing::debug;

use crate::job::JobRef;
use crate::platform::*;

// -----------------------------------------------------------------------------
// Executor

/// Something that can run jobs in parallel with the calling thread.
///
/// Parcel only needs two things from its environment: a way to hand a job to
/// another thread, and an estimate of how many threads can usefully run at
/// once. Executors must provide true parallelism, not just interleaving, for
/// the work to actually speed up, but correctness never depends on it.
pub trait Executor: Sync {
    /// The number of threads that can run at once, counting the calling
    /// thread. Should be at least one.
    fn available_parallelism(&self) -> usize;

    /// Submits a job for background execution.
    ///
    /// An executor that accepts a job (returns `Ok`) must execute it exactly
    /// once, eventually. If the executor cannot run the job it must hand it
    /// back as `Err`, and the caller will execute it instead.
    fn submit(&self, job: JobRef) -> Result<(), JobRef>;
}

impl<E> Executor for &E
where
    E: Executor + ?Sized,
{
    fn available_parallelism(&self) -> usize {
        (**self).available_parallelism()
    }

    fn submit(&self, job: JobRef) -> Result<(), JobRef> {
        (**self).submit(job)
    }
}

// -----------------------------------------------------------------------------
// Thread spawner

/// An executor that spawns a fresh OS thread for every job. This is the
/// default executor, and needs no setup. For workloads that run many small
/// tasks, a [`ThreadPool`](crate::ThreadPool) avoids paying for thread
/// creation on every run.
#[derive(Clone, Copy, Debug)]
pub struct ThreadSpawner {
    /// A fixed parallelism, or `None` to ask the OS.
    parallelism: Option<usize>,
}

impl ThreadSpawner {
    /// Creates a spawner that reports the parallelism of the machine.
    pub const fn new() -> ThreadSpawner {
        ThreadSpawner { parallelism: None }
    }

    /// Creates a spawner that reports a fixed parallelism.
    pub fn with_parallelism(parallelism: usize) -> ThreadSpawner {
        ThreadSpawner {
            parallelism: Some(parallelism.max(1)),
        }
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadSpawner {
    fn available_parallelism(&self) -> usize {
        match self.parallelism {
            Some(parallelism) => parallelism,
            None => available_parallelism().map(NonZero::get).unwrap_or(1),
        }
    }

    fn submit(&self, job: JobRef) -> Result<(), JobRef> {
        // The job is parked in a shared slot so that we can get it back if the
        // thread fails to spawn, since `spawn` drops its closure on failure.
        let slot = Arc::new(Mutex::new(Some(job)));
        let thread_slot = slot.clone();

        let spawned = ThreadBuilder::new()
            .name("parcel worker".to_string())
            .spawn(move || {
                let job = thread_slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(job) = job {
                    job.execute();
                }
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(error) => {
                debug!("failed to spawn worker thread: {}", error);
                match slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    Some(job) => Err(job),
                    None => Ok(()),
                }
            }
        }
    }
}
