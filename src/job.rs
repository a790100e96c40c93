//! This module defines the type-erased jobs that the scheduler hands to an
//! [`Executor`](crate::Executor). Each job runs one worker loop of a task.
//!
//! Jobs close over data borrowed from the caller of
//! [`Scheduler::run`](crate::Scheduler::run), which is only sound because the
//! caller blocks until every job it created has finished. When using a job,
//! one must be extremely careful to ensure that:
//! (a) The job does not outlive anything it closes over.
//! (b) The job remains valid until it is executed.
//! (c) Each job reference is executed at most once.

use alloc::boxed::Box;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

// -----------------------------------------------------------------------------
// Shared JobRef

/// An owning, type-erased handle to a job submitted to an executor.
///
/// Executors that accept a job should eventually run it by calling
/// [`JobRef::execute`]. A job that is dropped instead is discarded without
/// running, and the run that submitted it carries on with fewer threads.
pub struct JobRef {
    /// A non-null pointer to some type-erased data which can be executed as a
    /// job by the `execute_fn`. In practice this is always a `HeapJob`.
    job_pointer: NonNull<()>,
    /// A function pointer that can execute the job stored at `job_pointer`.
    execute_fn: unsafe fn(NonNull<()>),
    /// A function pointer that frees the job stored at `job_pointer` without
    /// executing it.
    discard_fn: unsafe fn(NonNull<()>),
}

impl JobRef {
    /// Creates a new `JobRef` from raw pointers.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `job_pointer` remains valid to pass to
    /// either `execute_fn` or `discard_fn` until one of them is called. What
    /// exactly this means is dependent on the implementation of those
    /// functions.
    #[inline(always)]
    pub(crate) unsafe fn new_raw(
        job_pointer: NonNull<()>,
        execute_fn: unsafe fn(NonNull<()>),
        discard_fn: unsafe fn(NonNull<()>),
    ) -> JobRef {
        JobRef {
            job_pointer,
            execute_fn,
            discard_fn,
        }
    }

    /// Executes the job, consuming the reference.
    #[inline(always)]
    pub fn execute(self) {
        let this = ManuallyDrop::new(self);
        // SAFETY: The constructor of `JobRef` is required to ensure this is
        // valid, and the reference is consumed without running its destructor,
        // so the job is not also discarded.
        unsafe { (this.execute_fn)(this.job_pointer) }
    }
}

impl Drop for JobRef {
    fn drop(&mut self) {
        // SAFETY: The constructor of `JobRef` is required to ensure this is
        // valid, and `execute` never drops the reference.
        unsafe { (self.discard_fn)(self.job_pointer) }
    }
}

// SAFETY: !Send for raw pointers is not for safety, just as a lint. The only
// jobs we create close over `Send` closures.
unsafe impl Send for JobRef {}

// -----------------------------------------------------------------------------
// Heap allocated work function

/// Represents a job stored in the heap.
///
/// This is analogous to the rayon type `HeapJob`.
pub(crate) struct HeapJob<F> {
    f: F,
}

impl<F> HeapJob<F>
where
    F: FnOnce() + Send,
{
    /// Allocates a new `HeapJob` on the heap.
    #[inline(always)]
    pub fn new(f: F) -> Box<Self> {
        Box::new(HeapJob { f })
    }

    /// Converts the heap job into an "owning" `JobRef`. The job will be
    /// automatically dropped when the `JobRef` is executed or dropped.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the `JobRef` has not outlived the data the
    /// closure references. In other words, if the closure references
    /// something, that thing must live until the `JobRef` has been executed or
    /// dropped.
    #[inline(always)]
    pub unsafe fn into_job_ref(self: Box<Self>) -> JobRef {
        // SAFETY: Pointers produced by `Box::into_raw` are never null.
        let job_pointer = unsafe { NonNull::new_unchecked(Box::into_raw(self)).cast() };

        // SAFETY: The pointer was created by a call to `Box::into_raw` so it is
        // valid to pass in to `Self::execute`.
        //
        // Because this function takes ownership of `Self` to produce a
        // `JobRef`, and `JobRef::execute` takes ownership of the `JobRef` to
        // call `Self::execute`, the job_pointer cannot be used after
        // `Self::execute` is called. So it is safe for the pointer to become
        // dangling.
        unsafe { JobRef::new_raw(job_pointer, Self::execute, Self::discard) }
    }

    /// Executes a `Box<HeapJob>`, dropping it when completed.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `this` is a pointer, created by calling
    /// `Box::into_raw` on a `Box<HeapJob>`. After the call `this` must be
    /// treated as dangling.
    #[inline(always)]
    unsafe fn execute(this: NonNull<()>) {
        // SAFETY: The caller ensures `this` was created by `Box::into_raw` and
        // that this is called only once.
        let this = unsafe { Box::from_raw(this.cast::<Self>().as_ptr()) };
        // Run the job.
        (this.f)();
    }

    /// Drops a `Box<HeapJob>` without executing it.
    ///
    /// # Safety
    ///
    /// Same as [`HeapJob::execute`].
    #[inline(always)]
    unsafe fn discard(this: NonNull<()>) {
        // SAFETY: The caller ensures `this` was created by `Box::into_raw` and
        // that this is called only once.
        drop(unsafe { Box::from_raw(this.cast::<Self>().as_ptr()) });
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(all(test, not(feature = "shuttle")))]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicUsize;
    use core::sync::atomic::Ordering;

    struct CountDrops(Arc<AtomicUsize>);

    impl Drop for CountDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job(runs: &Arc<AtomicUsize>, drops: &Arc<AtomicUsize>) -> JobRef {
        let runs = runs.clone();
        let guard = CountDrops(drops.clone());
        let job = HeapJob::new(move || {
            let _guard = guard;
            runs.fetch_add(1, Ordering::SeqCst);
        });
        // SAFETY: The job only closes over owned data.
        unsafe { job.into_job_ref() }
    }

    #[test]
    fn executed_jobs_run_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        job(&runs, &drops).execute();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_jobs_are_discarded() {
        let runs = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        drop(job(&runs, &drops));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
