//! Tests using the Shuttle testing framework.

#![cfg(feature = "shuttle")]

use parcel::*;
use shuttle::sync::Mutex;
use shuttle::sync::atomic::AtomicUsize;
use shuttle::sync::atomic::Ordering;

// -----------------------------------------------------------------------------
// Infrastructure

/// Number of random schedules to explore per test.
const ITERATIONS: usize = 1_000;

/// A scheduler that never asks the OS anything, since shuttle can't answer.
fn scheduler(threads: usize) -> Scheduler {
    Scheduler::new(Config::new(threads).with_seed(7))
        .with_executor(ThreadSpawner::with_parallelism(threads))
}

/// Provides access to a thread pool which can be treated as static for the
/// purposes of testing.
fn with_thread_pool<F>(f: F)
where
    F: Fn(&'static ThreadPool) + 'static,
{
    let thread_pool = Box::new(ThreadPool::new());
    let ptr = Box::into_raw(thread_pool);

    // SAFETY: The pointer comes from `Box::into_raw` and is only freed below,
    // after `f` has returned. Every test shrinks the pool back to zero, which
    // joins all of the pool's threads before `f` returns.
    unsafe {
        let thread_pool = &*ptr;
        f(thread_pool);
    };

    // SAFETY: Nothing refers to the pool anymore, see above.
    let thread_pool = unsafe { Box::from_raw(ptr) };
    drop(thread_pool);
}

// -----------------------------------------------------------------------------
// Partitioning

/// Every step is handed to exactly one `work` call, whatever the interleaving.
#[test]
pub fn chunks_partition_ranges() {
    fn run() {
        let seen = Mutex::new(vec![0u8; 40]);
        let task = Task::new(advance_index, |start, end| -> Result<(), ()> {
            let mut seen = seen.lock().unwrap();
            for step in &mut seen[start..end] {
                *step += 1;
            }
            Ok(())
        })
        .with_min_chunk_size(2);

        let ranges = [
            WorkRange::new(0, 16),
            WorkRange::new(16, 0),
            WorkRange::new(16, 24),
        ];
        scheduler(3).run(ranges, &task).unwrap();

        assert!(seen.lock().unwrap().iter().all(|&count| count == 1));
    }

    shuttle::check_random(run, ITERATIONS);
}

// -----------------------------------------------------------------------------
// Errors

/// The first error stops new claims, and the run still waits for every
/// worker before returning.
#[test]
pub fn failure_poisons_task() {
    fn run() {
        let calls = AtomicUsize::new(0);
        let running = AtomicUsize::new(0);
        let task = Task::new(advance_index, |start, _| -> Result<(), usize> {
            calls.fetch_add(1, Ordering::SeqCst);
            running.fetch_add(1, Ordering::SeqCst);
            shuttle::thread::yield_now();
            running.fetch_sub(1, Ordering::SeqCst);
            Err(start)
        })
        .with_min_chunk_size(4);

        let result = scheduler(3).run_single(WorkRange::new(0, 64), &task);
        assert!(result.is_err());
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(calls.load(Ordering::SeqCst) <= 3);
    }

    shuttle::check_random(run, ITERATIONS);
}

/// Chunks that succeeded are undone exactly once when the task fails.
#[test]
pub fn undo_after_failure() {
    fn run() {
        let applied = AtomicUsize::new(0);
        let task = Task::new(advance_index, |start, end| -> Result<(), ()> {
            if start == 0 {
                return Err(());
            }
            applied.fetch_add(end - start, Ordering::SeqCst);
            Ok(())
        })
        .with_min_chunk_size(4)
        .with_undo(|start, end| {
            applied.fetch_sub(end - start, Ordering::SeqCst);
        });

        let result = scheduler(3).run_single(WorkRange::new(0, 48), &task);
        assert_eq!(result, Err(()));
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    shuttle::check_pct(run, ITERATIONS, 3);
}

// -----------------------------------------------------------------------------
// Pool resizing

/// Spins a thread pool up, then back down.
#[test]
pub fn thread_pool_resize() {
    fn resize(thread_pool: &'static ThreadPool) {
        thread_pool.resize_to(3);
        thread_pool.resize_to(0);
    }

    shuttle::check_pct(|| with_thread_pool(resize), ITERATIONS, 3);
}

/// Runs a task on a pool, then shuts the pool down.
#[test]
pub fn thread_pool_run() {
    fn run(thread_pool: &'static ThreadPool) {
        thread_pool.resize_to(2);

        let total = AtomicUsize::new(0);
        let scheduler = Scheduler::new(Config::new(3).with_seed(7)).with_executor(thread_pool);
        scheduler
            .run_indices(0..32, 4, |start, end| -> Result<(), ()> {
                total.fetch_add(end - start, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 32);

        thread_pool.depopulate();
    }

    shuttle::check_random(|| with_thread_pool(run), ITERATIONS);
}
