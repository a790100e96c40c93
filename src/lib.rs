//! A scheduler for splitting large divisible tasks across threads.
//!
//! Parcel takes a big, CPU-bound unit of work ("touch every element in this
//! range") together with two client functions: one that advances a cursor
//! through the client's data, and one that does the actual work on a
//! `[start, end)` chunk. It then runs that work on several threads at once.
//!
//! The task is described as one or more [`WorkRange`]s, each optionally tagged
//! with a locality id (for example a NUMA node). Workers repeatedly claim
//! fixed-size chunks from a shared task state under a single lock, release the
//! lock while calling `work`, and come back for more. Chunks are deliberately
//! smaller than an even split of the task, so fast threads end up claiming
//! more chunks than slow threads. When a worker's range runs dry it moves to
//! another range chosen uniformly at random, which is how load spreads
//! between localities.
//!
//! The first failing chunk poisons the task: chunks already running finish,
//! but nothing new is claimed, and the first error is returned to the caller.
//!
//! ```
//! use parcel::{Config, Scheduler, Task, WorkRange};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! let sum = AtomicU64::new(0);
//! let scheduler = Scheduler::new(Config::default().with_max_threads(4));
//! let task = Task::new(
//!     |start: &u64, n| start + n as u64,
//!     |start: u64, end: u64| -> Result<(), ()> {
//!         sum.fetch_add((start..end).sum(), Ordering::Relaxed);
//!         Ok(())
//!     },
//! )
//! .with_min_chunk_size(64);
//!
//! scheduler.run_single(WorkRange::new(0, 1000), &task).unwrap();
//! assert_eq!(sum.load(Ordering::Relaxed), (0..1000).sum());
//! ```
//!
//! # Acknowledgments
//!
//! The thread pool and job plumbing are simplified descendants of the ones in
//! `forte` (and through it, `rayon_core`).

#![no_std]
#![cfg_attr(feature = "shuttle", allow(dead_code))]
#![cfg_attr(feature = "shuttle", allow(unused_imports))]

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod config;
mod executor;
mod job;
mod locality;
mod range;
mod scheduler;
mod sizing;
mod state;
mod task;
mod thread_pool;
mod unwind;
mod util;
mod worker;

// -----------------------------------------------------------------------------
// Top-level exports

pub use config::Config;
pub use executor::Executor;
pub use executor::ThreadSpawner;
pub use job::JobRef;
pub use locality::LocalityHint;
pub use locality::NoHint;
pub use range::WorkRange;
pub use scheduler::Scheduler;
pub use sizing::LOAD_BALANCE_SHIFT;
pub use sizing::SizingParameters;
pub use sizing::chunk_size;
pub use sizing::thread_count;
pub use task::AllocPolicy;
pub use task::Task;
pub use task::advance_index;
pub use thread_pool::ThreadPool;
pub use util::RandomSource;
pub use util::XorShift64Star;

// -----------------------------------------------------------------------------
// Platform Support

// This crate uses `shuttle` for testing, which requires mocking all of the core
// threading primitives (`Mutex` and the like).
//
// To make things a bit simpler, we re-export all the important types in the
// `platform` module.

#[cfg(not(feature = "shuttle"))]
mod platform {

    // Core exports

    pub use alloc::sync::Arc;
    pub use core::sync::atomic::AtomicBool;
    pub use core::sync::atomic::Ordering;
    pub use std::sync::Condvar;
    pub use std::sync::Mutex;
    pub use std::sync::MutexGuard;
    pub use std::thread::Builder as ThreadBuilder;
    pub use std::thread::JoinHandle;
    pub use std::thread::available_parallelism;
    pub use std::thread_local;
}

#[cfg(feature = "shuttle")]
mod platform {

    // Core exports

    pub use shuttle::sync::Arc;
    pub use shuttle::sync::Condvar;
    pub use shuttle::sync::Mutex;
    pub use shuttle::sync::MutexGuard;
    pub use shuttle::sync::atomic::AtomicBool;
    pub use shuttle::sync::atomic::Ordering;
    pub use shuttle::thread::Builder as ThreadBuilder;
    pub use shuttle::thread::JoinHandle;
    pub use shuttle::thread_local;

    // Available parallelism

    pub fn available_parallelism() -> std::io::Result<core::num::NonZero<usize>> {
        panic!("available_parallelism does not work on shuttle");
    }
}
