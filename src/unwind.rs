//! Panic capture for worker loops, after the helpers of the same name in rayon.

use alloc::boxed::Box;
use core::any::Any;
use core::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::panic::resume_unwind;
use std::thread::Result;

/// Runs `func`, turning a panic into an `Err` holding its payload.
///
/// Worker loops run under this so that a panicking `work` call still counts
/// its thread as finished. Payloads are handed back to the thread that started
/// the run with [`resume_unwinding`], so `func` is treated as unwind safe.
#[inline(always)]
pub fn halt_unwinding<F, R>(func: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(func))
}

/// Re-raises a payload captured by [`halt_unwinding`] on the current thread.
#[cold]
pub fn resume_unwinding(payload: Box<dyn Any + Send>) -> ! {
    resume_unwind(payload)
}
