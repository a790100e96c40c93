//! This module defines [`WorkRange`], the caller's description of one
//! contiguous slice of a task.

/// A contiguous range of work `[start, start + size)` in the client's iteration
/// domain, optionally tagged with the locality (such as a NUMA node) where its
/// data lives.
///
/// The cursor type `C` is opaque to the scheduler. It is only ever moved
/// forward by the task's `advance` function and handed to its `work` function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkRange<C> {
    /// The cursor of the first unit of work in the range.
    pub start: C,
    /// The number of iteration steps in the range.
    pub size: usize,
    /// An advisory locality id. `None` means no preference.
    pub locality: Option<usize>,
}

impl<C> WorkRange<C> {
    /// Creates a range of `size` steps starting at `start`, with no locality
    /// preference.
    #[inline]
    pub fn new(start: C, size: usize) -> WorkRange<C> {
        WorkRange {
            start,
            size,
            locality: None,
        }
    }

    /// Tags the range with a locality id.
    #[inline]
    pub fn with_locality(mut self, locality: usize) -> WorkRange<C> {
        self.locality = Some(locality);
        self
    }

    /// Returns true if the range has no work in it.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
