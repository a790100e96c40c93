//! The locality hint capability, used to nudge worker threads toward the
//! memory their current range lives in.

/// Moves the calling thread toward a locality (for example, by changing its
/// CPU affinity to the cores of a NUMA node) and back again.
///
/// Hints are purely advisory. The scheduler never depends on them being
/// honored, and ignores failures other than logging them.
///
/// Both methods are called on the worker thread whose placement should
/// change. A worker calls [`LocalityHint::migrate`] whenever it switches to a
/// range with a different locality than the one it is running under, and
/// calls [`LocalityHint::restore`] exactly once before it finishes if it ever
/// migrated.
pub trait LocalityHint: Sync {
    /// Returns the number of valid locality ids, if known. Ranges with a
    /// locality id outside of `0..count` are rejected as a contract violation.
    fn locality_count(&self) -> Option<usize> {
        None
    }

    /// Moves the calling thread toward `locality`. Returns false if the hint
    /// could not be applied.
    fn migrate(&self, locality: usize) -> bool;

    /// Restores the calling thread's original placement.
    fn restore(&self);
}

/// A locality hint that does nothing. This is the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHint;

impl LocalityHint for NoHint {
    #[inline(always)]
    fn migrate(&self, _locality: usize) -> bool {
        true
    }

    #[inline(always)]
    fn restore(&self) {}
}

impl<H> LocalityHint for &H
where
    H: LocalityHint + ?Sized,
{
    fn locality_count(&self) -> Option<usize> {
        (**self).locality_count()
    }

    fn migrate(&self, locality: usize) -> bool {
        (**self).migrate(locality)
    }

    fn restore(&self) {
        (**self).restore();
    }
}
