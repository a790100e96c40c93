//! Random number generation for range rebalancing.

use core::hash::Hasher;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::hash::DefaultHasher;

/// A source of random indices, used to pick which range a worker moves to
/// when its own range runs dry.
///
/// Implement this to make rebalancing decisions fully deterministic in tests.
pub trait RandomSource: Send {
    /// Returns a value from `0..bound`. `bound` is never zero.
    fn next_usize(&mut self, bound: usize) -> usize;
}

/// [xorshift*] is a fast pseudorandom number generator which will
/// even tolerate weak seeding, as long as it's not zero.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
#[derive(Clone, Debug)]
pub struct XorShift64Star {
    state: u64,
}

impl XorShift64Star {
    /// Creates a generator with an arbitrary non-zero seed.
    pub fn new() -> Self {
        // Any non-zero seed will do -- this uses the hash of a global counter.
        let mut seed = 0;
        while seed == 0 {
            let mut hasher = DefaultHasher::new();
            static COUNTER: AtomicUsize = AtomicUsize::new(0);
            hasher.write_usize(COUNTER.fetch_add(1, Ordering::Relaxed));
            seed = hasher.finish();
        }
        XorShift64Star { state: seed }
    }

    /// Creates a generator from a fixed seed. A zero seed is remapped, since
    /// xorshift gets stuck at zero.
    pub fn from_seed(seed: u64) -> Self {
        XorShift64Star {
            state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        debug_assert_ne!(x, 0);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }
}

impl Default for XorShift64Star {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for XorShift64Star {
    /// Return a value from `0..n`.
    fn next_usize(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_is_reproducible() {
        let mut a = XorShift64Star::from_seed(42);
        let mut b = XorShift64Star::from_seed(42);
        for _ in 0..100 {
            assert_eq!(a.next_usize(1000), b.next_usize(1000));
        }
    }

    #[test]
    fn clones_replay() {
        let mut a = XorShift64Star::from_seed(7);
        a.next_usize(10);
        let mut b = a.clone();
        assert_eq!(a.next_usize(1 << 30), b.next_usize(1 << 30));
    }

    #[test]
    fn stays_in_bounds() {
        let mut rng = XorShift64Star::new();
        for bound in 1..200 {
            assert!(rng.next_usize(bound) < bound);
        }
    }

    #[test]
    fn zero_seed_is_usable() {
        let mut rng = XorShift64Star::from_seed(0);
        let first = rng.next_usize(usize::MAX);
        let second = rng.next_usize(usize::MAX);
        assert_ne!(first, second);
    }
}
