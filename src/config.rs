//! Process-wide scheduler configuration.
//!
//! A [`Config`] is handed to [`Scheduler::new`](crate::Scheduler::new) once,
//! and applies to every task the scheduler runs. There is no hidden global
//! state: two schedulers with different configs can coexist.
//!
//! ```
//! use parcel::{Config, Scheduler};
//!
//! let config = Config::default().with_max_threads(8).with_seed(0x5eed);
//! let scheduler = Scheduler::new(config);
//! assert_eq!(scheduler.config().max_threads, 8);
//! ```

use core::num::NonZero;

use crate::platform::available_parallelism;

/// Configuration shared by every run of a scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The most threads a single task may use, including the calling thread.
    /// Defaults to the available parallelism reported by the OS. Never zero.
    pub max_threads: usize,
    /// Seeds the generator used to pick ranges when rebalancing. When `None`,
    /// the generator is seeded arbitrarily.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_threads: available_parallelism().map(NonZero::get).unwrap_or(1),
            seed: None,
        }
    }
}

impl Config {
    /// Creates a config with an explicit thread cap and no seed, without
    /// querying the OS.
    pub const fn new(max_threads: usize) -> Config {
        Config {
            max_threads: if max_threads == 0 { 1 } else { max_threads },
            seed: None,
        }
    }

    /// Sets the thread cap. Zero is treated as one.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    /// Seeds the range picking generator, making rebalancing reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
