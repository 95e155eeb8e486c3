//! Clock Source
//!
//! Monotonic wall-clock seconds as `f64`. Everything that needs "now" goes
//! through [`Clock`] so tests can substitute a scripted clock.

use std::time::Instant;

/// Monotonic time source
pub trait Clock {
    /// Seconds since an arbitrary fixed origin; never decreases within a process.
    fn now(&self) -> f64;
}

/// Clock backed by [`std::time::Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock whose origin is the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline(always)]
    fn now(&self) -> f64 {
        (**self).now()
    }
}
