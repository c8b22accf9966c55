//! TTL jitter
//!
//! Perturbs configured durations by a small random fraction so a cohort of
//! keys written together does not expire together.

use std::time::Duration;

use rand::Rng;

/// Perturbs durations by a bounded, uniformly drawn fraction.
///
/// `around_duration(d)` stays inside `[(1 - deviation) * d, (1 + deviation) * d]`.
/// Every call draws fresh from the thread-local RNG, so a `Jitter` can be
/// shared across threads without locking.
#[derive(Debug, Clone, Copy)]
pub struct Jitter {
    deviation: f64,
}

impl Jitter {
    /// `deviation` is a fraction of the duration; values outside `[0, 1]`
    /// are clamped.
    pub fn new(deviation: f64) -> Self {
        Self {
            deviation: deviation.clamp(0.0, 1.0),
        }
    }

    /// Returns `d` shifted by a fraction drawn uniformly from
    /// `[-deviation, +deviation]`.
    pub fn around_duration(&self, d: Duration) -> Duration {
        if self.deviation <= 0.0 {
            return d;
        }

        let delta = rand::thread_rng().gen_range(-self.deviation..=self.deviation);
        d.mul_f64(1.0 + delta)
    }
}
