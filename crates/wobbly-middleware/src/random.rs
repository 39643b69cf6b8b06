//! Injectable randomness for fault and delay injection.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Source of the coin flips and delays drawn by the injection stages.
pub trait RandomSource: Send + Sync + 'static {
    /// Returns `true` with the given probability, clamped to `[0, 1]`.
    fn chance(&self, probability: f64) -> bool;

    /// Returns a duration drawn uniformly from `[0, max)` at millisecond
    /// granularity. Returns zero when `max` is below one millisecond.
    fn duration_below(&self, max: Duration) -> Duration;
}

fn max_millis(max: Duration) -> u64 {
    u64::try_from(max.as_millis()).unwrap_or(u64::MAX)
}

fn draw<R: Rng + ?Sized>(rng: &mut R, max: Duration) -> Duration {
    match max_millis(max) {
        0 => Duration::ZERO,
        ms => Duration::from_millis(rng.random_range(0..ms)),
    }
}

/// Draws from the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn chance(&self, probability: f64) -> bool {
        rand::rng().random_bool(probability.clamp(0.0, 1.0))
    }

    fn duration_below(&self, max: Duration) -> Duration {
        draw(&mut rand::rng(), max)
    }
}

/// Deterministic generator for reproducible runs.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Creates a generator from a fixed seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn chance(&self, probability: f64) -> bool {
        self.rng.lock().random_bool(probability.clamp(0.0, 1.0))
    }

    fn duration_below(&self, max: Duration) -> Duration {
        draw(&mut *self.rng.lock(), max)
    }
}

/// Always returns the same outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRandom {
    /// Outcome of every coin flip with a non-zero probability.
    pub fail: bool,
    /// Delay returned, capped just below the requested maximum.
    pub delay: Duration,
}

impl FixedRandom {
    /// Never fails, never delays.
    #[must_use]
    pub const fn passing() -> Self {
        Self {
            fail: false,
            delay: Duration::ZERO,
        }
    }

    /// Fails every flip with a non-zero probability.
    #[must_use]
    pub const fn failing() -> Self {
        Self {
            fail: true,
            delay: Duration::ZERO,
        }
    }

    /// Never fails and always delays by `delay`.
    #[must_use]
    pub const fn delaying(delay: Duration) -> Self {
        Self { fail: false, delay }
    }
}

impl RandomSource for FixedRandom {
    fn chance(&self, probability: f64) -> bool {
        self.fail && probability > 0.0
    }

    fn duration_below(&self, max: Duration) -> Duration {
        match max_millis(max) {
            0 => Duration::ZERO,
            ms => self.delay.min(Duration::from_millis(ms - 1)),
        }
    }
}
