//! Minimum-interval pacing for remote requests.
//!
//! One gate per request class: page listings and per-item favoriter lookups
//! are throttled independently. The caller marks the start of a unit of work
//! (normally just before the fetch) and calls `wait_remaining` once the rest
//! of the cycle is done, so persist time and bookkeeping are absorbed into
//! the interval instead of being added on top of it.

use std::thread::sleep;
use std::time::{Duration, Instant};

/// Enforces a minimum wall-clock interval per unit of work.
#[derive(Debug, Clone, Copy)]
pub struct RateGate {
    interval: Duration,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Block until at least the configured interval has elapsed since
    /// `started`. Returns immediately if it already has. One sleep for the
    /// remainder; no polling.
    pub fn wait_remaining(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed < self.interval {
            sleep(self.interval - elapsed);
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
