//! Bounded retry with randomized backoff for contended storage writes.
//!
//! SQLite reports an external writer as SQLITE_BUSY/SQLITE_LOCKED; the fix
//! is to wait a random beat and try again. Every mutating store call runs
//! through [`RetryPolicy::run`] - no call site carries its own loop, so the
//! budget and the sleep curve cannot drift between writers.

use std::thread::sleep;
use std::time::Duration;

use crate::error::{is_busy, Error};

/// Default attempt budget. The operation is attempted at most this many
/// times in total; the last failure is surfaced as [`Error::Contention`].
pub const MAX_ATTEMPTS: u32 = 10;

/// Randomized backoff schedule for lock-contended operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    /// Seconds multiplied into the jittered exponent. 0.1 gives the
    /// production curve `random() * (attempt + 1)^1.2 / 10`.
    scale: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            scale: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Override the sleep scale. Tests pass 0.0 to keep the attempt
    /// accounting without the wall-clock cost.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sleep length before the attempt after `attempt` (0-based). The
    /// jitter is intentional: concurrent writers colliding on the same lock
    /// must desynchronize, so exact timing is never asserted anywhere.
    fn delay(&self, attempt: u32) -> Duration {
        let jittered = fastrand::f64() * f64::from(attempt + 1).powf(1.2) * self.scale;
        Duration::from_secs_f64(jittered)
    }

    /// Run `op`, retrying only the busy/locked class. Any other error
    /// propagates on the first occurrence. After the attempt budget the
    /// last busy error is wrapped in [`Error::Contention`].
    pub fn run<T, F>(&self, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(Error::Contention {
                            attempts: attempt,
                            source: err,
                        }
                        .into());
                    }
                    sleep(self.delay(attempt - 1));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
