//! Bounded exponential backoff around fallible generation calls.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use cpeval_core::CpResult;

/// Blocking wait seam; tests substitute a recorder.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total calls, including the first one.
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Draw each wait uniformly from `[min_delay, ceiling]` instead of waiting the full ceiling.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after the `attempt`-th failure (1-based):
    /// `min_delay * 2^(attempt-1)`, clamped to `[min_delay, max_delay]`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
            .max(self.min_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling <= self.min_delay {
            return ceiling;
        }
        let secs = rand::rng().random_range(self.min_delay.as_secs_f64()..=ceiling.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Call `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, mut op: F) -> CpResult<T>
    where
        F: FnMut(u32) -> CpResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!("attempt {attempt}/{max_attempts} failed: {e}; retrying in {delay:?}");
                    sleeper.sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
