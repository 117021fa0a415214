//! Bounded retries with exponential backoff.
//!
//! The wait before attempt `n` (1-based, after the first) is
//! `initial_backoff * 2^(n-2)`, so a 200 ms base gives 200 ms, 400 ms, 800 ms.

use std::fmt::Display;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// The first attempt plus `retries` more.
    pub fn with_retries(retries: u32, initial_backoff: Duration) -> Self {
        Self::new(retries.saturating_add(1), initial_backoff)
    }

    /// A single attempt without waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait before the given 0-based attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_backoff.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub fn run<T, E, F, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            let wait = self.backoff_for(attempt);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&e) {
                        return Err(e);
                    }
                    warn!(
                        "{}: attempt {}/{} failed: {}",
                        label, attempt, self.max_attempts, e
                    );
                }
            }
        }
    }
}
