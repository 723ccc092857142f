//! Capped exponential backoff.

use std::future::Future;
use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_millis(2000);

/// Runs a unit of work up to `retries + 1` times.
///
/// Between failed attempts the task sleeps `min(base * 2^attempt, max)`; there
/// is no sleep after the final attempt. When every attempt fails the last
/// error is returned as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RetryPolicy {
    /// `retries` counts attempts after the first; `0` disables retrying.
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before the attempt following failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Retry on every error.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_if(operation, |_| true).await
    }

    /// Retry only errors for which `should_retry` returns `true`; any other
    /// error is returned immediately.
    pub async fn run_if<F, Fut, T, E, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retries && should_retry(&err) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        name: "retry.backoff",
                        attempt = attempt + 1,
                        of = self.retries + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
