//! Retry with exponential backoff.

use erp_core::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry policy with capped exponential backoff.
///
/// The delay before retry `n` (0-based) is `min(base * 2^n, max_delay)`.
/// Only errors for which [`ErpError::is_retryable`](erp_core::ErpError::is_retryable)
/// holds are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for reads: two retries, 1s base, 30s cap.
    pub const READS: Self = Self {
        max_retries: 2,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };

    /// Policy for writes: one retry, 1s base, 30s cap.
    pub const MUTATIONS: Self = Self {
        max_retries: 1,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };

    /// Never retry.
    pub const NONE: Self = Self {
        max_retries: 0,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// Sets the retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Backoff before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry bound is exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %e, "Retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::READS
    }
}
