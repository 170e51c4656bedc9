//! Fetch Executor: bounded retry with exponential backoff.
//!
//! A pure decorator around a fetch operation. It knows nothing about
//! caching or deduplication.

use crate::error::FetchError;

use core_async::time::{sleep, Duration};
use std::future::Future;
use tracing::debug;

/// Retry bound and base delay for one fetch chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// No retries: a single attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `fetcher` up to `retries + 1` times.
    ///
    /// Returns the first success, or the last error once the bound is
    /// exhausted. Errors that are not transient end the chain immediately.
    pub async fn execute<T, F, Fut>(&self, mut fetcher: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;

        loop {
            match fetcher().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.retries || !err.is_transient() {
                        return Err(err);
                    }

                    let delay = self.backoff_duration(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after failure"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Shorthand for `RetryPolicy::new(retries, base_delay).execute(fetcher)`.
pub async fn execute<T, F, Fut>(
    fetcher: F,
    retries: u32,
    base_delay: Duration,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    RetryPolicy::new(retries, base_delay).execute(fetcher).await
}
