//! Per-call query options.

use core_async::time::Duration;
use core_runtime::config::CacheConfig;

/// Timing and retry knobs for one `get`/`prefetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long a written value counts as fresh.
    pub stale_time: Duration,
    /// How long an untouched entry survives after its last write or hit.
    pub retention_time: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    /// Join an existing in-flight fetch for the key instead of starting one.
    pub dedupe: bool,
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_retention_time(mut self, retention_time: Duration) -> Self {
        self.retention_time = retention_time;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }
}

impl From<&CacheConfig> for QueryOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            stale_time: config.stale_time,
            retention_time: config.retention_time,
            retries: config.retries,
            retry_delay: config.retry_delay,
            dedupe: true,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}
