//! # Core Configuration Module
//!
//! Configuration for the shelf client core.
//!
//! ## Overview
//!
//! [`CoreConfig`] is assembled with a builder and validated before anything
//! is constructed from it. It bundles:
//!
//! - [`CacheConfig`] - process-wide defaults for staleness, retention and
//!   retry applied to every cached query unless a call site overrides them
//! - [`PaginationConfig`] - page size and how many neighbouring pages the
//!   orchestrator warms
//! - the host bridges: `HttpClient` (required, desktop default available),
//!   `TokenProvider` (required), `Clock` (optional, system clock by default)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CacheConfig, CoreConfig};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com/v1")
//!     .http_client(http_client)
//!     .token_provider(session)
//!     .cache(CacheConfig::default().with_stale_time(Duration::from_secs(60)))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing bridges fail fast with [`Error::CapabilityMissing`] and a message
//! telling the host what to inject; inconsistent timings fail with
//! [`Error::Config`].

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SystemClock, TokenProvider};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on retries per fetch; beyond this a flaky endpoint just makes
/// the UI spin.
pub const MAX_RETRIES: u32 = 10;

/// Largest page the catalog API serves.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Furthest the orchestrator will warm pages away from the current one.
pub const MAX_PREFETCH_DISTANCE: u32 = 5;

/// Default buffer size for the event bus.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Cache timing and retry defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which an entry is stale and refreshed on next read
    pub stale_time: Duration,
    /// Time without access after which an entry is evicted entirely
    pub retention_time: Duration,
    /// Retries after the first failed attempt of a foreground fetch
    pub retries: u32,
    /// Base backoff delay, doubled for every further retry
    pub retry_delay: Duration,
    /// Retries allowed for speculative prefetches
    pub prefetch_retries: u32,
    /// Maximum number of entries kept; least recently used go first
    pub max_entries: usize,
    /// Period of the background eviction sweep, `None` to rely on lazy purging
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            retention_time: Duration::from_secs(5 * 60),
            retries: 2,
            retry_delay: Duration::from_millis(500),
            prefetch_retries: 1,
            max_entries: 500,
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl CacheConfig {
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

    pub fn with_prefetch_retries(mut self, retries: u32) -> Self {
        self.prefetch_retries = retries;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Validates the timing relationships.
    pub fn validate(&self) -> Result<()> {
        if self.retention_time < self.stale_time {
            return Err(Error::Config(format!(
                "Retention time ({:?}) must not be shorter than stale time ({:?})",
                self.retention_time, self.stale_time
            )));
        }

        if self.retries > MAX_RETRIES || self.prefetch_retries > MAX_RETRIES {
            return Err(Error::Config(format!(
                "Retries exceed maximum of {}",
                MAX_RETRIES
            )));
        }

        if self.retries > 0 && self.retry_delay.is_zero() {
            return Err(Error::Config(
                "Retry delay must be greater than 0 when retries are enabled".to_string(),
            ));
        }

        if self.max_entries == 0 {
            return Err(Error::Config(
                "Cache must hold at least one entry".to_string(),
            ));
        }

        if matches!(self.sweep_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::Config(
                "Sweep interval must be greater than 0; use None to disable the sweeper"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Paged list defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
    /// Items per page
    pub page_size: u32,
    /// Pages on each side of the current one to warm
    pub prefetch_distance: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            prefetch_distance: 1,
        }
    }
}

impl PaginationConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_prefetch_distance(mut self, distance: u32) -> Self {
        self.prefetch_distance = distance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.prefetch_distance > MAX_PREFETCH_DISTANCE {
            return Err(Error::Config(format!(
                "Prefetch distance exceeds maximum of {}",
                MAX_PREFETCH_DISTANCE
            )));
        }

        Ok(())
    }
}

/// Core configuration for the shelf client.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the catalog API, without trailing slash
    pub api_base_url: String,

    /// HTTP transport (required, desktop default with `desktop-shims`)
    pub http_client: Arc<dyn HttpClient>,

    /// Bearer token source (required)
    pub token_provider: Arc<dyn TokenProvider>,

    /// Wall-clock source for user-visible timestamps
    pub clock: Arc<dyn Clock>,

    pub cache: CacheConfig,

    pub pagination: PaginationConfig,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("http_client", &"HttpClient { ... }")
            .field("token_provider", &"TokenProvider { ... }")
            .field("clock", &"Clock { ... }")
            .field("cache", &self.cache)
            .field("pagination", &self.pagination)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        let url = self.api_base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "API base URL must be http(s), got '{}'",
                url
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.cache.validate()?;
        self.pagination.validate()?;

        Ok(())
    }
}

fn token_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "TokenProvider".to_string(),
        message: "A TokenProvider is required to authorize catalog requests. \
                  Inject the session module's token source."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::try_new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                  Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                  Mobile: inject the platform-native adapter."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    clock: Option<Arc<dyn Clock>>,
    cache: Option<CacheConfig>,
    pagination: Option<PaginationConfig>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no `TokenProvider` was injected, or
    ///   no `HttpClient` was injected and no desktop default is compiled in
    /// - [`Error::Config`] when validation fails
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = self
            .api_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::Config("API base URL is required".to_string()))?;

        let token_provider = self
            .token_provider
            .ok_or_else(token_provider_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            api_base_url,
            http_client,
            token_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            cache: self.cache.unwrap_or_default(),
            pagination: self.pagination.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}
