//! # Core Cache
//!
//! In-memory query cache shared by every paged screen of the client.
//!
//! ## Overview
//!
//! - [`retry`]: bounded retry with exponential backoff around one fetch
//! - [`store`]: timestamped entries with staleness and retention deadlines
//! - [`inflight`]: one live fetch per key, shared by all callers
//! - [`pattern`]: which keys an invalidation selects
//! - [`engine`]: [`QueryCache`], composing the above
//! - [`observer`]: [`QueryObserver`], binding one consumer to one key
//!
//! ## Usage
//!
//! ```ignore
//! use core_cache::{CacheKey, QueryCache};
//! use core_runtime::config::CacheConfig;
//!
//! let cache = QueryCache::new(CacheConfig::default())?;
//! let key = CacheKey::new("books").with_segment("page", 0);
//! let page = cache
//!     .get(&key, move || api.fetch_page(0), &cache.default_options())
//!     .await?;
//!
//! // On sign-out:
//! cache.invalidate(None);
//! ```

pub mod engine;
pub mod error;
pub mod inflight;
pub mod key;
pub mod observer;
pub mod options;
pub mod pattern;
pub mod retry;
pub mod store;

pub use engine::{CacheStats, QueryCache, Subscription};
pub use error::{CacheError, FetchError, Result};
pub use key::CacheKey;
pub use observer::{QueryObserver, QueryState};
pub use options::QueryOptions;
pub use pattern::KeyPattern;
pub use retry::RetryPolicy;
pub use store::CacheEntry;
