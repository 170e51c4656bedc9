//! Cache Engine: `get`, `prefetch`, `invalidate` and `peek` over one shared
//! store.
//!
//! ## Fetch lifecycle
//!
//! ```text
//! get(key) ─┬─ fresh entry ───────────────────────────────> value
//!           ├─ in-flight for key (dedupe) ── join ────────> value | error
//!           └─ miss / stale ── mark loading ── register ──> spawn
//!                                                              │
//!                     retry::execute(fetcher) <────────────────┘
//!                                │
//!              lock { write store, schedule eviction, unregister }
//!                                │
//!                     notify subscribers, publish events
//! ```
//!
//! Fetches run as spawned tasks: a caller that stops waiting does not
//! cancel the fetch, and its result still lands in the store for everyone
//! else. The store and the dedup register sit behind one mutex so the
//! check-then-register step is atomic, and the lock is never held across
//! an `.await`.

use crate::error::{FetchError, Result};
use crate::inflight::{InFlight, SharedFetch};
use crate::key::CacheKey;
use crate::options::QueryOptions;
use crate::pattern::KeyPattern;
use crate::retry::RetryPolicy;
use crate::store::{CacheEntry, ErasedValue, Store};

use core_async::task::{self, JoinHandle};
use core_async::time::{self, Instant, MissedTickBehavior};
use core_runtime::config::CacheConfig;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

type Listener = Arc<dyn Fn(Option<CacheEntry>) + Send + Sync>;

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    /// `get` calls answered from a fresh entry.
    pub hits: u64,
    pub misses: u64,
    /// Fetch chains started (retries within a chain are not counted).
    pub fetches: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOrigin {
    Query,
    Prefetch,
}

struct CacheState {
    store: Store,
    inflight: InFlight,
}

#[derive(Default)]
struct Listeners {
    by_key: HashMap<String, Vec<(u64, Listener)>>,
    next_id: u64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    listeners: Mutex<Listeners>,
    config: CacheConfig,
    events: Option<EventBus>,
    counters: Counters,
}

/// Shared query cache handle. Clones refer to the same cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    /// Creates an empty cache after validating `config`.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Creates a cache that publishes [`CacheEvent`]s on `events`.
    pub fn with_event_bus(config: CacheConfig, events: EventBus) -> Result<Self> {
        Self::build(config, Some(events))
    }

    fn build(config: CacheConfig, events: Option<EventBus>) -> Result<Self> {
        config.validate()?;
        let state = CacheState {
            store: Store::new(config.max_entries),
            inflight: InFlight::new(),
        };
        Ok(Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(state),
                listeners: Mutex::new(Listeners::default()),
                config,
                events,
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Options derived from this cache's configuration.
    pub fn default_options(&self) -> QueryOptions {
        QueryOptions::from(&self.inner.config)
    }

    /// Returns the value for `key`, fetching it when absent or stale.
    ///
    /// Concurrent callers of the same key share one fetch. A failed fetch
    /// keeps the previous value in the store; the error is returned here.
    #[instrument(skip(self, fetcher, options), fields(key = %key))]
    pub async fn get<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: &QueryOptions,
    ) -> std::result::Result<Arc<T>, FetchError>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        self.fetch(key, fetcher, options, false).await
    }

    /// Like [`get`](Self::get) but ignores freshness.
    ///
    /// An in-flight fetch for the key is still joined.
    #[instrument(skip(self, fetcher, options), fields(key = %key))]
    pub async fn refetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: &QueryOptions,
    ) -> std::result::Result<Arc<T>, FetchError>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        self.fetch(key, fetcher, options, true).await
    }

    async fn fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: &QueryOptions,
        bypass_freshness: bool,
    ) -> std::result::Result<Arc<T>, FetchError>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let now = Instant::now();
        let (pending, expired, started) = {
            let mut state = self.inner.state.lock();
            let expired = state.store.purge_expired(now);

            let cached = state
                .store
                .read(key.as_str())
                .filter(|entry| !bypass_freshness && entry.is_servable(now))
                .and_then(CacheEntry::erased_value);
            if let Some(value) = cached {
                state
                    .store
                    .touch(key.as_str(), options.retention_time, now);
                drop(state);
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.inner.notify_evicted(&expired);
                debug!("Cache hit");
                return downcast(key, value);
            }

            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            let joined = if options.dedupe {
                state.inflight.get(key.as_str())
            } else {
                None
            };
            match joined {
                Some(fetch) => (fetch, expired, None),
                None => {
                    let retries = options.retries;
                    let (fetch, entry) = self.inner.start_locked(
                        &mut state,
                        key,
                        fetcher,
                        options,
                        retries,
                        FetchOrigin::Query,
                    );
                    let mut expired = expired;
                    expired.extend(state.store.take_displaced());
                    (fetch, expired, Some(entry))
                }
            }
        };

        self.inner.notify_evicted(&expired);
        match started {
            Some(entry) => {
                debug!("Cache miss, fetching");
                self.inner.notify(key.as_str(), entry);
            }
            None => debug!("Joining in-flight fetch"),
        }

        let value = pending.await?;
        downcast(key, value)
    }

    /// Warms `key` in the background.
    ///
    /// No-op when the entry is fresh or a fetch is already running. Retries
    /// are capped by `prefetch_retries`; failures are logged and published
    /// as [`CacheEvent::PrefetchFailed`], never returned. Returns whether a
    /// fetch was started; always `false` outside a runtime.
    pub fn prefetch<T, F, Fut>(&self, key: &CacheKey, fetcher: F, options: &QueryOptions) -> bool
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        if core_async::runtime::current().is_none() {
            warn!(key = %key, "Prefetch requested outside a runtime, skipping");
            return false;
        }

        let now = Instant::now();
        let (entry, expired) = {
            let mut state = self.inner.state.lock();
            let expired = state.store.purge_expired(now);

            let warm = state
                .store
                .read(key.as_str())
                .map_or(false, |entry| entry.is_loading() || entry.is_servable(now));
            if warm || state.inflight.contains(key.as_str()) {
                drop(state);
                self.inner.notify_evicted(&expired);
                return false;
            }

            let retries = options.retries.min(self.inner.config.prefetch_retries);
            let (_fetch, entry) = self.inner.start_locked(
                &mut state,
                key,
                fetcher,
                options,
                retries,
                FetchOrigin::Prefetch,
            );
            let mut expired = expired;
            expired.extend(state.store.take_displaced());
            (entry, expired)
        };

        debug!(key = %key, "Prefetching");
        self.inner.notify_evicted(&expired);
        self.inner.notify(key.as_str(), entry);
        true
    }

    /// Evicts entries and detaches in-flight fetches.
    ///
    /// `None` clears the whole cache. `Some(tag)` evicts the namespace
    /// `tag` (see [`KeyPattern::Namespace`]). Returns the number of evicted
    /// entries. Detached fetches still write their result when they finish.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        match pattern {
            None => self.clear(),
            Some(pattern) => self.invalidate_matching(&KeyPattern::from(pattern)),
        }
    }

    pub fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        let (evicted, detached) = {
            let mut state = self.inner.state.lock();
            let evicted = state.store.evict(pattern);
            let detached = state.inflight.remove_matching(pattern);
            (evicted, detached)
        };

        info!(
            pattern = %pattern,
            evicted = evicted.len(),
            detached,
            "Invalidated cache entries"
        );
        self.inner.publish(CacheEvent::Invalidated {
            pattern: Some(pattern.to_string()),
            evicted: evicted.len(),
        });
        self.inner.notify_evicted(&evicted);
        evicted.len()
    }

    /// Drops every entry and detaches every in-flight fetch.
    pub fn clear(&self) -> usize {
        let (evicted, detached) = {
            let mut state = self.inner.state.lock();
            (state.store.clear(), state.inflight.clear())
        };

        info!(evicted = evicted.len(), detached, "Cleared cache");
        self.inner.publish(CacheEvent::Invalidated {
            pattern: None,
            evicted: evicted.len(),
        });
        self.inner.notify_evicted(&evicted);
        evicted.len()
    }

    /// Current entry for `key` without fetching.
    ///
    /// Does not count as a use: the retention deadline is left alone.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let state = self.inner.state.lock();
        state
            .store
            .read(key.as_str())
            .filter(|entry| entry.is_loading() || entry.evict_at().map_or(true, |at| now < at))
            .cloned()
    }

    /// Typed shorthand for `peek(key)?.value::<T>()`.
    pub fn peek_value<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<Arc<T>> {
        self.peek(key).and_then(|entry| entry.value::<T>())
    }

    /// Writes `value` directly, as if a fetch had just returned it.
    pub fn set<T: Send + Sync + 'static>(&self, key: &CacheKey, value: T, options: &QueryOptions) {
        let now = Instant::now();
        let (entry, displaced) = {
            let mut state = self.inner.state.lock();
            state.store.write(
                key.as_str(),
                Ok(Arc::new(value) as ErasedValue),
                options.stale_time,
                now,
            );
            state
                .store
                .schedule_eviction(key.as_str(), options.retention_time, now);
            (state.store.read(key.as_str()).cloned(), state.store.take_displaced())
        };
        debug!(key = %key, "Wrote cache entry");
        self.inner.notify_evicted(&displaced);
        self.inner.notify(key.as_str(), entry);
    }

    /// Registers `listener` for changes to `key`.
    ///
    /// The listener runs after every write, loading transition and
    /// eviction of the key, outside the cache lock. It receives `None` when
    /// the entry was evicted.
    pub fn subscribe<F>(&self, key: &CacheKey, listener: F) -> Subscription
    where
        F: Fn(Option<CacheEntry>) + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners
            .by_key
            .entry(key.as_str().to_string())
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            key: key.clone(),
            id,
            cache: Arc::downgrade(&self.inner),
        }
    }

    /// Drops entries whose retention deadline has passed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Starts the periodic eviction sweep, if `sweep_interval` is set.
    ///
    /// The task holds a weak reference and ends once the cache is dropped.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.sweep_interval?;
        let cache = Arc::downgrade(&self.inner);

        Some(task::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = cache.upgrade() else {
                    debug!("Cache dropped, stopping sweeper");
                    break;
                };
                let purged = inner.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired cache entries");
                }
            }
        }))
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = {
            let state = self.inner.state.lock();
            (state.store.len(), state.inflight.len())
        };
        let counters = &self.inner.counters;
        CacheStats {
            entries,
            in_flight,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().inflight.contains(key.as_str())
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CacheInner {
    /// Marks `key` loading, spawns the fetch and registers it.
    ///
    /// Runs under the state lock so no second fetch can register between
    /// the in-flight check and this call.
    fn start_locked<T, F, Fut>(
        self: &Arc<Self>,
        state: &mut CacheState,
        key: &CacheKey,
        fetcher: F,
        options: &QueryOptions,
        retries: u32,
        origin: FetchOrigin,
    ) -> (SharedFetch, Option<CacheEntry>)
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        state.store.mark_loading(key.as_str(), true);
        let id = state.inflight.next_id();
        let policy = RetryPolicy::new(retries, options.retry_delay);

        let attempt = task::spawn(async move {
            policy
                .execute(fetcher)
                .await
                .map(|value| Arc::new(value) as ErasedValue)
        });

        let inner = Arc::clone(self);
        let completion_key = key.clone();
        let completion_options = options.clone();
        let completion = task::spawn(async move {
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(err) => Err(FetchError::Cancelled(err.to_string())),
            };
            inner.complete(&completion_key, id, &outcome, &completion_options, origin);
            outcome
        });

        let fetch: SharedFetch = async move {
            match completion.await {
                Ok(outcome) => outcome,
                Err(err) => Err(FetchError::Cancelled(err.to_string())),
            }
        }
        .boxed()
        .shared();

        state.inflight.register(key.as_str(), id, fetch.clone());
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        (fetch, state.store.read(key.as_str()).cloned())
    }

    /// Records a settled fetch: write, schedule eviction, unregister.
    fn complete(
        &self,
        key: &CacheKey,
        id: u64,
        outcome: &std::result::Result<ErasedValue, FetchError>,
        options: &QueryOptions,
        origin: FetchOrigin,
    ) {
        let now = Instant::now();
        let (entry, displaced) = {
            let mut state = self.state.lock();
            state
                .store
                .write(key.as_str(), outcome.clone(), options.stale_time, now);
            state
                .store
                .schedule_eviction(key.as_str(), options.retention_time, now);
            state.inflight.unregister(key.as_str(), id);
            (state.store.read(key.as_str()).cloned(), state.store.take_displaced())
        };
        self.notify_evicted(&displaced);

        if let Err(err) = outcome {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            match origin {
                FetchOrigin::Prefetch => {
                    warn!(key = %key, error = %err, "Prefetch failed");
                    self.publish(CacheEvent::PrefetchFailed {
                        key: key.to_string(),
                        message: err.message(),
                    });
                }
                FetchOrigin::Query => {
                    warn!(key = %key, error = %err, "Fetch failed");
                    self.publish(CacheEvent::FetchFailed {
                        key: key.to_string(),
                        message: err.message(),
                    });
                }
            }
        } else {
            debug!(key = %key, "Fetch completed");
        }

        self.notify(key.as_str(), entry);
    }

    fn purge_expired(&self) -> usize {
        let expired = self.state.lock().store.purge_expired(Instant::now());
        self.notify_evicted(&expired);
        expired.len()
    }

    fn publish(&self, event: CacheEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.emit(CoreEvent::Cache(event));
        }
    }

    fn notify(&self, key: &str, entry: Option<CacheEntry>) {
        let listeners: Vec<Listener> = {
            let registry = self.listeners.lock();
            match registry.by_key.get(key) {
                Some(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        for listener in listeners {
            listener(entry.clone());
        }
    }

    fn notify_evicted(&self, keys: &[String]) {
        for key in keys {
            self.notify(key, None);
        }
    }
}

/// Handle for a listener registered with [`QueryCache::subscribe`].
///
/// Dropping it unregisters the listener.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    key: CacheKey,
    id: u64,
    cache: Weak<CacheInner>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners.lock();
        if let Some(registered) = listeners.by_key.get_mut(self.key.as_str()) {
            registered.retain(|(id, _)| *id != self.id);
            if registered.is_empty() {
                listeners.by_key.remove(self.key.as_str());
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

fn downcast<T: Send + Sync + 'static>(
    key: &CacheKey,
    value: ErasedValue,
) -> std::result::Result<Arc<T>, FetchError> {
    value.downcast::<T>().map_err(|_| FetchError::TypeMismatch {
        key: key.to_string(),
    })
}
