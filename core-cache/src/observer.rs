//! Subscriber Binding: keeps a consumer's view of one cache key current.
//!
//! A [`QueryObserver`] is bound to at most one key at a time. Binding
//! reflects the cached entry immediately, fetches when the entry is absent,
//! stale or failed, and publishes every change on a `watch` channel. Results
//! that arrive for a key the observer no longer watches are dropped; the
//! fetch itself still completes and fills the shared cache.

use crate::engine::{QueryCache, Subscription};
use crate::error::FetchError;
use crate::key::CacheKey;
use crate::options::QueryOptions;
use crate::store::CacheEntry;

use core_async::sync::watch;
use core_async::task;
use core_async::time::Instant;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::trace;

type QueryFn<T> = Arc<dyn Fn(CacheKey) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// What a consumer renders for its bound key.
pub struct QueryState<T> {
    pub key: Option<CacheKey>,
    /// Last good value; kept while refreshing and after a failed refresh.
    pub data: Option<Arc<T>>,
    pub is_loading: bool,
    pub error: Option<FetchError>,
}

impl<T> QueryState<T> {
    fn unbound() -> Self {
        Self {
            key: None,
            data: None,
            is_loading: false,
            error: None,
        }
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            data: self.data.clone(),
            is_loading: self.is_loading,
            error: self.error.clone(),
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::unbound()
    }
}

impl<T> fmt::Debug for QueryState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("key", &self.key)
            .field("has_data", &self.data.is_some())
            .field("is_loading", &self.is_loading)
            .field("error", &self.error)
            .finish()
    }
}

#[derive(Clone, Copy)]
enum FetchMode {
    IfStale,
    Force,
}

struct Binding {
    key: Option<CacheKey>,
    /// Bumped on every rebind; stale callbacks compare against it.
    epoch: u64,
    subscription: Option<Subscription>,
}

struct ObserverInner<T> {
    cache: QueryCache,
    fetcher: QueryFn<T>,
    options: QueryOptions,
    binding: Mutex<Binding>,
    state: watch::Sender<QueryState<T>>,
}

/// Adapter from "key changed" and "refetch requested" to cache calls.
pub struct QueryObserver<T> {
    inner: Arc<ObserverInner<T>>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub fn new<F, Fut>(cache: QueryCache, fetcher: F, options: QueryOptions) -> Self
    where
        F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (state, _) = watch::channel(QueryState::unbound());
        let fetcher: QueryFn<T> = Arc::new(move |key| fetcher(key).boxed());
        Self {
            inner: Arc::new(ObserverInner {
                cache,
                fetcher,
                options,
                binding: Mutex::new(Binding {
                    key: None,
                    epoch: 0,
                    subscription: None,
                }),
                state,
            }),
        }
    }

    /// Points the observer at `key`; `None` disables it.
    ///
    /// Rebinding to the current key only fetches if its entry needs it.
    /// Must be called from within a runtime.
    pub fn bind(&self, key: Option<CacheKey>) {
        let inner = &self.inner;
        let mut binding = inner.binding.lock();

        if binding.key == key {
            if let Some(key) = key {
                let epoch = binding.epoch;
                drop(binding);
                ObserverInner::fetch_if_needed(inner, key, epoch);
            }
            return;
        }

        binding.epoch += 1;
        binding.subscription = None;
        binding.key = key.clone();
        let epoch = binding.epoch;

        let Some(key) = key else {
            drop(binding);
            inner.state.send_replace(QueryState::unbound());
            return;
        };

        let weak = Arc::downgrade(inner);
        let listener_key = key.clone();
        binding.subscription = Some(inner.cache.subscribe(&key, move |entry| {
            ObserverInner::on_entry(&weak, &listener_key, epoch, entry);
        }));
        drop(binding);

        let entry = inner.cache.peek(&key);
        inner.state.send_replace(state_from_entry(Some(key.clone()), entry.as_ref()));
        ObserverInner::fetch_if_needed(inner, key, epoch);
    }

    /// Refetches the bound key ignoring freshness. Returns `false` when
    /// unbound.
    pub fn refetch(&self) -> bool {
        let (key, epoch) = {
            let binding = self.inner.binding.lock();
            match &binding.key {
                Some(key) => (key.clone(), binding.epoch),
                None => return false,
            }
        };
        ObserverInner::start_fetch(&self.inner, key, epoch, FetchMode::Force);
        true
    }

    pub fn key(&self) -> Option<CacheKey> {
        self.inner.binding.lock().key.clone()
    }

    /// Current state snapshot.
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    /// Receiver that wakes on every state change.
    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }
}

impl<T: Send + Sync + 'static> ObserverInner<T> {
    fn is_current(&self, epoch: u64) -> bool {
        self.binding.lock().epoch == epoch
    }

    fn update(&self, epoch: u64, apply: impl FnOnce(&mut QueryState<T>)) {
        if !self.is_current(epoch) {
            trace!("Dropping update for a previous binding");
            return;
        }
        self.state.send_modify(apply);
    }

    fn fetch_if_needed(this: &Arc<Self>, key: CacheKey, epoch: u64) {
        let needs_fetch = match this.cache.peek(&key) {
            None => true,
            Some(entry) => {
                !entry.is_loading() && (entry.error().is_some() || entry.is_stale(Instant::now()))
            }
        };
        if needs_fetch {
            Self::start_fetch(this, key, epoch, FetchMode::IfStale);
        }
    }

    fn start_fetch(this: &Arc<Self>, key: CacheKey, epoch: u64, mode: FetchMode) {
        this.update(epoch, |state| {
            state.is_loading = true;
            state.error = None;
        });

        let weak = Arc::downgrade(this);
        let cache = this.cache.clone();
        let fetcher = Arc::clone(&this.fetcher);
        let options = this.options.clone();

        task::spawn(async move {
            let fetch_key = key.clone();
            let fetch = move || fetcher(fetch_key.clone());
            let result = match mode {
                FetchMode::IfStale => cache.get(&key, fetch, &options).await,
                FetchMode::Force => cache.refetch(&key, fetch, &options).await,
            };

            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.update(epoch, |state| {
                state.is_loading = false;
                match result {
                    Ok(value) => {
                        state.data = Some(value);
                        state.error = None;
                    }
                    Err(err) => state.error = Some(err),
                }
            });
        });
    }

    fn on_entry(weak: &Weak<Self>, key: &CacheKey, epoch: u64, entry: Option<CacheEntry>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(epoch) {
            return;
        }

        match entry {
            Some(entry) => inner.update(epoch, |state| {
                *state = state_from_entry(Some(key.clone()), Some(&entry));
            }),
            None => {
                inner.update(epoch, |state| *state = state_from_entry(Some(key.clone()), None));
                Self::fetch_if_needed(&inner, key.clone(), epoch);
            }
        }
    }
}

fn state_from_entry<T: Send + Sync + 'static>(
    key: Option<CacheKey>,
    entry: Option<&CacheEntry>,
) -> QueryState<T> {
    match entry {
        Some(entry) => QueryState {
            key,
            data: entry.value::<T>(),
            is_loading: entry.is_loading(),
            error: entry.error().cloned(),
        },
        None => QueryState {
            key,
            ..QueryState::unbound()
        },
    }
}

impl<T> fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.inner.binding.lock();
        f.debug_struct("QueryObserver")
            .field("key", &binding.key)
            .field("epoch", &binding.epoch)
            .finish()
    }
}
