//! Observer for screens that show one catalog page at a time.

use crate::api::{BookPage, PageSource};
use crate::query::QueryDescriptor;

use core_async::sync::watch;
use core_cache::{CacheKey, FetchError, QueryCache, QueryObserver, QueryOptions, QueryState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// [`QueryObserver`] bound to query descriptors instead of raw keys.
///
/// Keeps the descriptor behind every key it was shown so fetches (and their
/// retries) still resolve after the screen has moved on.
pub struct PageWatcher {
    observer: QueryObserver<BookPage>,
    cache: QueryCache,
    queries: Arc<Mutex<HashMap<CacheKey, QueryDescriptor>>>,
}

impl PageWatcher {
    pub fn new(cache: QueryCache, source: Arc<dyn PageSource>, options: QueryOptions) -> Self {
        let queries: Arc<Mutex<HashMap<CacheKey, QueryDescriptor>>> = Arc::default();
        let lookup = Arc::clone(&queries);

        let observer = QueryObserver::new(
            cache.clone(),
            move |key: CacheKey| {
                let source = Arc::clone(&source);
                let query = lookup.lock().get(&key).cloned();
                async move {
                    match query {
                        Some(query) => source.fetch_page(&query).await,
                        None => Err(FetchError::InvalidRequest(format!(
                            "No query registered for {}",
                            key
                        ))),
                    }
                }
            },
            options,
        );

        Self {
            observer,
            cache,
            queries,
        }
    }

    /// Shows `query`, or nothing for `None`.
    ///
    /// Must be called from within a runtime.
    pub fn show(&self, query: Option<QueryDescriptor>) {
        let key = query.as_ref().map(QueryDescriptor::cache_key);
        if let (Some(key), Some(query)) = (&key, query) {
            let mut queries = self.queries.lock();
            queries.retain(|known, _| known == key || self.cache.peek(known).is_some());
            queries.insert(key.clone(), query);
        }
        self.observer.bind(key);
    }

    /// Reloads the shown page, ignoring freshness.
    pub fn refetch(&self) -> bool {
        self.observer.refetch()
    }

    pub fn state(&self) -> QueryState<BookPage> {
        self.observer.state()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<BookPage>> {
        self.observer.watch()
    }
}
