//! Cache Store: timestamped entries with staleness and retention.
//!
//! The store is a plain data structure. It never fails and does no locking;
//! the engine serializes every access.

use crate::error::FetchError;
use crate::pattern::KeyPattern;

use core_async::time::{Duration, Instant};
use lru::LruCache;
use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A cached payload with its type erased.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// One cached query result.
#[derive(Clone)]
pub struct CacheEntry {
    value: Option<ErasedValue>,
    created_at: Option<Instant>,
    stale_after: Duration,
    loading: bool,
    error: Option<FetchError>,
    evict_at: Option<Instant>,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            value: None,
            created_at: None,
            stale_after: Duration::ZERO,
            loading: false,
            error: None,
            evict_at: None,
        }
    }

    /// Last successful value, if it has type `T`.
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value
            .clone()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub(crate) fn erased_value(&self) -> Option<ErasedValue> {
        self.value.clone()
    }

    /// When the current value was written.
    pub fn created_at(&self) -> Option<Instant> {
        self.created_at
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Error of the last completed attempt.
    ///
    /// Always `None` while a fetch is running.
    pub fn error(&self) -> Option<&FetchError> {
        if self.loading {
            None
        } else {
            self.error.as_ref()
        }
    }

    /// A value exists and `created_at + stale_after` has not passed.
    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.created_at {
            Some(created_at) if self.value.is_some() => {
                now.saturating_duration_since(created_at) < self.stale_after
            }
            _ => false,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        !self.is_fresh(now)
    }

    /// Fresh, settled and without error: safe to return without a fetch.
    pub(crate) fn is_servable(&self, now: Instant) -> bool {
        !self.loading && self.error.is_none() && self.is_fresh(now)
    }

    pub fn evict_at(&self) -> Option<Instant> {
        self.evict_at
    }

    fn is_expired(&self, now: Instant) -> bool {
        !self.loading && self.evict_at.map_or(false, |deadline| now >= deadline)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("has_value", &self.value.is_some())
            .field("created_at", &self.created_at)
            .field("stale_after", &self.stale_after)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .field("evict_at", &self.evict_at)
            .finish()
    }
}

/// Key to entry map bounded by an LRU capacity.
pub struct Store {
    entries: LruCache<String, CacheEntry>,
    /// Keys dropped to make room since the last `take_displaced`.
    displaced: Vec<String>,
}

impl Store {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            displaced: Vec::new(),
        }
    }

    /// Non-refreshing lookup: neither LRU order nor retention changes.
    pub fn read(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Records the verdict of a completed attempt.
    ///
    /// A success replaces the value and restarts the staleness window. An
    /// error is recorded next to the previous value, which is kept.
    pub fn write(
        &mut self,
        key: &str,
        outcome: Result<ErasedValue, FetchError>,
        stale_after: Duration,
        now: Instant,
    ) {
        let entry = self.entry_mut(key);
        entry.loading = false;
        match outcome {
            Ok(value) => {
                entry.value = Some(value);
                entry.created_at = Some(now);
                entry.stale_after = stale_after;
                entry.error = None;
            }
            Err(err) => entry.error = Some(err),
        }
    }

    pub fn mark_loading(&mut self, key: &str, loading: bool) {
        if loading {
            self.entry_mut(key).loading = true;
        } else if let Some(entry) = self.entries.peek_mut(key) {
            entry.loading = false;
        }
    }

    /// (Re)sets the retention deadline of `key`.
    pub fn schedule_eviction(&mut self, key: &str, retention: Duration, now: Instant) {
        if let Some(entry) = self.entries.peek_mut(key) {
            entry.evict_at = Some(now + retention);
        }
    }

    /// Marks `key` as used: bumps LRU order and pushes the retention
    /// deadline out.
    pub fn touch(&mut self, key: &str, retention: Duration, now: Instant) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.evict_at = Some(now + retention);
        }
    }

    /// Removes every key selected by `pattern`, returning the removed keys.
    pub fn evict(&mut self, pattern: &KeyPattern) -> Vec<String> {
        if let KeyPattern::Exact(key) = pattern {
            return self
                .entries
                .pop(key.as_str())
                .map(|_| vec![key.clone()])
                .unwrap_or_default();
        }

        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            self.entries.pop(key.as_str());
        }
        matching
    }

    /// Drops entries whose retention deadline has passed.
    ///
    /// Entries with a fetch running are kept until the fetch settles.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key.as_str());
        }
        expired
    }

    pub fn clear(&mut self) -> Vec<String> {
        let keys = self.keys();
        self.entries.clear();
        keys
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys dropped for capacity since the last call.
    pub fn take_displaced(&mut self) -> Vec<String> {
        std::mem::take(&mut self.displaced)
    }

    fn entry_mut(&mut self, key: &str) -> &mut CacheEntry {
        if !self.entries.contains(key) {
            self.make_room();
        }
        self.entries.get_or_insert_mut(key.to_string(), CacheEntry::empty)
    }

    /// Frees one slot when full. The least recently used entry without a
    /// fetch running goes first; a loading entry only when nothing else is
    /// left.
    fn make_room(&mut self) {
        if self.entries.len() < self.entries.cap().get() {
            return;
        }

        let victim = self
            .entries
            .iter()
            .rev()
            .find(|(_, entry)| !entry.loading)
            .or_else(|| self.entries.peek_lru())
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.pop(key.as_str());
            self.displaced.push(key);
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "books|page:0|size:10";

    fn value(text: &str) -> ErasedValue {
        Arc::new(text.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_read_round_trip() {
        let mut store = Store::new(16);
        let now = Instant::now();
        store.write(KEY, Ok(value("page-0")), Duration::from_secs(30), now);

        let entry = store.read(KEY).expect("entry written");
        assert_eq!(entry.value::<String>().as_deref(), Some(&"page-0".to_string()));
        assert!(!entry.is_loading());
        assert!(entry.error().is_none());
        assert_eq!(entry.created_at(), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_previous_value() {
        let mut store = Store::new(16);
        let now = Instant::now();
        store.write(KEY, Ok(value("page-0")), Duration::from_secs(30), now);
        store.mark_loading(KEY, true);
        store.write(
            KEY,
            Err(FetchError::Transport("offline".into())),
            Duration::from_secs(30),
            now + Duration::from_secs(60),
        );

        let entry = store.read(KEY).unwrap();
        assert_eq!(entry.value::<String>().as_deref(), Some(&"page-0".to_string()));
        assert_eq!(entry.error(), Some(&FetchError::Transport("offline".into())));
        assert_eq!(entry.created_at(), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_hidden_while_loading() {
        let mut store = Store::new(16);
        store.write(
            KEY,
            Err(FetchError::Transport("offline".into())),
            Duration::from_secs(30),
            Instant::now(),
        );
        store.mark_loading(KEY, true);
        assert!(store.read(KEY).unwrap().error().is_none());
        store.mark_loading(KEY, false);
        assert!(store.read(KEY).unwrap().error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_window() {
        let mut store = Store::new(16);
        let now = Instant::now();
        store.write(KEY, Ok(value("page-0")), Duration::from_secs(30), now);

        let entry = store.read(KEY).unwrap();
        assert!(entry.is_fresh(now + Duration::from_secs(29)));
        assert!(entry.is_stale(now + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_respects_retention_and_loading() {
        let mut store = Store::new(16);
        let now = Instant::now();
        store.write("a", Ok(value("a")), Duration::from_secs(1), now);
        store.schedule_eviction("a", Duration::from_secs(10), now);
        store.write("b", Ok(value("b")), Duration::from_secs(1), now);
        store.schedule_eviction("b", Duration::from_secs(10), now);
        store.mark_loading("b", true);

        assert!(store.purge_expired(now + Duration::from_secs(9)).is_empty());
        let purged = store.purge_expired(now + Duration::from_secs(10));
        assert_eq!(purged, vec!["a".to_string()]);
        assert!(store.read("b").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_does_not_refresh_retention() {
        let mut store = Store::new(16);
        let now = Instant::now();
        store.write(KEY, Ok(value("page-0")), Duration::from_secs(1), now);
        store.schedule_eviction(KEY, Duration::from_secs(10), now);

        let _ = store.read(KEY);
        assert_eq!(store.read(KEY).unwrap().evict_at(), Some(now + Duration::from_secs(10)));

        store.touch(KEY, Duration::from_secs(10), now + Duration::from_secs(5));
        assert_eq!(store.read(KEY).unwrap().evict_at(), Some(now + Duration::from_secs(15)));
    }

    #[test]
    fn test_evict_by_pattern() {
        let mut store = Store::new(16);
        store.mark_loading("books|page:0", true);
        store.mark_loading("favorites|page:0", true);
        store.mark_loading("favorites|page:1", true);

        let mut evicted = store.evict(&KeyPattern::from("favorites"));
        evicted.sort();
        assert_eq!(evicted, vec!["favorites|page:0", "favorites|page:1"]);
        assert_eq!(store.keys(), vec!["books|page:0".to_string()]);

        assert_eq!(store.evict(&KeyPattern::exact("books|page:0")).len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_drops_least_recently_used() {
        let mut store = Store::new(2);
        store.mark_loading("a", true);
        store.mark_loading("b", true);
        store.mark_loading("c", true);
        assert_eq!(store.len(), 2);
        assert!(store.read("a").is_none());
        assert_eq!(store.take_displaced(), vec!["a".to_string()]);
        assert!(store.take_displaced().is_empty());
    }

    #[test]
    fn test_capacity_spares_loading_entries() {
        let now = Instant::now();
        let mut store = Store::new(2);
        store.mark_loading("loading", true);
        store.write("settled", Ok(value("x")), Duration::from_secs(30), now);

        store.write("new", Ok(value("y")), Duration::from_secs(30), now);

        assert!(store.read("loading").unwrap().is_loading());
        assert!(store.read("settled").is_none());
        assert_eq!(store.take_displaced(), vec!["settled".to_string()]);
    }
}
