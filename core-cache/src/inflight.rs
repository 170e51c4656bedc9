//! Deduplication Register: at most one live fetch per key.

use crate::error::FetchError;
use crate::pattern::KeyPattern;
use crate::store::ErasedValue;

use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;

/// A fetch every concurrent caller of one key can await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<ErasedValue, FetchError>>>;

struct Registration {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
pub struct InFlight {
    registrations: HashMap<String, Registration>,
    next_id: u64,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id for a fetch about to be registered.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Registers `fetch` under `key`, replacing any previous registration.
    pub fn register(&mut self, key: &str, id: u64, fetch: SharedFetch) {
        self.registrations
            .insert(key.to_string(), Registration { id, fetch });
    }

    pub fn get(&self, key: &str) -> Option<SharedFetch> {
        self.registrations.get(key).map(|r| r.fetch.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registrations.contains_key(key)
    }

    /// Removes the registration of `key` only if it is still fetch `id`.
    ///
    /// A fetch that was detached by invalidation, or replaced by a newer
    /// one, must not remove its successor.
    pub fn unregister(&mut self, key: &str, id: u64) -> bool {
        match self.registrations.get(key) {
            Some(registration) if registration.id == id => {
                self.registrations.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Detaches every registration selected by `pattern`.
    ///
    /// The fetches keep running; new callers simply stop joining them.
    pub fn remove_matching(&mut self, pattern: &KeyPattern) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|key, _| !pattern.matches(key));
        before - self.registrations.len()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.registrations.len();
        self.registrations.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
