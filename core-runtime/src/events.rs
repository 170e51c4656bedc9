//! # Event Bus System
//!
//! Typed events shared between the cache engine, the catalog layer and the
//! host session, carried over a `broadcast` channel.
//!
//! ## Overview
//!
//! - **Auth** events come from the host (sign-in, sign-out, expired session)
//!   and drive wholesale cache invalidation.
//! - **Catalog** events describe user actions that make cached pages wrong
//!   (toggling a favorite, switching the content language).
//! - **Cache** events are published by the engine: invalidations and fetch
//!   or prefetch failures that no caller is awaiting.
//!
//! ```text
//! ┌──────────────┐  emit   ┌──────────┐  subscribe  ┌──────────────────┐
//! │ Host session ├────────>│          ├────────────>│ session listener │
//! └──────────────┘         │ EventBus │             └──────────────────┘
//! ┌──────────────┐  emit   │          │  subscribe  ┌──────────────────┐
//! │ Cache engine ├────────>│          ├────────────>│ UI / diagnostics │
//! └──────────────┘         └──────────┘             └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.emit(CoreEvent::Auth(AuthEvent::SessionExpired)).ok();
//! assert!(matches!(rx.try_recv(), Ok(CoreEvent::Auth(AuthEvent::SessionExpired))));
//! ```
//!
//! Slow subscribers receive `RecvError::Lagged(n)` and may keep reading;
//! `RecvError::Closed` means every sender is gone.

use crate::config::DEFAULT_EVENT_BUFFER_SIZE;

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Catalog(CatalogEvent),
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Catalog(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Cache(CacheEvent::FetchFailed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::PrefetchFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SessionExpired) => EventSeverity::Warning,
            CoreEvent::Auth(_) | CoreEvent::Catalog(_) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Invalidated { .. }) => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Session changes reported by the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    SignedIn {
        user_id: String,
    },
    SignedOut {
        user_id: Option<String>,
    },
    /// The backend rejected the stored credentials.
    SessionExpired,
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SignedIn { .. } => "User signed in",
            AuthEvent::SignedOut { .. } => "User signed out",
            AuthEvent::SessionExpired => "Session expired",
        }
    }
}

/// User actions that change server-side catalog state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CatalogEvent {
    FavoriteChanged {
        book_id: String,
        is_favorite: bool,
    },
    /// Content language switched; every language-scoped page is now wrong.
    LanguageChanged {
        language: String,
    },
}

impl CatalogEvent {
    fn description(&self) -> &str {
        match self {
            CatalogEvent::FavoriteChanged { .. } => "Favorite toggled",
            CatalogEvent::LanguageChanged { .. } => "Content language changed",
        }
    }
}

/// Events published by the cache engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Entries were evicted. `pattern` is `None` for a full clear.
    Invalidated {
        pattern: Option<String>,
        evicted: usize,
    },
    /// A fetch exhausted its retries.
    FetchFailed {
        key: String,
        message: String,
    },
    /// A background prefetch failed; nobody was awaiting it.
    PrefetchFailed {
        key: String,
        message: String,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Invalidated { .. } => "Cache entries invalidated",
            CacheEvent::FetchFailed { .. } => "Fetch failed",
            CacheEvent::PrefetchFailed { .. } => "Prefetch failed",
        }
    }
}

/// Central broadcast channel for [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody listens.
    /// Publishers in this workspace treat the error as informational.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let cache_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
