//! Session listener.
//!
//! Turns bus events into cache invalidations: a sign-in, sign-out, expired
//! session or language switch makes every cached page wrong, a favorite
//! toggle only the favorites list.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use core_async::task::{self, JoinHandle};
use core_cache::QueryCache;
use core_catalog::Resource;
use core_runtime::events::{
    AuthEvent, CatalogEvent, CoreEvent, EventBus, EventStream, RecvError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an event invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    All,
    Namespace(&'static str),
}

impl Invalidation {
    /// Invalidation required by `event`, if any.
    pub fn for_event(event: &CoreEvent) -> Option<Self> {
        match event {
            CoreEvent::Auth(
                AuthEvent::SignedIn { .. } | AuthEvent::SignedOut { .. } | AuthEvent::SessionExpired,
            ) => Some(Invalidation::All),
            CoreEvent::Catalog(CatalogEvent::LanguageChanged { .. }) => Some(Invalidation::All),
            CoreEvent::Catalog(CatalogEvent::FavoriteChanged { .. }) => {
                Some(Invalidation::Namespace(Resource::Favorites.tag()))
            }
            CoreEvent::Cache(_) => None,
        }
    }

    pub fn apply(self, cache: &QueryCache) -> usize {
        match self {
            Invalidation::All => cache.invalidate(None),
            Invalidation::Namespace(tag) => cache.invalidate(Some(tag)),
        }
    }

    fn clears_session(self) -> bool {
        self == Invalidation::All
    }
}

/// Wall-clock time of the last full cache reset.
#[derive(Clone)]
pub(crate) struct ResetTracker {
    clock: Arc<dyn Clock>,
    last_reset: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ResetTracker {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_reset: Arc::default(),
        }
    }

    pub(crate) fn record(&self) {
        *self.last_reset.lock() = Some(self.clock.now());
    }

    pub(crate) fn last_reset(&self) -> Option<DateTime<Utc>> {
        *self.last_reset.lock()
    }
}

/// Whether the listener needs to see `event` at all.
fn is_session_event(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Auth(_) | CoreEvent::Catalog(_))
}

/// Spawns the listener. It runs until the bus closes or the handle is
/// aborted.
///
/// A lagging listener only logs. The service's own entry points
/// (`notify_auth`, `set_language`, `set_favorite`) invalidate before they
/// publish, so a missed bus event never leaves stale session data behind.
pub(crate) fn spawn_session_listener(
    events: &EventBus,
    cache: QueryCache,
    resets: ResetTracker,
) -> JoinHandle<()> {
    let mut stream = EventStream::new(events.subscribe()).filter(is_session_event);

    task::spawn(async move {
        loop {
            match stream.recv().await {
                Ok(event) => {
                    let Some(invalidation) = Invalidation::for_event(&event) else {
                        continue;
                    };
                    let evicted = invalidation.apply(&cache);
                    if invalidation.clears_session() {
                        resets.record();
                    }
                    info!(event = event.description(), evicted, "Cache invalidated");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Session listener lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("Event bus closed, stopping session listener");
                    break;
                }
            }
        }
    })
}
