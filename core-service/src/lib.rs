//! Core service façade and bootstrap helpers.
//!
//! This crate is the composition root of the shelf client core. It turns a
//! validated [`CoreConfig`] into one [`CoreService`] that owns the single
//! process-wide [`QueryCache`], the session and cache event buses, the
//! [`CatalogApi`] and the background tasks (eviction sweeper, session
//! listener). Screens get their
//! orchestrators and watchers from here so they all share that cache.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com/v1")
//!     .token_provider(session)
//!     .build()?;
//! let core = CoreService::new(config)?;
//!
//! let books = core.pages(Resource::Books, CatalogFilter::new("en-US"));
//! let first = books.load_current().await?;
//! ```

pub mod error;
pub mod session;

pub use error::{CoreError, Result};
pub use session::Invalidation;

use std::sync::Arc;

use bridge_traits::{Clock, HttpClient, TokenProvider};
use chrono::{DateTime, Utc};
use core_async::task::JoinHandle;
use core_cache::{CacheStats, QueryCache, QueryObserver, QueryOptions};
use core_catalog::{
    CatalogApi, CatalogFilter, PageOrchestrator, PageRequest, PageWatcher, QueryDescriptor,
    Resource,
};
use core_runtime::config::{CoreConfig, PaginationConfig};
use core_runtime::events::{AuthEvent, CatalogEvent, CoreEvent, EventBus, Receiver};
use serde::Serialize;
use session::ResetTracker;
use tracing::{debug, info};

/// Aggregated handle to the bridge dependencies the core requires.
#[derive(Clone)]
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub token_provider: Arc<dyn TokenProvider>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        token_provider: Arc<dyn TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            token_provider,
            clock,
        }
    }
}

impl From<&CoreConfig> for CoreDependencies {
    fn from(config: &CoreConfig) -> Self {
        Self::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.token_provider),
            Arc::clone(&config.clock),
        )
    }
}

/// Snapshot for diagnostics screens.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub cache: CacheStats,
    /// Last time the whole cache was dropped by a session change.
    pub last_reset_at: Option<DateTime<Utc>>,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    deps: CoreDependencies,
    cache: QueryCache,
    /// Auth and catalog events.
    events: EventBus,
    /// Diagnostics published by the cache engine.
    cache_events: EventBus,
    api: Arc<CatalogApi>,
    pagination: PaginationConfig,
    resets: ResetTracker,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl CoreService {
    /// Builds the service and starts its background tasks.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InitializationFailed`] outside a Tokio runtime
    /// - [`CoreError::Config`] / [`CoreError::Catalog`] for an invalid
    ///   configuration
    pub fn new(config: CoreConfig) -> Result<Self> {
        if core_async::runtime::current().is_none() {
            return Err(CoreError::InitializationFailed(
                "CoreService must be created inside an async runtime".to_string(),
            ));
        }
        config.validate()?;

        let deps = CoreDependencies::from(&config);
        let events = EventBus::new(config.event_buffer_size);
        let cache_events = EventBus::new(config.event_buffer_size);
        let cache = QueryCache::with_event_bus(config.cache.clone(), cache_events.clone())?;
        let api = CatalogApi::new(
            &config.api_base_url,
            Arc::clone(&deps.http_client),
            Arc::clone(&deps.token_provider),
        )?;
        let resets = ResetTracker::new(Arc::clone(&deps.clock));

        let mut tasks = Vec::new();
        if let Some(sweeper) = cache.spawn_sweeper() {
            tasks.push(sweeper);
        }
        tasks.push(session::spawn_session_listener(
            &events,
            cache.clone(),
            resets.clone(),
        ));

        info!(
            api_base_url = %config.api_base_url,
            page_size = config.pagination.page_size,
            "Core service started"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                deps,
                cache,
                events,
                cache_events,
                api: Arc::new(api),
                pagination: config.pagination,
                resets,
                tasks,
            }),
        })
    }

    /// Access the bridge dependencies being used by the service.
    pub fn dependencies(&self) -> &CoreDependencies {
        &self.inner.deps
    }

    /// The shared cache.
    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    /// Bus carrying auth and catalog events.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    /// Bus carrying [`CoreEvent::Cache`] diagnostics (failed fetches,
    /// invalidations).
    pub fn cache_events(&self) -> &EventBus {
        &self.inner.cache_events
    }

    pub fn subscribe_cache_events(&self) -> Receiver<CoreEvent> {
        self.inner.cache_events.subscribe()
    }

    pub fn api(&self) -> Arc<CatalogApi> {
        Arc::clone(&self.inner.api)
    }

    /// Query for page 0 of `resource` with the configured page size.
    pub fn first_page(&self, resource: Resource, filter: CatalogFilter) -> QueryDescriptor {
        QueryDescriptor::new(
            resource,
            PageRequest::new(0, self.inner.pagination.page_size),
            filter,
        )
    }

    /// Orchestrator for a paged list, starting at page 0.
    pub fn pages(&self, resource: Resource, filter: CatalogFilter) -> PageOrchestrator {
        PageOrchestrator::new(
            self.inner.cache.clone(),
            self.api(),
            self.first_page(resource, filter),
            &self.inner.pagination,
        )
    }

    /// Watcher showing one page at a time.
    pub fn page_watcher(&self) -> PageWatcher {
        PageWatcher::new(
            self.inner.cache.clone(),
            self.api(),
            self.inner.cache.default_options(),
        )
    }

    /// Observer for arbitrary keyed data sharing the cache.
    pub fn observer<T, F, Fut>(&self, fetcher: F, options: Option<QueryOptions>) -> QueryObserver<T>
    where
        T: Send + Sync + 'static,
        F: Fn(core_cache::CacheKey) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<T, core_cache::FetchError>>
            + Send
            + 'static,
    {
        let options = options.unwrap_or_else(|| self.inner.cache.default_options());
        QueryObserver::new(self.inner.cache.clone(), fetcher, options)
    }

    /// Marks or unmarks a favorite on the server.
    ///
    /// Cached favorites are invalidated before this returns;
    /// [`CatalogEvent::FavoriteChanged`] is published for other listeners.
    pub async fn set_favorite(&self, book_id: &str, is_favorite: bool) -> Result<()> {
        self.inner.api.set_favorite(book_id, is_favorite).await?;
        self.apply_now(CoreEvent::Catalog(CatalogEvent::FavoriteChanged {
            book_id: book_id.to_string(),
            is_favorite,
        }));
        Ok(())
    }

    /// Switches the content language; every cached page is dropped.
    pub fn set_language(&self, language: &str) {
        self.apply_now(CoreEvent::Catalog(CatalogEvent::LanguageChanged {
            language: language.to_string(),
        }));
    }

    /// Reports a session change from the auth module.
    ///
    /// The cache is cleared before this returns, then the event is
    /// published.
    pub fn notify_auth(&self, event: AuthEvent) {
        self.apply_now(CoreEvent::Auth(event));
    }

    /// Evicts entries matching `pattern`, everything for `None`.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.inner.cache.invalidate(pattern)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            cache: self.inner.cache.stats(),
            last_reset_at: self.inner.resets.last_reset(),
        }
    }

    fn apply_now(&self, event: CoreEvent) {
        if let Some(invalidation) = Invalidation::for_event(&event) {
            invalidation.apply(&self.inner.cache);
            if invalidation == Invalidation::All {
                self.inner.resets.record();
            }
        }
        self.publish(event);
    }

    fn publish(&self, event: CoreEvent) {
        if let Err(err) = self.inner.events.emit(event) {
            debug!(error = %err, "No event subscribers");
        }
    }
}
