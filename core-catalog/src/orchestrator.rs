//! Pagination prefetch orchestrator.
//!
//! Drives one paged list: fetches the current page through the shared
//! [`QueryCache`] and, once the total is known, warms the neighbouring pages
//! so a page turn is served from memory.

use crate::api::{BookPage, PageSource};
use crate::error::{CatalogError, Result};
use crate::models::BookSummary;
use crate::pagination::{max_page_index, Page};
use crate::query::{CatalogFilter, QueryDescriptor};

use core_cache::{CacheKey, FetchError, QueryCache, QueryOptions};
use core_runtime::config::PaginationConfig;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Paging state for one list screen.
pub struct PageOrchestrator {
    cache: QueryCache,
    source: Arc<dyn PageSource>,
    options: QueryOptions,
    prefetch_distance: u32,
    state: Mutex<PagingState>,
}

struct PagingState {
    query: QueryDescriptor,
    /// Bumped on every filter change; results from older epochs are ignored.
    epoch: u64,
    total: Option<u64>,
    /// Neighbour keys already prefetched in this epoch.
    warmed: HashSet<CacheKey>,
}

impl PagingState {
    fn max_page_index(&self) -> Option<u32> {
        self.total
            .and_then(|total| max_page_index(total, self.query.page_size()))
    }
}

impl PageOrchestrator {
    pub fn new(
        cache: QueryCache,
        source: Arc<dyn PageSource>,
        query: QueryDescriptor,
        config: &PaginationConfig,
    ) -> Self {
        let options = cache.default_options();
        Self {
            cache,
            source,
            options,
            prefetch_distance: config.prefetch_distance,
            state: Mutex::new(PagingState {
                query,
                epoch: 0,
                total: None,
                warmed: HashSet::new(),
            }),
        }
    }

    /// Overrides the cache options used for current and neighbour pages.
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn query(&self) -> QueryDescriptor {
        self.state.lock().query.clone()
    }

    pub fn current_key(&self) -> CacheKey {
        self.state.lock().query.cache_key()
    }

    pub fn page_index(&self) -> u32 {
        self.state.lock().query.page()
    }

    /// Total item count reported by the last load in this filter epoch.
    pub fn total(&self) -> Option<u64> {
        self.state.lock().total
    }

    /// `ceil(total / page_size) - 1`, once the total is known.
    pub fn max_page_index(&self) -> Option<u32> {
        self.state.lock().max_page_index()
    }

    /// Applies new filters.
    ///
    /// An equivalent filter is ignored and returns `false`. Otherwise the
    /// list restarts at page 0 and every cached page of this resource is
    /// invalidated.
    pub fn set_filters(&self, filter: CatalogFilter) -> bool {
        let tag = {
            let mut state = self.state.lock();
            if state.query.filter.is_equivalent(&filter) {
                return false;
            }

            state.query.filter = filter;
            state.query = state.query.with_page(0);
            state.epoch += 1;
            state.total = None;
            state.warmed.clear();
            state.query.resource_tag()
        };

        let evicted = self.cache.invalidate(Some(tag));
        info!(resource = tag, evicted, "Filters changed, list reset");
        true
    }

    /// Fetches the current page, then warms its neighbours.
    ///
    /// A fresh cached page is returned without a request. Errors of the
    /// current page are returned; neighbour failures never are.
    #[instrument(skip(self))]
    pub async fn load_current(&self) -> Result<Arc<BookPage>> {
        let (query, epoch) = {
            let state = self.state.lock();
            (state.query.clone(), state.epoch)
        };

        let key = query.cache_key();
        let fetcher = page_fetcher(Arc::clone(&self.source), query);
        let page = self.cache.get(&key, fetcher, &self.options).await?;

        if self.record_total(epoch, page.total) {
            self.prefetch_neighbors();
        }
        Ok(page)
    }

    /// Like [`load_current`](Self::load_current) but ignores freshness.
    pub async fn refresh(&self) -> Result<Arc<BookPage>> {
        let (query, epoch) = {
            let state = self.state.lock();
            (state.query.clone(), state.epoch)
        };

        let key = query.cache_key();
        let fetcher = page_fetcher(Arc::clone(&self.source), query);
        let page = self.cache.refetch(&key, fetcher, &self.options).await?;
        self.record_total(epoch, page.total);
        Ok(page)
    }

    /// Navigates to `page` and loads it.
    ///
    /// A warmed page comes straight from the cache. Fails with
    /// [`CatalogError::InvalidInput`] beyond the last known page.
    pub async fn go_to_page(&self, page: u32) -> Result<Arc<BookPage>> {
        self.set_page(page)?;
        self.load_current().await
    }

    pub async fn next_page(&self) -> Result<Arc<BookPage>> {
        let next = self.page_index().saturating_add(1);
        self.go_to_page(next).await
    }

    pub async fn previous_page(&self) -> Result<Arc<BookPage>> {
        let previous = self
            .page_index()
            .checked_sub(1)
            .ok_or_else(|| CatalogError::invalid_input("page", "Already on the first page"))?;
        self.go_to_page(previous).await
    }

    /// Moves the page index without loading.
    pub fn set_page(&self, page: u32) -> Result<()> {
        let mut state = self.state.lock();
        let in_range = match (state.total, state.max_page_index()) {
            (None, _) => true,
            (Some(_), Some(max)) => page <= max,
            (Some(_), None) => page == 0,
        };
        if !in_range {
            return Err(CatalogError::invalid_input(
                "page",
                format!(
                    "Page {} is beyond the last page ({:?})",
                    page,
                    state.max_page_index()
                ),
            ));
        }

        state.query = state.query.with_page(page);
        Ok(())
    }

    /// Cached view of the current page, without fetching.
    pub fn current_page(&self) -> Option<Page<BookSummary>> {
        let query = self.query();
        self.cache
            .peek_value::<BookPage>(&query.cache_key())
            .map(|page| (*page).clone().into_page(query.request))
    }

    pub fn has_next(&self) -> bool {
        let state = self.state.lock();
        state
            .max_page_index()
            .map_or(false, |max| state.query.page() < max)
    }

    pub fn has_previous(&self) -> bool {
        self.page_index() > 0
    }

    /// Prefetches pages `page ± 1..=distance` inside `[0, max_page_index]`.
    ///
    /// Does nothing until the total is known, or when called outside a
    /// runtime. Keys already warmed in this filter epoch are skipped unless
    /// the cache has since dropped them. Returns the number of prefetches
    /// requested.
    pub fn prefetch_neighbors(&self) -> usize {
        if core_async::runtime::current().is_none() {
            debug!("No runtime, skipping neighbour prefetch");
            return 0;
        }

        let targets: Vec<QueryDescriptor> = {
            let mut state = self.state.lock();
            let Some(max) = state.max_page_index() else {
                return 0;
            };

            let current = state.query.page();
            let distance = self.prefetch_distance;
            let below = current.saturating_sub(distance)..current.min(max.saturating_add(1));
            let above = current.saturating_add(1)..=current.saturating_add(distance).min(max);

            let mut targets = Vec::new();
            for page in below.chain(above) {
                let neighbour = state.query.with_page(page);
                let key = neighbour.cache_key();
                if state.warmed.contains(&key) && self.cache.peek(&key).is_some() {
                    continue;
                }
                state.warmed.insert(key);
                targets.push(neighbour);
            }
            targets
        };

        for query in &targets {
            let key = query.cache_key();
            let started = self.cache.prefetch(
                &key,
                page_fetcher(Arc::clone(&self.source), query.clone()),
                &self.options,
            );
            debug!(key = %key, started, "Neighbour prefetch requested");
        }
        targets.len()
    }

    /// Keys prefetched in the current filter epoch.
    pub fn warmed_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.state.lock().warmed.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Stores `total` if no filter change happened since `epoch`.
    fn record_total(&self, epoch: u64, total: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!("Discarding total from a previous filter");
            return false;
        }
        state.total = Some(total);
        true
    }
}

type PageFuture = Pin<Box<dyn Future<Output = std::result::Result<BookPage, FetchError>> + Send>>;

fn page_fetcher(
    source: Arc<dyn PageSource>,
    query: QueryDescriptor,
) -> impl FnMut() -> PageFuture + Send + 'static {
    move || -> PageFuture {
        let source = Arc::clone(&source);
        let query = query.clone();
        Box::pin(async move { source.fetch_page(&query).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::PageRequest;
    use crate::query::Resource;
    use async_trait::async_trait;
    use core_runtime::config::CacheConfig;

    struct EmptySource;

    #[async_trait]
    impl PageSource for EmptySource {
        async fn fetch_page(
            &self,
            _query: &QueryDescriptor,
        ) -> std::result::Result<BookPage, FetchError> {
            Ok(BookPage::empty())
        }
    }

    /// Reports `total` items without returning any.
    struct CountingSource(u64);

    #[async_trait]
    impl PageSource for CountingSource {
        async fn fetch_page(
            &self,
            _query: &QueryDescriptor,
        ) -> std::result::Result<BookPage, FetchError> {
            Ok(BookPage {
                total: self.0,
                items: Vec::new(),
            })
        }
    }

    fn orchestrator() -> PageOrchestrator {
        orchestrator_over(Arc::new(EmptySource))
    }

    fn orchestrator_over(source: Arc<dyn PageSource>) -> PageOrchestrator {
        let cache = QueryCache::new(CacheConfig::default().with_sweep_interval(None)).unwrap();
        let query = QueryDescriptor::new(
            Resource::Books,
            PageRequest::new(0, 10),
            CatalogFilter::new("en"),
        );
        PageOrchestrator::new(cache, source, query, &PaginationConfig::default())
    }

    #[test]
    fn test_no_prefetch_before_total_is_known() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.prefetch_neighbors(), 0);
        assert!(orchestrator.warmed_keys().is_empty());
        assert!(!orchestrator.has_next());
    }

    #[test]
    fn test_equivalent_filter_is_ignored() {
        let orchestrator = orchestrator();
        assert!(!orchestrator.set_filters(CatalogFilter::new("en").with_search("   ")));
        assert!(orchestrator.set_filters(CatalogFilter::new("en").with_search("dune")));
    }

    #[tokio::test]
    async fn test_empty_list_pins_page_zero() {
        let orchestrator = orchestrator();
        let page = orchestrator.load_current().await.unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(orchestrator.max_page_index(), None);
        assert!(orchestrator.set_page(0).is_ok());
        assert!(matches!(
            orchestrator.set_page(1),
            Err(CatalogError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_previous_page_on_first_page_fails() {
        let orchestrator = orchestrator();
        let err = orchestrator.previous_page().await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput { .. }));
    }

    #[test]
    fn test_prefetch_outside_runtime_is_skipped() {
        let orchestrator = orchestrator_over(Arc::new(CountingSource(35)));
        core_async::runtime::block_on(orchestrator.load_current())
            .unwrap()
            .unwrap();
        orchestrator.set_page(2).unwrap();

        assert_eq!(orchestrator.prefetch_neighbors(), 0);
        let next = orchestrator.query().neighbor_key(3);
        assert!(!orchestrator.warmed_keys().contains(&next));
    }
}
