use async_trait::async_trait;
use core_cache::{FetchError, QueryCache};
use core_catalog::{
    BookPage, BookSummary, CatalogError, CatalogFilter, PageOrchestrator, PageRequest, PageSource,
    QueryDescriptor, Resource,
};
use core_runtime::config::{CacheConfig, PaginationConfig};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Serves `total` numbered books and records every requested page.
struct FakeSource {
    total: u64,
    calls: Mutex<Vec<QueryDescriptor>>,
    failing_pages: HashSet<u32>,
}

impl FakeSource {
    fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            total,
            calls: Mutex::new(Vec::new()),
            failing_pages: HashSet::new(),
        })
    }

    fn failing(total: u64, pages: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            total,
            calls: Mutex::new(Vec::new()),
            failing_pages: pages.iter().copied().collect(),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn pages_requested(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.calls.lock().iter().map(|q| q.page()).collect();
        pages.sort_unstable();
        pages
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<BookPage, FetchError> {
        self.calls.lock().push(query.clone());
        if self.failing_pages.contains(&query.page()) {
            return Err(FetchError::Status {
                status: 500,
                message: "Internal error".into(),
            });
        }

        let start = query.request.offset();
        let end = (start + query.page_size() as u64).min(self.total);
        let items = (start..end)
            .map(|n| BookSummary {
                id: format!("b-{}", n),
                title: format!("Book {}", n),
                author: None,
                cover_url: None,
                duration_secs: None,
                genre_ids: Vec::new(),
                is_favorite: false,
            })
            .collect();
        Ok(BookPage {
            total: self.total,
            items,
        })
    }
}

fn cache() -> QueryCache {
    QueryCache::new(
        CacheConfig::default()
            .with_retry_delay(Duration::from_millis(10))
            .with_sweep_interval(None),
    )
    .unwrap()
}

fn books_query() -> QueryDescriptor {
    QueryDescriptor::new(
        Resource::Books,
        PageRequest::new(0, 10),
        CatalogFilter::new("en-US"),
    )
}

fn orchestrator(cache: &QueryCache, source: Arc<FakeSource>) -> PageOrchestrator {
    PageOrchestrator::new(
        cache.clone(),
        source,
        books_query(),
        &PaginationConfig::default(),
    )
}

/// Lets spawned prefetch tasks run to completion.
async fn settle(cache: &QueryCache) {
    for _ in 0..100 {
        if cache.stats().in_flight == 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_prefetch_is_idempotent_within_epoch() {
    let cache = cache();
    let source = FakeSource::new(35);
    let orchestrator = orchestrator(&cache, source.clone());

    let page = orchestrator.load_current().await.unwrap();
    assert_eq!(page.total, 35);
    assert_eq!(page.items.len(), 10);
    assert_eq!(orchestrator.max_page_index(), Some(3));
    settle(&cache).await;

    // Page 0 plus exactly one prefetch of page 1; page -1 does not exist.
    assert_eq!(source.pages_requested(), vec![0, 1]);
    assert_eq!(orchestrator.warmed_keys(), vec![books_query().neighbor_key(1)]);

    assert_eq!(orchestrator.prefetch_neighbors(), 0);
    settle(&cache).await;
    assert_eq!(source.call_count(), 2);
}

#[tokio::test]
async fn test_page_turn_served_from_warmed_entry() {
    let cache = cache();
    let source = FakeSource::new(25);
    let orchestrator = orchestrator(&cache, source.clone());

    orchestrator.load_current().await.unwrap();
    assert_eq!(orchestrator.max_page_index(), Some(2));
    settle(&cache).await;
    assert!(cache.peek_value::<BookPage>(&books_query().neighbor_key(1)).is_some());

    let page = orchestrator.next_page().await.unwrap();
    assert_eq!(orchestrator.page_index(), 1);
    assert_eq!(page.items[0].id, "b-10");
    settle(&cache).await;

    // Page 1 came from the cache; page 0 was still fresh; only page 2 is new.
    assert_eq!(source.pages_requested(), vec![0, 1, 2]);
    assert!(orchestrator.has_next());
    assert!(orchestrator.has_previous());

    let view = orchestrator.current_page().unwrap();
    assert_eq!(view.page, 1);
    assert_eq!(view.total_pages, 3);
}

#[tokio::test]
async fn test_navigation_stops_at_last_page() {
    let cache = cache();
    let source = FakeSource::new(25);
    let orchestrator = orchestrator(&cache, source.clone());

    orchestrator.load_current().await.unwrap();
    orchestrator.go_to_page(2).await.unwrap();
    assert!(!orchestrator.has_next());

    let err = orchestrator.next_page().await.unwrap_err();
    assert!(matches!(err, CatalogError::InvalidInput { .. }));
    assert_eq!(orchestrator.page_index(), 2);
}

#[tokio::test]
async fn test_filter_change_resets_page_and_invalidates() {
    let cache = cache();
    let source = FakeSource::new(25);
    let orchestrator = orchestrator(&cache, source.clone());

    orchestrator.load_current().await.unwrap();
    orchestrator.go_to_page(1).await.unwrap();
    settle(&cache).await;
    let favorites = QueryDescriptor::new(
        Resource::Favorites,
        PageRequest::new(0, 10),
        CatalogFilter::new("en-US"),
    )
    .cache_key();
    cache.set(&favorites, BookPage::empty(), &cache.default_options());

    assert!(orchestrator.set_filters(CatalogFilter::new("en-US").with_genre("history")));

    assert_eq!(orchestrator.page_index(), 0);
    assert_eq!(orchestrator.total(), None);
    assert!(orchestrator.warmed_keys().is_empty());
    assert!(cache.peek(&books_query().cache_key()).is_none());
    assert!(cache.peek(&favorites).is_some());
    assert!(orchestrator
        .current_key()
        .as_str()
        .contains("|genre:history|"));

    let calls = source.call_count();
    orchestrator.load_current().await.unwrap();
    assert_eq!(source.call_count(), calls + 1);
}

#[tokio::test]
async fn test_current_page_error_surfaces() {
    let cache = cache();
    let source = FakeSource::failing(25, &[0]);
    let orchestrator = orchestrator(&cache, source.clone());

    let err = orchestrator.load_current().await.unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Fetch(FetchError::Status { status: 500, .. })
    ));
    // Initial attempt plus the two default retries.
    assert_eq!(source.call_count(), 3);
    assert_eq!(orchestrator.total(), None);
}

#[tokio::test]
async fn test_prefetch_failure_is_dropped() {
    let cache = cache();
    let source = FakeSource::failing(25, &[1]);
    let orchestrator = orchestrator(&cache, source.clone());

    let page = orchestrator.load_current().await.unwrap();
    assert_eq!(page.items.len(), 10);

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if cache.stats().in_flight == 0 {
            break;
        }
    }

    // Prefetches retry at most once.
    assert_eq!(source.pages_requested(), vec![0, 1, 1]);
    let entry = cache.peek(&books_query().neighbor_key(1)).unwrap();
    assert!(!entry.has_value());
    assert!(entry.error().is_some());
}

#[tokio::test]
async fn test_refresh_bypasses_freshness() {
    let cache = cache();
    let source = FakeSource::new(5);
    let orchestrator = orchestrator(&cache, source.clone());

    orchestrator.load_current().await.unwrap();
    orchestrator.load_current().await.unwrap();
    assert_eq!(source.call_count(), 1);

    orchestrator.refresh().await.unwrap();
    assert_eq!(source.call_count(), 2);
}
