//! Behavioral tests for the query cache: dedup, stale-while-revalidate,
//! backoff, invalidation and retention.

use core_async::time::{self, Duration, Instant};
use core_cache::{CacheKey, FetchError, KeyPattern, QueryCache, QueryOptions};
use core_runtime::config::CacheConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn cache() -> QueryCache {
    QueryCache::new(
        CacheConfig::default()
            .with_stale_time(Duration::from_secs(30))
            .with_retention_time(Duration::from_secs(300))
            .with_sweep_interval(None),
    )
    .unwrap()
}

fn books_key(page: u32) -> CacheKey {
    CacheKey::new("books")
        .with_segment("page", page)
        .with_segment("size", 10)
        .with_segment("lang", "en")
        .with_segment("genre", "all")
        .with_segment("search", "none")
}

fn favorites_key(page: u32) -> CacheKey {
    CacheKey::new("favorites")
        .with_segment("page", page)
        .with_segment("size", 10)
        .with_segment("lang", "en")
        .with_segment("genre", "all")
        .with_segment("search", "none")
}

/// Counts invocations and answers with `value` after `delay`.
fn counting_fetcher(
    calls: &Arc<AtomicUsize>,
    value: &'static str,
    delay: Duration,
) -> impl FnMut() -> BoxFuture<'static, Result<String, FetchError>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            time::sleep(delay).await;
            Ok(value.to_string())
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_fetch() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = futures::join!(
        cache.get(&key, counting_fetcher(&calls, "page-0", Duration::from_millis(50)), &options),
        cache.get(&key, counting_fetcher(&calls, "other", Duration::from_millis(50)), &options),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*a, "page-0");
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!cache.is_fetching(&key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_across_threads_share_one_fetch() {
    let cache = cache();
    let key = books_key(0);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let key = key.clone();
        let fetcher = counting_fetcher(&calls, "page-0", Duration::from_millis(20));
        handles.push(tokio::spawn(async move {
            cache.get(&key, fetcher, &cache.default_options()).await
        }));
    }
    for handle in handles {
        assert_eq!(*handle.await.unwrap().unwrap(), "page-0");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dedupe_disabled_starts_a_second_fetch() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options().with_dedupe(false);
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = futures::join!(
        cache.get(&key, counting_fetcher(&calls, "first", Duration::from_millis(50)), &options),
        cache.get(&key, counting_fetcher(&calls, "second", Duration::from_millis(50)), &options),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*a.unwrap(), "first");
    assert_eq!(*b.unwrap(), "second");
}

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_is_served_without_fetching() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options();
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get(&key, counting_fetcher(&calls, "page-0", Duration::ZERO), &options)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    let again = cache
        .get(&key, counting_fetcher(&calls, "newer", Duration::ZERO), &options)
        .await
        .unwrap();

    assert_eq!(*again, "page-0");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_stays_visible_while_revalidating() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options();
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get(&key, counting_fetcher(&calls, "old", Duration::ZERO), &options)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;

    let refresh = {
        let cache = cache.clone();
        let key = key.clone();
        let options = options.clone();
        let fetcher = counting_fetcher(&calls, "new", Duration::from_millis(100));
        tokio::spawn(async move { cache.get(&key, fetcher, &options).await })
    };
    while !cache.is_fetching(&key) {
        tokio::task::yield_now().await;
    }

    let during = cache.peek(&key).expect("entry kept while stale");
    assert!(during.is_loading());
    assert_eq!(during.value::<String>().as_deref().map(String::as_str), Some("old"));

    assert_eq!(*refresh.await.unwrap().unwrap(), "new");
    let after = cache.peek(&key).unwrap();
    assert!(!after.is_loading());
    assert_eq!(after.value::<String>().as_deref().map(String::as_str), Some("new"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_previous_value() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options().with_retries(0);

    cache
        .get(&key, || async { Ok::<_, FetchError>("good".to_string()) }, &options)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;

    let result = cache
        .get(
            &key,
            || async { Err::<String, _>(FetchError::Transport("offline".into())) },
            &options,
        )
        .await;

    assert_eq!(result.unwrap_err(), FetchError::Transport("offline".into()));
    let entry = cache.peek(&key).unwrap();
    assert_eq!(entry.value::<String>().as_deref().map(String::as_str), Some("good"));
    assert_eq!(entry.error(), Some(&FetchError::Transport("offline".into())));
    assert!(!entry.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_entry_in_error_is_refetched_even_when_young() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options().with_retries(0);

    let _ = cache
        .get(
            &key,
            || async { Err::<String, _>(FetchError::Transport("offline".into())) },
            &options,
        )
        .await;
    let recovered = cache
        .get(&key, || async { Ok::<_, FetchError>("back".to_string()) }, &options)
        .await
        .unwrap();

    assert_eq!(*recovered, "back");
    assert!(cache.peek(&key).unwrap().error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retries_back_off_exponentially() {
    let cache = cache();
    let key = books_key(0);
    let options = cache
        .default_options()
        .with_retries(2)
        .with_retry_delay(Duration::from_millis(200));
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&attempts);
    let value = cache
        .get(
            &key,
            move || {
                let recorded = Arc::clone(&recorded);
                async move {
                    let mut attempts = recorded.lock().unwrap();
                    attempts.push(Instant::now());
                    if attempts.len() <= 2 {
                        Err(FetchError::Status {
                            status: 503,
                            message: "Service unavailable".into(),
                        })
                    } else {
                        Ok(35u32)
                    }
                }
            },
            &options,
        )
        .await
        .unwrap();

    assert_eq!(*value, 35);
    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);
    let first_delay = attempts[1] - attempts[0];
    let second_delay = attempts[2] - attempts[1];
    assert!(first_delay >= Duration::from_millis(200));
    assert!(second_delay >= first_delay * 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_pattern_evicts_only_matching_namespace() {
    let cache = cache();
    let options = cache.default_options();
    cache.set(&books_key(0), "books".to_string(), &options);
    cache.set(&favorites_key(0), "favorites".to_string(), &options);
    cache.set(&favorites_key(1), "favorites".to_string(), &options);

    assert_eq!(cache.invalidate(Some("favorites")), 2);

    assert!(cache.peek(&favorites_key(0)).is_none());
    assert!(cache.peek(&favorites_key(1)).is_none());
    assert_eq!(
        cache.peek_value::<String>(&books_key(0)).as_deref().map(String::as_str),
        Some("books")
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_all_clears_everything() {
    let cache = cache();
    let options = cache.default_options();
    cache.set(&books_key(0), 1u8, &options);
    cache.set(&favorites_key(0), 2u8, &options);

    assert_eq!(cache.invalidate(None), 2);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalidated_in_flight_fetch_still_writes_and_next_get_refetches() {
    let cache = cache();
    let key = favorites_key(0);
    let options = cache.default_options();
    let calls = Arc::new(AtomicUsize::new(0));

    let pending = {
        let cache = cache.clone();
        let key = key.clone();
        let options = options.clone();
        let fetcher = counting_fetcher(&calls, "before", Duration::from_millis(100));
        tokio::spawn(async move { cache.get(&key, fetcher, &options).await })
    };
    while !cache.is_fetching(&key) {
        tokio::task::yield_now().await;
    }
    assert!(cache.is_fetching(&key));

    cache.invalidate_matching(&KeyPattern::from("favorites"));
    assert!(!cache.is_fetching(&key));

    // A caller arriving now does not join the detached fetch.
    let fresh = cache
        .get(&key, counting_fetcher(&calls, "after", Duration::from_millis(200)), &options)
        .await
        .unwrap();
    assert_eq!(*pending.await.unwrap().unwrap(), "before");
    assert_eq!(*fresh, "after");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_registration_is_released_after_failure() {
    let cache = cache();
    let key = books_key(0);
    let options = cache.default_options().with_retries(0);

    let _ = cache
        .get(
            &key,
            || async { Err::<String, _>(FetchError::Transport("offline".into())) },
            &options,
        )
        .await;
    assert!(!cache.is_fetching(&key));
    assert_eq!(cache.stats().failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_written_value_reads_back_exactly() {
    let cache = cache();
    let key = books_key(7);
    cache.set(&key, vec!["a".to_string(), "b".to_string()], &cache.default_options());

    let entry = cache.peek(&key).unwrap();
    assert_eq!(
        entry.value::<Vec<String>>().as_deref(),
        Some(&vec!["a".to_string(), "b".to_string()])
    );
    assert!(!entry.is_loading());
    assert!(entry.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_untouched_entry_is_evicted_after_retention() {
    let cache = cache();
    let key = books_key(0);
    cache.set(&key, 1u8, &cache.default_options());

    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(cache.peek(&key).is_some());
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.peek(&key).is_none());
    assert_eq!(cache.purge_expired(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peek_does_not_extend_retention_but_get_does() {
    let cache = cache();
    let options = cache.default_options();
    let peeked = books_key(0);
    let read = books_key(1);
    cache.set(&peeked, 1u8, &options);
    cache.set(&read, 2u8, &options);

    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(cache.peek(&peeked).is_some());
    let hit = cache
        .get(&read, || async { Ok::<_, FetchError>(99u8) }, &options)
        .await
        .unwrap();
    assert_eq!(*hit, 2);

    tokio::time::advance(Duration::from_secs(290)).await;
    assert!(cache.peek(&peeked).is_none());
    assert!(cache.peek(&read).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_is_noop_when_fresh_or_loading() {
    let cache = cache();
    let options = cache.default_options();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = books_key(1);

    assert!(cache.prefetch(&key, counting_fetcher(&calls, "p1", Duration::from_millis(50)), &options));
    assert!(!cache.prefetch(&key, counting_fetcher(&calls, "p1", Duration::from_millis(50)), &options));

    time::sleep(Duration::from_millis(100)).await;
    assert!(!cache.prefetch(&key, counting_fetcher(&calls, "p1", Duration::ZERO), &options));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.peek_value::<String>(&key).as_deref().map(String::as_str), Some("p1"));
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_failure_is_swallowed_and_capped() {
    let bus = core_runtime::events::EventBus::new(16);
    let mut events = bus.subscribe();
    let cache = QueryCache::with_event_bus(
        CacheConfig::default()
            .with_prefetch_retries(1)
            .with_sweep_interval(None),
        bus,
    )
    .unwrap();
    let key = books_key(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let options = QueryOptions::default().with_retries(5).with_retry_delay(Duration::from_millis(10));

    assert!(cache.prefetch(
        &key,
        move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>(FetchError::Transport("offline".into())) }
        },
        &options,
    ));
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let entry = cache.peek(&key).unwrap();
    assert!(!entry.has_value());
    assert!(entry.error().is_some());

    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        core_runtime::events::CoreEvent::Cache(core_runtime::events::CacheEvent::PrefetchFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_get_joins_running_prefetch() {
    let cache = cache();
    let options = cache.default_options();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = books_key(3);

    cache.prefetch(&key, counting_fetcher(&calls, "warm", Duration::from_millis(100)), &options);
    let value = cache
        .get(&key, counting_fetcher(&calls, "cold", Duration::ZERO), &options)
        .await
        .unwrap();

    assert_eq!(*value, "warm");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
