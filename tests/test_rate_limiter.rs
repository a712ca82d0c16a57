//! Rate limiting across replicas sharing one store

use article_digest::clock::Clock;
use article_digest::rate_limit::RateLimiter;
use article_digest::store::{KeySpace, MemoryStore, SharedStore};
use article_digest::testing::ManualClock;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

fn replicas(
    count: usize,
    max_requests: u64,
) -> (Arc<ManualClock>, Arc<MemoryStore>, Vec<RateLimiter>) {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let limiters = (0..count)
        .map(|_| {
            RateLimiter::new(
                store.clone(),
                clock.clone(),
                KeySpace::new("article-digest"),
                max_requests,
                Duration::from_secs(60),
            )
        })
        .collect();
    (clock, store, limiters)
}

#[tokio::test]
async fn test_replicas_share_one_budget() {
    let (_clock, _store, limiters) = replicas(3, 5);

    let attempts = (0..30).map(|i| limiters[i % limiters.len()].allow("203.0.113.7"));
    let results = join_all(attempts).await;

    let admitted = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(admitted, 5);

    let counts: Vec<u64> = results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .map(|allowed| allowed.count)
        .collect();
    let mut sorted = counts.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_rejection_reports_time_to_next_window() {
    let (clock, _store, limiters) = replicas(2, 1);
    clock.advance(Duration::from_secs(45));

    assert!(limiters[0].allow("client").await.is_ok());
    let limited = limiters[1].allow("client").await.unwrap_err();
    assert_eq!(limited.retry_after, 15);
    assert_eq!(limited.limit, 1);

    clock.advance(Duration::from_secs(15));
    assert!(limiters[1].allow("client").await.is_ok());
}

#[tokio::test]
async fn test_window_counters_expire_from_store() {
    let (clock, store, limiters) = replicas(1, 2);

    limiters[0].allow("client").await.unwrap();
    let key = KeySpace::new("article-digest").rate_limit_key("client", clock.unix_seconds() / 60);
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("1"));

    clock.advance(Duration::from_secs(61));
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_past_windows_do_not_accumulate_in_memory_store() {
    let (clock, store, limiters) = replicas(1, 10);

    for _ in 0..1_000 {
        limiters[0].allow("10.0.0.1").await.unwrap();
        clock.advance(Duration::from_secs(60));
    }

    assert!(store.stored_len() <= article_digest::store::memory::SWEEP_EVERY as usize);
    assert!(store.keys().is_empty());
}
