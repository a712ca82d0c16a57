//! End-to-end workflow tests
//!
//! Drives the coordinator built from configuration against scripted HTTP and
//! LLM collaborators, an in-memory store and a virtual clock.

use article_digest::agents::FetchError;
use article_digest::config::AppConfig;
use article_digest::error::ErrorKind;
use article_digest::llm::provider::LlmError;
use article_digest::protocol::WorkflowRequest;
use article_digest::store::{MemoryStore, SharedStore};
use article_digest::testing::{
    pipeline_answer, FailingStore, ManualClock, MockHttpFetch, MockLlmProvider, MockReply,
    PIPELINE_SUMMARY,
};
use article_digest::validation::UrlValidator;
use article_digest::workflow::{Collaborators, Stage, WorkflowCoordinator};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

const ARTICLE: &str = r#"<html>
<head><title>Aspirin for prevention</title></head>
<body>
  <nav>Home | Topics | Subscribe</nav>
  <article>
    <h1>Should you take a daily aspirin?</h1>
    <p>A randomized trial of 19,000 adults over 50 found that daily low-dose aspirin
    reduced first heart attacks and strokes, at the cost of more bleeding.</p>
    <p>Doctors now weigh cardiovascular benefit against bleeding risk for each patient.</p>
  </article>
  <footer>Copyright Harvard Health Publishing</footer>
</body>
</html>"#;

const ARTICLE_URL: &str = "https://www.health.harvard.edu/blog/daily-aspirin";

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    http: Arc<MockHttpFetch>,
    provider: Arc<MockLlmProvider>,
    coordinator: WorkflowCoordinator,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.jitter = false;
    config
}

fn harness(config: AppConfig, http: MockHttpFetch, provider: MockLlmProvider) -> Harness {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 10).unwrap(),
    ));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let http = Arc::new(http);
    let provider = Arc::new(provider);
    let coordinator = WorkflowCoordinator::from_config(
        &config,
        Collaborators {
            store: store.clone(),
            clock: clock.clone(),
            provider: provider.clone(),
            http: http.clone(),
            validator: Arc::new(config.validation.build_validator().unwrap()),
        },
    );
    Harness {
        clock,
        store,
        http,
        provider,
        coordinator,
    }
}

fn cache_keys(store: &MemoryStore) -> Vec<String> {
    store
        .keys()
        .into_iter()
        .filter(|key| key.contains(":cache:"))
        .collect()
}

#[tokio::test]
async fn test_article_is_processed_then_served_from_cache() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::article_pipeline(),
    );
    let request = WorkflowRequest::for_url(ARTICLE_URL);

    let first = h.coordinator.process(&request, "203.0.113.7").await;
    assert_eq!(first.status(), 200);
    let response = first.result.unwrap();
    assert!(response.success);
    assert!(!response.data.cached);
    assert_eq!(response.data.url, ARTICLE_URL);
    assert_eq!(response.data.conversation_id, request.conversation_id);
    assert_eq!(response.data.message_id, request.message_id);

    let result = &response.data.result;
    assert_eq!(result.summary, PIPELINE_SUMMARY);
    assert!(result.terminology.contains_key("aspirin"));
    assert_eq!(result.quality_assessment.overall_score.rating, "3.8");
    assert_eq!(result.quality_assessment.key_limitations, vec!["Limited diversity"]);
    assert_eq!(h.http.call_count(), 1);
    assert_eq!(h.provider.call_count(), 3);
    assert_eq!(cache_keys(&h.store).len(), 1);

    // Same article, different client and spelling: served from cache
    let again = WorkflowRequest::for_url("https://WWW.Health.Harvard.edu/blog/daily-aspirin#top");
    let second = h.coordinator.process(&again, "198.51.100.2").await;
    assert!(second.run.cache_hit());
    assert_eq!(
        second.run.stages(),
        &[
            Stage::Validating,
            Stage::RateChecking,
            Stage::CacheChecking,
            Stage::Completed
        ]
    );
    let cached = second.result.unwrap();
    assert!(cached.data.cached);
    assert_eq!(cached.data.conversation_id, again.conversation_id);
    assert_eq!(&cached.data.result, result);
    assert_eq!(h.http.call_count(), 1);
    assert_eq!(h.provider.call_count(), 3);
}

#[tokio::test]
async fn test_cache_entry_expires() {
    let mut config = test_config();
    config.cache.ttl_secs = 60;
    let h = harness(
        config,
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::article_pipeline(),
    );
    let request = WorkflowRequest::for_url(ARTICLE_URL);

    assert_eq!(h.coordinator.process(&request, "a").await.status(), 200);
    h.clock.advance(Duration::from_secs(61));
    let outcome = h.coordinator.process(&request, "a").await;

    assert!(!outcome.run.cache_hit());
    assert!(!outcome.result.unwrap().data.cached);
    assert_eq!(h.http.call_count(), 2);
    assert_eq!(h.provider.call_count(), 6);
}

#[tokio::test]
async fn test_bad_scheme_is_rejected_before_any_state_change() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::article_pipeline(),
    );

    let outcome = h
        .coordinator
        .process(&WorkflowRequest::for_url("ftp://example.com/article"), "a")
        .await;

    assert_eq!(outcome.status(), 400);
    let error = outcome.result.unwrap_err();
    assert_eq!(error.kind, ErrorKind::ValidationError);
    assert_eq!(error.error_code, "BAD_SCHEME");
    assert!(!outcome.run.visited(Stage::RateChecking));
    assert!(h.store.keys().is_empty());
    assert_eq!(h.http.call_count(), 0);
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn test_domain_outside_allow_list_is_rejected() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::article_pipeline(),
    );

    for url in [
        "https://example.com/health",
        "https://evilcdc.gov/flu",
        "https://cdc.gov.evil.com/flu",
    ] {
        let outcome = h
            .coordinator
            .process(&WorkflowRequest::for_url(url), "a")
            .await;
        assert_eq!(outcome.status(), 400, "{url}");
        assert_eq!(outcome.result.unwrap_err().error_code, "DISALLOWED_DOMAIN");
    }
    assert!(h.store.keys().is_empty());
}

#[tokio::test]
async fn test_unsupported_payload_is_rejected() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::article_pipeline(),
    );
    let mut request = WorkflowRequest::for_url(ARTICLE_URL);
    request.payload_type = "text".to_string();

    let outcome = h.coordinator.process(&request, "a").await;
    assert_eq!(outcome.status(), 400);
    assert_eq!(outcome.result.unwrap_err().error_code, "UNSUPPORTED_PAYLOAD");
}

#[tokio::test]
async fn test_missing_article_is_not_retried_or_cached() {
    let h = harness(
        test_config(),
        MockHttpFetch::status(404),
        MockLlmProvider::article_pipeline(),
    );

    let outcome = h
        .coordinator
        .process(&WorkflowRequest::for_url(ARTICLE_URL), "a")
        .await;

    assert_eq!(outcome.status(), 404);
    let error = outcome.result.unwrap_err();
    assert_eq!(error.kind, ErrorKind::TerminalUpstreamError);
    assert_eq!(error.error_code, "ARTICLE_NOT_FOUND");
    assert_eq!(h.http.call_count(), 1);
    assert!(h.clock.sleeps().is_empty());
    assert_eq!(h.provider.call_count(), 0);
    assert!(cache_keys(&h.store).is_empty());
}

#[tokio::test]
async fn test_unreachable_site_exhausts_retries() {
    let h = harness(
        test_config(),
        MockHttpFetch::failing(FetchError::Unreachable("connection refused".to_string())),
        MockLlmProvider::article_pipeline(),
    );

    let outcome = h
        .coordinator
        .process(&WorkflowRequest::for_url(ARTICLE_URL), "a")
        .await;

    assert_eq!(outcome.status(), 503);
    let error = outcome.result.unwrap_err();
    assert_eq!(error.kind, ErrorKind::TransientUpstreamError);
    assert_eq!(error.error_code, "FETCH_UNAVAILABLE");
    assert_eq!(h.http.call_count(), 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert!(cache_keys(&h.store).is_empty());
}

#[tokio::test]
async fn test_transient_fetch_failure_recovers() {
    let h = harness(
        test_config(),
        MockHttpFetch::new(vec![
            MockReply::Page {
                status: 503,
                body: String::new(),
            },
            MockReply::Page {
                status: 200,
                body: ARTICLE.to_string(),
            },
        ]),
        MockLlmProvider::article_pipeline(),
    );

    let outcome = h
        .coordinator
        .process(&WorkflowRequest::for_url(ARTICLE_URL), "a")
        .await;

    assert_eq!(outcome.status(), 200);
    assert_eq!(h.http.call_count(), 2);
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_fourth_request_in_window_is_rate_limited() {
    let mut config = test_config();
    config.rate_limit.max_requests = 3;
    config.rate_limit.window_secs = 60;
    let h = harness(
        config,
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::article_pipeline(),
    );
    let request = WorkflowRequest::for_url(ARTICLE_URL);

    for _ in 0..3 {
        assert_eq!(h.coordinator.process(&request, "203.0.113.7").await.status(), 200);
    }

    let limited = h.coordinator.process(&request, "203.0.113.7").await;
    assert_eq!(limited.status(), 429);
    let error = limited.result.unwrap_err();
    assert_eq!(error.kind, ErrorKind::RateLimited);
    // clock sits 10s into a 60s window
    assert_eq!(error.retry_after, Some(50));
    assert!(!limited.run.visited(Stage::CacheChecking));

    // Other clients keep their own budget
    assert_eq!(h.coordinator.process(&request, "198.51.100.2").await.status(), 200);

    // The next window starts fresh
    h.clock.advance(Duration::from_secs(50));
    assert_eq!(h.coordinator.process(&request, "203.0.113.7").await.status(), 200);
}

#[tokio::test]
async fn test_provider_hiccup_is_retried_per_agent() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::with_handler(|request, call| {
            if call == 0 {
                Err(LlmError::RateLimitExceeded("slow down".to_string()))
            } else {
                Ok(pipeline_answer(request))
            }
        }),
    );

    let outcome = h
        .coordinator
        .process(&WorkflowRequest::for_url(ARTICLE_URL), "a")
        .await;

    assert_eq!(outcome.status(), 200);
    assert_eq!(h.provider.call_count(), 4);
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_provider_outage_fails_without_caching() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE),
        MockLlmProvider::with_failure(),
    );

    let outcome = h
        .coordinator
        .process(&WorkflowRequest::for_url(ARTICLE_URL), "a")
        .await;

    assert_eq!(outcome.status(), 503);
    let error = outcome.result.unwrap_err();
    assert_eq!(error.error_code, "PROVIDER_UNAVAILABLE");
    assert!(error.message.contains("3 attempts"));
    assert!(cache_keys(&h.store).is_empty());
}

#[tokio::test]
async fn test_store_outage_degrades_gracefully() {
    let config = test_config();
    let clock = Arc::new(ManualClock::new());
    let http = Arc::new(MockHttpFetch::ok(ARTICLE));
    let provider = Arc::new(MockLlmProvider::article_pipeline());
    let store: Arc<dyn SharedStore> = Arc::new(FailingStore);
    let coordinator = WorkflowCoordinator::from_config(
        &config,
        Collaborators {
            store,
            clock,
            provider: provider.clone(),
            http: http.clone(),
            validator: Arc::new(UrlValidator::default()),
        },
    );
    let request = WorkflowRequest::for_url(ARTICLE_URL);

    let first = coordinator.process(&request, "a").await;
    let second = coordinator.process(&request, "a").await;

    assert!(!first.result.unwrap().data.cached);
    assert!(!second.result.unwrap().data.cached);
    assert_eq!(http.call_count(), 2);
    assert_eq!(provider.call_count(), 6);
}

#[tokio::test]
async fn test_dropped_request_abandons_pipeline() {
    let h = harness(
        test_config(),
        MockHttpFetch::ok(ARTICLE).with_delay(Duration::from_secs(5)),
        MockLlmProvider::article_pipeline(),
    );
    let request = WorkflowRequest::for_url(ARTICLE_URL);

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        h.coordinator.process(&request, "a"),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(h.http.call_count(), 1);
    assert_eq!(h.provider.call_count(), 0);
    assert!(cache_keys(&h.store).is_empty());
}
