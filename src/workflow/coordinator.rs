//! Workflow coordinator
//!
//! Holds only shared, immutable collaborators. All per-request state lives in
//! the [`WorkflowRun`] built inside [`WorkflowCoordinator::process`], so one
//! coordinator serves any number of concurrent requests.

use super::{Stage, WorkflowOutcome, WorkflowRun};
use crate::agents::{
    ArticleFetcher, ContentAgent, HttpFetch, ModelSettings, PromptRunner, QualityAgent,
    RawContent, Summarizer, TerminologyAgent,
};
use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::WorkflowError;
use crate::llm::provider::LlmProvider;
use crate::observability::metrics::metrics;
use crate::protocol::{WorkflowData, WorkflowRequest, WorkflowResponse, WorkflowResult};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryExecutor;
use crate::store::{KeySpace, SharedStore};
use crate::validation::{NormalizedUrl, UrlValidator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// External collaborators the pipeline runs against
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SharedStore>,
    pub clock: Arc<dyn Clock>,
    pub provider: Arc<dyn LlmProvider>,
    pub http: Arc<dyn HttpFetch>,
    pub validator: Arc<UrlValidator>,
}

pub struct WorkflowCoordinator {
    validator: Arc<UrlValidator>,
    rate_limiter: Option<RateLimiter>,
    cache: Option<ResponseCache>,
    fetcher: ArticleFetcher,
    summarizer: Summarizer,
    terminology: TerminologyAgent,
    quality: QualityAgent,
    concurrent_agents: bool,
}

impl WorkflowCoordinator {
    /// Coordinator without rate limiting or caching
    pub fn new(
        validator: Arc<UrlValidator>,
        fetcher: ArticleFetcher,
        summarizer: Summarizer,
        terminology: TerminologyAgent,
        quality: QualityAgent,
    ) -> Self {
        Self {
            validator,
            rate_limiter: None,
            cache: None,
            fetcher,
            summarizer,
            terminology,
            quality,
            concurrent_agents: true,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run the three content agents concurrently (default) or one after another
    pub fn with_concurrent_agents(mut self, concurrent: bool) -> Self {
        self.concurrent_agents = concurrent;
        self
    }

    /// Wire the full pipeline from configuration
    pub fn from_config(config: &AppConfig, deps: Collaborators) -> Self {
        let retry = RetryExecutor::new(deps.clock.clone());
        let policy = config.retry.policy();
        let keys = KeySpace::new(config.store.key_prefix.clone());

        let fetcher = ArticleFetcher::new(
            deps.http,
            deps.validator.clone(),
            retry.clone(),
            policy.clone(),
            config.fetch.max_content_chars,
        );
        let runner = PromptRunner::new(deps.provider, retry, policy);
        let summary_settings = ModelSettings {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.summary_max_tokens,
        };
        let analysis_settings = ModelSettings {
            max_tokens: config.llm.analysis_max_tokens,
            ..summary_settings.clone()
        };

        let mut coordinator = Self::new(
            deps.validator,
            fetcher,
            Summarizer::new(runner.clone(), summary_settings),
            TerminologyAgent::new(runner.clone(), analysis_settings.clone()),
            QualityAgent::new(runner, analysis_settings),
        )
        .with_concurrent_agents(config.pipeline.concurrent_agents);

        if config.rate_limit.enabled {
            coordinator = coordinator.with_rate_limiter(RateLimiter::new(
                deps.store.clone(),
                deps.clock.clone(),
                keys.clone(),
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_secs),
            ));
        }
        if config.cache.enabled {
            coordinator = coordinator.with_cache(ResponseCache::new(
                deps.store,
                deps.clock,
                keys,
                Duration::from_secs(config.cache.ttl_secs),
            ));
        }
        coordinator
    }

    /// Process one request on behalf of `identity` (usually the client address)
    pub async fn process(&self, request: &WorkflowRequest, identity: &str) -> WorkflowOutcome {
        let span = crate::workflow_span!(
            message_id = %request.message_id,
            conversation_id = %request.conversation_id,
            sender = ?request.sender_agent
        );

        async {
            metrics().request_received();
            let started = Instant::now();
            let mut run = WorkflowRun::new();

            let result = self.run_stages(request, identity, &mut run).await;
            match &result {
                Ok(response) => {
                    run.enter(Stage::Completed);
                    metrics().request_completed(started.elapsed());
                    info!(
                        url = %response.data.url,
                        cached = response.data.cached,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Workflow completed"
                    );
                }
                Err(e) => {
                    run.enter(Stage::Errored { kind: e.kind });
                    metrics().request_failed(e.kind.as_str(), started.elapsed());
                    warn!(
                        kind = %e.kind,
                        error_code = %e.error_code,
                        status = e.status,
                        stages = ?run.stages(),
                        "Workflow failed: {}",
                        e.message
                    );
                }
            }

            WorkflowOutcome { run, result }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        request: &WorkflowRequest,
        identity: &str,
        run: &mut WorkflowRun,
    ) -> Result<WorkflowResponse, WorkflowError> {
        run.enter(Stage::Validating);
        let url = self.validate(request)?;

        run.enter(Stage::RateChecking);
        if let Some(limiter) = &self.rate_limiter {
            if let Err(limited) = limiter.allow(identity).await {
                metrics().rate_limited();
                return Err(WorkflowError::rate_limited(&limited));
            }
        }

        run.enter(Stage::CacheChecking);
        let cache_key = self.cache.as_ref().map(|cache| cache.key_for(&url));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(result) = cache.get(key).await {
                run.mark_cache_hit();
                debug!(url = %url, "Serving cached result");
                return Ok(self.respond(request, &url, true, result));
            }
        }

        run.enter(Stage::Fetching);
        let content = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| WorkflowError::fetch(&e))?;

        run.enter(Stage::Processing);
        let result = self.run_agents(&content).await?;

        run.enter(Stage::Caching);
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.put(key, &result, None).await;
        }

        Ok(self.respond(request, &url, false, result))
    }

    fn validate(&self, request: &WorkflowRequest) -> Result<NormalizedUrl, WorkflowError> {
        let raw = request
            .article_url()
            .map_err(|e| WorkflowError::validation(&e))?;
        self.validator
            .validate(raw)
            .map_err(|e| WorkflowError::validation(&e))
    }

    /// Fan out to the content agents; the first failure cancels the others
    async fn run_agents(&self, content: &RawContent) -> Result<WorkflowResult, WorkflowError> {
        if self.concurrent_agents {
            let (summary, terminology, quality_assessment) = tokio::try_join!(
                run_agent(&self.summarizer, content),
                run_agent(&self.terminology, content),
                run_agent(&self.quality, content),
            )?;
            return Ok(WorkflowResult {
                summary,
                terminology,
                quality_assessment,
            });
        }

        Ok(WorkflowResult {
            summary: run_agent(&self.summarizer, content).await?,
            terminology: run_agent(&self.terminology, content).await?,
            quality_assessment: run_agent(&self.quality, content).await?,
        })
    }

    fn respond(
        &self,
        request: &WorkflowRequest,
        url: &NormalizedUrl,
        cached: bool,
        result: WorkflowResult,
    ) -> WorkflowResponse {
        WorkflowResponse::success(WorkflowData {
            message_id: request.message_id,
            conversation_id: request.conversation_id,
            url: url.to_string(),
            cached,
            result,
        })
    }
}

async fn run_agent<A: ContentAgent>(
    agent: &A,
    content: &RawContent,
) -> Result<A::Output, WorkflowError> {
    let span = crate::stage_span!(stage = agent.name());
    agent
        .process(content)
        .instrument(span)
        .await
        .map_err(|e| WorkflowError::agent(agent.name(), &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use crate::testing::{ManualClock, MockHttpFetch, MockLlmProvider};

    const ARTICLE: &str = "<html><head><title>Aspirin trial</title></head><body><article>\
        <h1>Aspirin and heart health</h1><p>A randomized trial of 19,000 adults found that \
        daily low-dose aspirin reduced first cardiovascular events.</p></article></body></html>";

    fn coordinator(
        http: Arc<MockHttpFetch>,
        provider: Arc<MockLlmProvider>,
    ) -> (Arc<MemoryStore>, WorkflowCoordinator) {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let mut config = AppConfig::default();
        config.retry.jitter = false;
        let coordinator = WorkflowCoordinator::from_config(
            &config,
            Collaborators {
                store: store.clone(),
                clock,
                provider,
                http,
                validator: Arc::new(UrlValidator::default()),
            },
        );
        (store, coordinator)
    }

    #[tokio::test]
    async fn test_full_path_then_cache_hit() {
        let http = Arc::new(MockHttpFetch::ok(ARTICLE));
        let provider = Arc::new(MockLlmProvider::article_pipeline());
        let (_store, coordinator) = coordinator(http.clone(), provider.clone());
        let request = WorkflowRequest::for_url("https://www.health.harvard.edu/some-article");

        let first = coordinator.process(&request, "10.0.0.1").await;
        assert_eq!(
            first.run.stages(),
            &[
                Stage::Validating,
                Stage::RateChecking,
                Stage::CacheChecking,
                Stage::Fetching,
                Stage::Processing,
                Stage::Caching,
                Stage::Completed,
            ]
        );
        let response = first.result.unwrap();
        assert!(!response.data.cached);
        assert_eq!(provider.call_count(), 3);

        let second = coordinator.process(&request, "10.0.0.1").await;
        assert!(second.run.cache_hit());
        assert!(!second.run.visited(Stage::Fetching));
        let cached = second.result.unwrap();
        assert!(cached.data.cached);
        assert_eq!(cached.data.result, response.data.result);
        assert_eq!(http.call_count(), 1);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_sequential_agents_produce_same_result() {
        let clock = Arc::new(ManualClock::new());
        let http = Arc::new(MockHttpFetch::ok(ARTICLE));
        let provider = Arc::new(MockLlmProvider::article_pipeline());
        let validator = Arc::new(UrlValidator::default());
        let retry = RetryExecutor::new(clock);
        let runner = PromptRunner::new(provider, retry.clone(), RetryPolicy::default());
        let settings = ModelSettings {
            model: "mock-model".to_string(),
            temperature: 0.3,
            max_tokens: 500,
        };
        let coordinator = WorkflowCoordinator::new(
            validator.clone(),
            ArticleFetcher::new(http, validator, retry, RetryPolicy::default(), 10_000),
            Summarizer::new(runner.clone(), settings.clone()),
            TerminologyAgent::new(runner.clone(), settings.clone()),
            QualityAgent::new(runner, settings),
        )
        .with_concurrent_agents(false);

        let outcome = coordinator
            .process(&WorkflowRequest::for_url("https://www.cdc.gov/aspirin"), "client")
            .await;
        let result = outcome.result.unwrap().data.result;
        assert!(!result.summary.is_empty());
        assert!(!result.terminology.is_empty());
        assert_eq!(result.quality_assessment.overall_score.rating, "3.8");
    }

    #[tokio::test]
    async fn test_invalid_url_touches_nothing() {
        let http = Arc::new(MockHttpFetch::ok(ARTICLE));
        let provider = Arc::new(MockLlmProvider::article_pipeline());
        let (store, coordinator) = coordinator(http.clone(), provider.clone());

        let outcome = coordinator
            .process(&WorkflowRequest::for_url("ftp://example.com/x"), "client")
            .await;
        assert_eq!(outcome.status(), 400);
        assert_eq!(
            outcome.run.current(),
            Some(Stage::Errored {
                kind: ErrorKind::ValidationError
            })
        );
        assert_eq!(outcome.result.unwrap_err().error_code, "BAD_SCHEME");
        assert!(store.keys().is_empty());
        assert_eq!(http.call_count(), 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_agent_output_is_not_cached() {
        let http = Arc::new(MockHttpFetch::ok(ARTICLE));
        let provider = Arc::new(MockLlmProvider::single_response("not json at all"));
        let (store, coordinator) = coordinator(http, provider);

        let outcome = coordinator
            .process(&WorkflowRequest::for_url("https://www.cdc.gov/aspirin"), "client")
            .await;
        assert_eq!(outcome.status(), 502);
        assert!(outcome.run.visited(Stage::Processing));
        assert!(!outcome.run.visited(Stage::Caching));
        assert!(store.keys().iter().all(|key| !key.contains(":cache:")));
    }
}
