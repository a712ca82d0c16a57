//! Mock implementations for testing
//!
//! Provides a scripted LLM provider, a scripted HTTP fetcher, a virtual clock
//! and an always-failing store so the pipeline can be exercised without
//! network access, API keys or a Redis server.

use crate::agents::{quality, summarizer, terminology, FetchError, HttpFetch, HttpResponse};
use crate::clock::Clock;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, MessageRole,
    TokenUsage,
};
use crate::store::{SharedStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Canned summary returned by [`MockLlmProvider::article_pipeline`]
pub const PIPELINE_SUMMARY: &str =
    "Daily low-dose aspirin reduced first cardiovascular events in adults over 50.";

type CompletionHandler =
    Box<dyn Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync>;

/// Mock LLM provider for testing
///
/// Every call is answered by a handler that sees the request and the zero-based
/// call index.
pub struct MockLlmProvider {
    handler: CompletionHandler,
    calls: AtomicUsize,
    healthy: bool,
}

impl MockLlmProvider {
    /// Cycle through `responses`
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_handler(move |_, call| {
            if responses.is_empty() {
                Ok("Mock response".to_string())
            } else {
                Ok(responses[call % responses.len()].clone())
            }
        })
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Every completion and health check fails with a retryable API error
    pub fn with_failure() -> Self {
        let mut provider =
            Self::with_handler(|_, _| Err(LlmError::ApiError("Mock LLM failure".to_string())));
        provider.healthy = false;
        provider
    }

    /// Play `script` in order; the last entry repeats once the script runs out
    pub fn scripted(script: Vec<Result<String, LlmError>>) -> Self {
        Self::with_handler(move |_, call| match script.get(call).or_else(|| script.last()) {
            Some(entry) => entry.clone(),
            None => Ok("Mock response".to_string()),
        })
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            healthy: true,
        }
    }

    /// Answers each content agent by its system prompt with a valid result
    pub fn article_pipeline() -> Self {
        Self::with_handler(|request, _| Ok(pipeline_answer(request)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Canned answer for whichever content agent sent `request`
pub fn pipeline_answer(request: &CompletionRequest) -> String {
    let system = request
        .messages
        .iter()
        .find(|message| message.role == MessageRole::System)
        .map(|message| message.content.as_str())
        .unwrap_or_default();

    if system == terminology::SYSTEM_PROMPT {
        json!({
            "aspirin": "A common pain reliever that also thins the blood",
            "cardiovascular event": "A heart attack or stroke"
        })
        .to_string()
    } else if system == quality::SYSTEM_PROMPT {
        json!({
            "study_design": {"rating": 4, "explanation": "Randomized controlled trial"},
            "sample_quality": {"rating": 3, "explanation": "Mostly white participants"},
            "statistical_rigor": {"rating": 4, "explanation": "Pre-specified endpoints"},
            "bias": {"rating": 3, "explanation": "Industry funding disclosed"},
            "evidence_level": {"rating": 5, "explanation": "Level 1 evidence"},
            "overall_score": {"rating": 4, "explanation": "Well-run trial with a narrow sample"},
            "key_limitations": ["Limited diversity"],
            "recommendations": ["Replicate in a broader population"]
        })
        .to_string()
    } else if system == summarizer::SYSTEM_PROMPT {
        PIPELINE_SUMMARY.to_string()
    } else {
        "Mock response".to_string()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let content = (self.handler)(&request, call)?;

        Ok(CompletionResponse {
            content: Some(content),
            model: request.model,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.healthy {
            Ok(())
        } else {
            Err(LlmError::ApiError("Mock health check failure".to_string()))
        }
    }
}

/// One scripted reply of [`MockHttpFetch`]
#[derive(Debug, Clone)]
pub enum MockReply {
    Page { status: u16, body: String },
    Redirected { status: u16, to: String, body: String },
    Fail(FetchError),
}

/// Scripted HTTP fetcher
///
/// Replies are served in order and the last one repeats.
#[derive(Debug)]
pub struct MockHttpFetch {
    script: Vec<MockReply>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockHttpFetch {
    pub fn new(script: Vec<MockReply>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Always answer 200 with `html`
    pub fn ok(html: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Page {
            status: 200,
            body: html.into(),
        }])
    }

    /// Always answer with an empty body and `status`
    pub fn status(status: u16) -> Self {
        Self::new(vec![MockReply::Page {
            status,
            body: String::new(),
        }])
    }

    pub fn failing(error: FetchError) -> Self {
        Self::new(vec![MockReply::Fail(error)])
    }

    /// Wait `delay` (tokio time) before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetch for MockHttpFetch {
    async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or(MockReply::Page {
                status: 200,
                body: String::new(),
            });

        match reply {
            MockReply::Page { status, body } => Ok(HttpResponse {
                status,
                final_url: url.to_string(),
                body,
            }),
            MockReply::Redirected { status, to, body } => Ok(HttpResponse {
                status,
                final_url: to,
                body,
            }),
            MockReply::Fail(error) => Err(error),
        }
    }
}

/// Virtual clock: sleeps return immediately after advancing time
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let (Ok(mut now), Ok(by)) = (self.now.lock(), chrono::Duration::from_std(by)) {
            *now += by;
        }
    }

    /// Every delay passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Store whose every operation fails as if the backend were down
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

impl FailingStore {
    fn down<T>() -> Result<T, StoreError> {
        Err(StoreError::Connection("store unavailable".to_string()))
    }
}

#[async_trait]
impl SharedStore for FailingStore {
    fn backend(&self) -> &str {
        "failing"
    }

    async fn incr_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
        Self::down()
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Self::down()
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Self::down()
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Self::down()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Self::down()
    }
}
