//! Pipeline agents
//!
//! [`fetcher::ArticleFetcher`] turns a validated URL into [`RawContent`]; the
//! three content agents turn that content into one part of the final result
//! each. Every outbound call goes through the retry executor with the agent's
//! own policy.

pub mod fetcher;
pub mod quality;
pub mod summarizer;
pub mod terminology;

pub use fetcher::{ArticleFetcher, HttpFetch, HttpResponse, ReqwestFetch};
pub use quality::QualityAgent;
pub use summarizer::Summarizer;
pub use terminology::TerminologyAgent;

use crate::llm::provider::{CompletionRequest, LlmError, LlmProvider, Message, ResponseFormat};
use crate::observability::metrics::metrics;
use crate::retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
use crate::validation::NormalizedUrl;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Extracted article text handed to the content agents
#[derive(Debug, Clone, PartialEq)]
pub struct RawContent {
    pub url: NormalizedUrl,
    pub title: Option<String>,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

/// Article retrieval failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Article not found: {0}")]
    NotFound(String),
    #[error("Access to article forbidden: {0}")]
    Forbidden(String),
    #[error("Article fetch timed out: {0}")]
    Timeout(String),
    #[error("Article source unreachable: {0}")]
    Unreachable(String),
    #[error("No readable content at {0}")]
    EmptyContent(String),
    #[error("Article source answered with status {0}")]
    UpstreamStatus(u16),
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Unreachable(_))
    }

    fn deadline_exceeded(after: Duration) -> Self {
        FetchError::Timeout(format!("no response within {}ms", after.as_millis()))
    }
}

/// Content agent failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Language model provider rate limited the request: {0}")]
    ProviderRateLimited(String),
    #[error("Language model provider error: {0}")]
    ProviderError(String),
    #[error("Language model call timed out: {0}")]
    Timeout(String),
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),
}

impl Retryable for AgentError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderRateLimited(_) | AgentError::ProviderError(_) | AgentError::Timeout(_)
        )
    }

    fn deadline_exceeded(after: Duration) -> Self {
        AgentError::Timeout(format!("no completion within {}ms", after.as_millis()))
    }
}

impl From<LlmError> for AgentError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::RateLimitExceeded(msg) => AgentError::ProviderRateLimited(msg),
            LlmError::ApiError(msg) | LlmError::NetworkError(msg) => AgentError::ProviderError(msg),
            LlmError::Timeout(msg) => AgentError::Timeout(msg),
            LlmError::InvalidResponse(msg) => AgentError::MalformedResponse(msg),
            LlmError::NotConfigured(msg)
            | LlmError::AuthenticationFailed(msg)
            | LlmError::ModelNotFound(msg)
            | LlmError::InvalidRequest(msg) => AgentError::ProviderRejected(msg),
        }
    }
}

/// Result of a retried agent call
pub type AgentResult<T> = Result<T, RetryError<AgentError>>;

/// A stage that turns fetched content into one part of the result
#[async_trait]
pub trait ContentAgent: Send + Sync {
    type Output: Send;

    /// Stage name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn process(&self, content: &RawContent) -> AgentResult<Self::Output>;
}

/// Model settings shared by the content agents
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Sends one prompt through the retry executor and returns the raw text
#[derive(Clone)]
pub struct PromptRunner {
    provider: Arc<dyn LlmProvider>,
    retry: RetryExecutor,
    policy: RetryPolicy,
}

impl PromptRunner {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryExecutor, policy: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            policy,
        }
    }

    pub async fn run(
        &self,
        stage: &'static str,
        settings: &ModelSettings,
        system_prompt: &str,
        content: &RawContent,
        format: ResponseFormat,
    ) -> AgentResult<String> {
        let request = CompletionRequest {
            messages: vec![Message::system(system_prompt), Message::user(&content.text)],
            model: settings.model.clone(),
            max_tokens: Some(settings.max_tokens),
            temperature: Some(settings.temperature),
            response_format: format,
        };

        let started = Instant::now();
        let result = self
            .retry
            .execute(&self.policy, stage, || {
                let request = request.clone();
                async move {
                    let response = self.provider.complete(request).await?;
                    response
                        .content
                        .filter(|text| !text.trim().is_empty())
                        .ok_or_else(|| {
                            AgentError::MalformedResponse("provider returned no content".to_string())
                        })
                }
            })
            .await;

        metrics().stage_executed(stage, started.elapsed(), result.is_ok());
        result
    }
}

/// Strip a surrounding markdown code fence some models wrap JSON in
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    inner.trim()
}
