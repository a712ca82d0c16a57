//! Workflow-level error type
//!
//! Every component returns its own typed error. [`WorkflowError`] is the one
//! place those are mapped to an HTTP status, a stable `error_code` and a
//! sanitized message for the user-facing envelope.

use crate::agents::{AgentError, FetchError};
use crate::protocol::ErrorEnvelope;
use crate::rate_limit::RateLimited;
use crate::retry::RetryError;
use crate::validation::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum length of a user-visible error message
pub const MAX_MESSAGE_LEN: usize = 500;

/// Error taxonomy tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    RateLimited,
    TransientUpstreamError,
    TerminalUpstreamError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransientUpstreamError => "transient_upstream_error",
            ErrorKind::TerminalUpstreamError => "terminal_upstream_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one workflow request, ready for the error envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub status: u16,
    pub error_code: String,
    pub message: String,
    /// Seconds until a rate-limited caller may retry
    pub retry_after: Option<u64>,
}

impl WorkflowError {
    fn new(kind: ErrorKind, status: u16, error_code: &str, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            status,
            error_code: error_code.to_string(),
            message: sanitize_error_message(message.as_ref()),
            retry_after: None,
        }
    }

    pub fn validation(error: &ValidationError) -> Self {
        Self::new(ErrorKind::ValidationError, 400, error.code(), error.to_string())
    }

    pub fn rate_limited(limited: &RateLimited) -> Self {
        let mut error = Self::new(
            ErrorKind::RateLimited,
            429,
            "RATE_LIMITED",
            limited.to_string(),
        );
        error.retry_after = Some(limited.retry_after);
        error
    }

    pub fn fetch(error: &RetryError<FetchError>) -> Self {
        if error.is_exhausted() {
            return Self::new(
                ErrorKind::TransientUpstreamError,
                503,
                "FETCH_UNAVAILABLE",
                format!(
                    "Article could not be retrieved after {} attempts: {}",
                    error.attempts(),
                    error.inner()
                ),
            );
        }

        let inner = error.inner();
        let (status, code) = match inner {
            FetchError::NotFound(_) => (404, "ARTICLE_NOT_FOUND"),
            FetchError::Forbidden(_) => (422, "ARTICLE_FORBIDDEN"),
            FetchError::EmptyContent(_) => (422, "EMPTY_CONTENT"),
            FetchError::UpstreamStatus(_) => (422, "UPSTREAM_STATUS"),
            FetchError::Timeout(_) | FetchError::Unreachable(_) => {
                return Self::new(
                    ErrorKind::TransientUpstreamError,
                    503,
                    "FETCH_UNAVAILABLE",
                    inner.to_string(),
                )
            }
        };
        Self::new(ErrorKind::TerminalUpstreamError, status, code, inner.to_string())
    }

    pub fn agent(stage: &str, error: &RetryError<AgentError>) -> Self {
        if error.is_exhausted() {
            return Self::new(
                ErrorKind::TransientUpstreamError,
                503,
                "PROVIDER_UNAVAILABLE",
                format!(
                    "{stage} stage failed after {} attempts: {}",
                    error.attempts(),
                    error.inner()
                ),
            );
        }

        let inner = error.inner();
        let code = match inner {
            AgentError::MalformedResponse(_) => "MALFORMED_PROVIDER_RESPONSE",
            AgentError::ProviderRejected(_) => "PROVIDER_REJECTED",
            AgentError::ProviderRateLimited(_)
            | AgentError::ProviderError(_)
            | AgentError::Timeout(_) => {
                return Self::new(
                    ErrorKind::TransientUpstreamError,
                    503,
                    "PROVIDER_UNAVAILABLE",
                    format!("{stage} stage failed: {inner}"),
                )
            }
        };
        Self::new(
            ErrorKind::TerminalUpstreamError,
            502,
            code,
            format!("{stage} stage failed: {inner}"),
        )
    }

    /// The whole request ran past its deadline
    pub fn deadline(after: Duration) -> Self {
        Self::new(
            ErrorKind::TransientUpstreamError,
            503,
            "REQUEST_TIMEOUT",
            format!("Request not completed within {}s", after.as_secs()),
        )
    }

    /// Unanticipated failure; details are logged by the caller, never returned
    pub fn internal() -> Self {
        Self::new(
            ErrorKind::InternalError,
            500,
            "INTERNAL_ERROR",
            "An internal error occurred",
        )
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            message: self.message.clone(),
            error_code: self.error_code.clone(),
            retry_after: self.retry_after,
        }
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SENSITIVE_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

/// Redact secrets and sensitive paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }
    if let Some(pattern) = SENSITIVE_PATH_PATTERN.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}
