//! Article digest
//!
//! A service that turns a health-article URL into a plain-language summary,
//! a glossary of medical terms and a research-quality assessment.
//!
//! # Overview
//!
//! Every request flows through one [`workflow::WorkflowCoordinator`]:
//! - URL validation against a domain allow-list
//! - Fixed-window rate limiting backed by a [`store::SharedStore`]
//! - A response cache keyed by the normalized URL
//! - Article fetching and readable-text extraction
//! - Summary, terminology and quality agents calling an LLM provider
//! - Retry with exponential backoff around every outbound call
//!
//! # Quick Start
//!
//! ```rust
//! use article_digest::protocol::WorkflowRequest;
//! use article_digest::validation::UrlValidator;
//!
//! let validator = UrlValidator::new(["cdc.gov"]);
//! let request = WorkflowRequest::for_url("https://WWW.CDC.GOV/flu/about/index.html#signs");
//!
//! let url = validator.validate(request.article_url().unwrap()).unwrap();
//! assert_eq!(url.as_str(), "https://www.cdc.gov/flu/about/index.html");
//!
//! assert!(validator.validate("ftp://www.cdc.gov/flu").is_err());
//! ```

pub mod agents;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod llm;
pub mod observability;
pub mod protocol;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod store;
pub mod testing;
pub mod text;
pub mod validation;
pub mod workflow;

pub use cache::ResponseCache;
pub use config::{AppConfig, ConfigError};
pub use error::{ErrorKind, WorkflowError};
pub use protocol::*;
pub use rate_limit::{RateLimited, RateLimiter};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use validation::{NormalizedUrl, UrlValidator, ValidationError};
pub use workflow::{Collaborators, WorkflowCoordinator, WorkflowOutcome};
