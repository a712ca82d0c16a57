//! Shared counter / key-value store
//!
//! All cross-request state (rate-limit windows and cached results) lives
//! behind [`SharedStore`]. In-process components never hold that state
//! themselves; they only call the store's atomic primitives, so any number of
//! service replicas can share one backend.
//!
//! ```rust
//! use article_digest::store::{KeySpace, MemoryStore, SharedStore};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let key = KeySpace::default().rate_limit_key("203.0.113.7", 28_000_000);
//!
//! assert_eq!(store.incr_with_expiry(&key, Duration::from_secs(60)).await.unwrap(), 1);
//! assert_eq!(store.incr_with_expiry(&key, Duration::from_secs(60)).await.unwrap(), 2);
//! assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("2"));
//! # });
//! ```

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Store operation failures
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),
    #[error("Store command failed: {0}")]
    Command(String),
    #[error("Value at '{0}' is not a counter")]
    NotACounter(String),
}

/// Narrow interface over an external store with atomic primitives
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Backend name for logs and health reports
    fn backend(&self) -> &str;

    /// Atomically increment the counter at `key` and return the new value.
    ///
    /// When the increment creates the counter, its expiry is set to `ttl` in
    /// the same atomic operation. Existing counters keep their expiry.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally overwrite `key` with `value`, expiring after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Key naming for the two keyspaces sharing one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}:rate_limit:{identity}:{window}`
    pub fn rate_limit_key(&self, identity: &str, window: u64) -> String {
        format!("{}:rate_limit:{}:{}", self.prefix, identity, window)
    }

    /// `{prefix}:cache:{digest}`
    pub fn cache_key(&self, digest: &str) -> String {
        format!("{}:cache:{}", self.prefix, digest)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("article-digest")
    }
}

/// Whole seconds for store TTLs; stores reject a zero expiry
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
