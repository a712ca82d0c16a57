//! Response cache over the shared store
//!
//! Entries are keyed by a SHA-256 digest of the pipeline version and the
//! normalized article URL only, so repeated requests for the same article
//! reuse earlier work whatever their message ids. The cache is best-effort:
//! store failures and undecodable entries read as a miss and writes that fail
//! are dropped, both with a warning.

use crate::clock::Clock;
use crate::observability::metrics::metrics;
use crate::protocol::WorkflowResult;
use crate::store::{KeySpace, SharedStore};
use crate::validation::NormalizedUrl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Version tag of the processing logic; bumping it invalidates cached results
pub const PIPELINE_VERSION: &str = "article-digest/1";

/// Stored form of a cached result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub result: WorkflowResult,
}

pub struct ResponseCache {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
    ttl: Duration,
    version: String,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        keys: KeySpace,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            ttl,
            version: PIPELINE_VERSION.to_string(),
        }
    }

    /// Use a different pipeline version tag
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store key for the article at `url`
    pub fn key_for(&self, url: &NormalizedUrl) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        hasher.update([0u8]);
        hasher.update(url.as_str().as_bytes());
        self.keys.cache_key(&format!("{:x}", hasher.finalize()))
    }

    /// Cached result for `key`, or `None` on miss, outage or a corrupt entry
    pub async fn get(&self, key: &str) -> Option<WorkflowResult> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics().cache_miss();
                return None;
            }
            Err(e) => {
                metrics().record_store_error();
                metrics().cache_miss();
                warn!(key = %key, backend = self.store.backend(), error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => {
                metrics().cache_hit();
                debug!(key = %key, created_at = %entry.created_at, "Cache hit");
                Some(entry.result)
            }
            Err(e) => {
                metrics().cache_miss();
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Overwrite the entry at `key`, expiring after `ttl` or the configured
    /// TTL when `None`. Failures are logged and swallowed.
    pub async fn put(&self, key: &str, result: &WorkflowResult, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.ttl);
        let entry = CacheEntry {
            created_at: self.clock.now(),
            ttl_secs: ttl.as_secs(),
            result: result.clone(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set_with_ttl(key, &raw, ttl).await {
            metrics().record_store_error();
            warn!(key = %key, backend = self.store.backend(), error = %e, "Cache write failed");
        }
    }
}
