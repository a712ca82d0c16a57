//! Fixed-window rate limiter over the shared store
//!
//! Time is cut into non-overlapping windows of `window` length. Each request
//! atomically increments the counter for `(identity, current window)`; the
//! counter is created with an expiry of one window. Bursts straddling a
//! window boundary can reach twice the limit, which is accepted in exchange
//! for one store round-trip per request.
//!
//! A store outage fails open: the request is allowed and a warning logged.

use crate::clock::Clock;
use crate::observability::metrics::metrics;
use crate::store::{KeySpace, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Request admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowed {
    /// Requests counted in the current window, including this one
    pub count: u64,
    pub remaining: u64,
    /// True when the store was unreachable and the limiter failed open
    pub degraded: bool,
}

/// Request rejected for exceeding the window budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit of {limit} requests exceeded, retry after {retry_after}s")]
pub struct RateLimited {
    /// Seconds until the current window closes (always at least 1)
    pub retry_after: u64,
    pub limit: u64,
}

pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
    max_requests: u64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        keys: KeySpace,
        max_requests: u64,
        window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            max_requests,
            window_secs: window.as_secs().max(1),
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Count one request for `identity` and decide whether it may proceed
    pub async fn allow(&self, identity: &str) -> Result<Allowed, RateLimited> {
        let now = self.clock.unix_seconds();
        let window_index = now / self.window_secs;
        let key = self.keys.rate_limit_key(identity, window_index);

        let count = match self
            .store
            .incr_with_expiry(&key, Duration::from_secs(self.window_secs))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                metrics().record_store_error();
                warn!(
                    identity = %identity,
                    backend = self.store.backend(),
                    error = %e,
                    "Rate limiter store unavailable, allowing request"
                );
                return Ok(Allowed {
                    count: 0,
                    remaining: self.max_requests,
                    degraded: true,
                });
            }
        };

        if count > self.max_requests {
            let retry_after = self.window_secs - (now % self.window_secs);
            debug!(
                identity = %identity,
                count,
                limit = self.max_requests,
                retry_after,
                "Rate limit exceeded"
            );
            return Err(RateLimited {
                retry_after,
                limit: self.max_requests,
            });
        }

        Ok(Allowed {
            count,
            remaining: self.max_requests - count,
            degraded: false,
        })
    }
}
