//! Time source abstraction
//!
//! Rate-limit windows, store expiry and retry backoff all read time through
//! [`Clock`] so tests can drive them with a virtual clock instead of waiting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wall-clock reads and cooperative sleeps
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task without blocking the runtime thread
    async fn sleep(&self, duration: Duration);

    /// Whole seconds since the Unix epoch
    fn unix_seconds(&self) -> u64 {
        self.now().timestamp().max(0) as u64
    }
}

/// Production clock backed by the system time and `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
