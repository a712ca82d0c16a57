//! Retry with exponential backoff around outbound calls
//!
//! Every fetch and provider call goes through [`RetryExecutor::execute`] with
//! its own [`RetryPolicy`], so one stage's failures never spend another
//! stage's budget. Backoff sleeps go through the injected [`Clock`] and are
//! cooperative; dropping the returned future abandons the in-flight attempt
//! and stops the loop.

use crate::clock::Clock;
use crate::observability::metrics::metrics;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Upper bound of the random extra delay, as a fraction of the computed delay
const JITTER_FRACTION: f64 = 0.5;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// The error produced when a single attempt runs past its deadline
    fn deadline_exceeded(after: Duration) -> Self;
}

/// Backoff parameters for one class of outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    /// Deadline for each individual attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based),
    /// without jitter: `base_delay * multiplier^(attempt-1)`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Actual sleep after failed attempt `attempt`, given the previous sleep.
    ///
    /// Jitter adds up to half the backoff delay. The result never drops below
    /// `previous` and never exceeds `max_delay`.
    fn sleep_for(&self, attempt: u32, previous: Duration) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jittered = if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
            delay + delay.mul_f64(extra)
        } else {
            delay
        };
        jittered.max(previous).min(self.max_delay)
    }
}

/// Final failure of a retried call
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{last} (gave up after {attempts} attempts)")]
    RetriesExhausted { attempts: u32, last: E },
    #[error("{0}")]
    Terminal(E),
}

impl<E> RetryError<E> {
    pub fn inner(&self) -> &E {
        match self {
            RetryError::RetriesExhausted { last, .. } => last,
            RetryError::Terminal(e) => e,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::RetriesExhausted { last, .. } => last,
            RetryError::Terminal(e) => e,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::RetriesExhausted { attempts, .. } => *attempts,
            RetryError::Terminal(_) => 1,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::RetriesExhausted { .. })
    }
}

/// Runs fallible async operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Retry `op` using the error type's own classification
    pub async fn execute<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        label: &str,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(policy, label, op, E::is_retryable).await
    }

    /// Retry `op`, deciding retryability with `classify`
    pub async fn execute_with<T, E, F, Fut, C>(
        &self,
        policy: &RetryPolicy,
        label: &str,
        mut op: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        let mut previous_delay = Duration::ZERO;

        loop {
            attempt += 1;

            let outcome = match policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(E::deadline_exceeded(limit)),
                },
                None => op().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !classify(&err) {
                debug!(operation = label, attempt, error = %err, "Terminal failure, not retrying");
                return Err(RetryError::Terminal(err));
            }

            if attempt >= max_attempts {
                error!(
                    operation = label,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(RetryError::RetriesExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = policy.sleep_for(attempt, previous_delay);
            previous_delay = delay;
            warn!(
                operation = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );
            metrics().record_retry();
            self.clock.sleep(delay).await;
        }
    }
}
