//! Health check system for production monitoring
//!
//! Provides health check traits and implementations for the LLM provider and
//! the shared store.

use crate::llm::provider::LlmProvider;
use crate::store::SharedStore;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    /// Whether an unhealthy result makes the whole service unhealthy
    pub critical: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform health check on this component
    async fn health_check(&self) -> HealthCheckResult;

    /// Get the component name for reporting
    fn component_name(&self) -> &str;
}

/// LLM provider health check implementation
pub struct LlmProviderHealthCheck {
    llm_provider: Arc<dyn LlmProvider>,
}

impl LlmProviderHealthCheck {
    pub fn new(llm_provider: Arc<dyn LlmProvider>) -> Self {
        Self { llm_provider }
    }
}

#[async_trait]
impl HealthCheck for LlmProviderHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let component = self.component_name().to_string();
        let provider = self.llm_provider.name();

        let (healthy, message) = match self.llm_provider.health_check().await {
            Ok(()) => (true, format!("{provider} provider healthy")),
            Err(e) => {
                warn!(provider = %provider, error = %e, "LLM provider health check failed");
                (false, format!("{provider} provider error: {e}"))
            }
        };
        let response_time_ms = start.elapsed().as_millis() as u64;
        debug!(provider = %provider, healthy, response_time_ms, "LLM provider health check");

        HealthCheckResult {
            component,
            healthy,
            critical: true,
            message: Some(message),
            response_time_ms: Some(response_time_ms),
        }
    }

    fn component_name(&self) -> &str {
        "llm_provider"
    }
}

/// Shared store health check
///
/// Not critical: rate limiting and caching degrade instead of failing when the
/// store is down, so the service keeps answering.
pub struct StoreHealthCheck {
    store: Arc<dyn SharedStore>,
}

impl StoreHealthCheck {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StoreHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let backend = self.store.backend();

        let (healthy, message) = match self.store.ping().await {
            Ok(()) => (true, format!("{backend} store reachable")),
            Err(e) => {
                warn!(backend = %backend, error = %e, "Store health check failed");
                (false, format!("{backend} store error: {e}"))
            }
        };

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy,
            critical: false,
            message: Some(message),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn component_name(&self) -> &str {
        "shared_store"
    }
}

/// Aggregated health check manager
#[derive(Default)]
pub struct HealthCheckManager {
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a health check to the manager
    pub fn add_health_check(&mut self, health_check: Box<dyn HealthCheck>) {
        self.health_checks.push(health_check);
    }

    /// Run all health checks and return their results
    pub async fn run_health_checks(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());
        for health_check in &self.health_checks {
            results.push(health_check.health_check().await);
        }
        results
    }

    /// Overall health: every critical component must be healthy
    pub fn overall_health(results: &[HealthCheckResult]) -> bool {
        results.iter().filter(|r| r.critical).all(|r| r.healthy)
    }

    /// Run all checks and reduce them to one status
    pub async fn calculate_overall_health(&self) -> bool {
        let results = self.run_health_checks().await;
        if results.is_empty() {
            warn!("No health checks configured - assuming healthy");
            return true;
        }

        let overall_healthy = Self::overall_health(&results);
        debug!(
            healthy = results.iter().filter(|r| r.healthy).count(),
            total = results.len(),
            overall_healthy,
            "Overall health check"
        );
        overall_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::mocks::{FailingStore, MockLlmProvider};

    #[tokio::test]
    async fn test_llm_provider_health_check_healthy() {
        let llm_provider = Arc::new(MockLlmProvider::single_response("test"));
        let result = LlmProviderHealthCheck::new(llm_provider).health_check().await;

        assert_eq!(result.component, "llm_provider");
        assert!(result.healthy);
        assert!(result.critical);
        assert!(result.message.is_some());
        assert!(result.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_llm_provider_health_check_unhealthy() {
        let llm_provider = Arc::new(MockLlmProvider::with_failure());
        let result = LlmProviderHealthCheck::new(llm_provider).health_check().await;

        assert!(!result.healthy);
        assert!(result.message.unwrap().contains("mock provider error"));
    }

    #[tokio::test]
    async fn test_store_health_check() {
        let healthy = StoreHealthCheck::new(Arc::new(MemoryStore::new()))
            .health_check()
            .await;
        assert_eq!(healthy.component, "shared_store");
        assert!(healthy.healthy);

        let down = StoreHealthCheck::new(Arc::new(FailingStore)).health_check().await;
        assert!(!down.healthy);
        assert!(!down.critical);
    }

    #[tokio::test]
    async fn test_manager_all_healthy() {
        let mut manager = HealthCheckManager::new();
        manager.add_health_check(Box::new(StoreHealthCheck::new(Arc::new(MemoryStore::new()))));
        manager.add_health_check(Box::new(LlmProviderHealthCheck::new(Arc::new(
            MockLlmProvider::single_response("test"),
        ))));

        let results = manager.run_health_checks().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.healthy));
        assert!(manager.calculate_overall_health().await);
    }

    #[tokio::test]
    async fn test_store_outage_does_not_fail_overall_health() {
        let mut manager = HealthCheckManager::new();
        manager.add_health_check(Box::new(StoreHealthCheck::new(Arc::new(FailingStore))));
        manager.add_health_check(Box::new(LlmProviderHealthCheck::new(Arc::new(
            MockLlmProvider::single_response("test"),
        ))));
        assert!(manager.calculate_overall_health().await);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_overall_health() {
        let mut manager = HealthCheckManager::new();
        manager.add_health_check(Box::new(LlmProviderHealthCheck::new(Arc::new(
            MockLlmProvider::with_failure(),
        ))));
        assert!(!manager.calculate_overall_health().await);
    }

    #[tokio::test]
    async fn test_empty_manager_is_healthy() {
        assert!(HealthCheckManager::new().calculate_overall_health().await);
    }
}
