//! Health and metrics HTTP routes for container orchestration
//!
//! Provides endpoints for monitoring service status, supporting both human
//! operators and container orchestration platforms. The routes are warp
//! filters mounted next to the workflow endpoint by the server.

use crate::health::{HealthCheckManager, HealthCheckResult};
use crate::observability::metrics::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "degraded"
    pub status: String,
    pub timestamp: u64,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: Vec<HealthCheckResult>,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<String, String>,
}

/// Run every check and build the `/health` body
pub async fn health_status(manager: &HealthCheckManager) -> HealthStatus {
    let checks = manager.run_health_checks().await;
    let healthy = HealthCheckManager::overall_health(&checks);
    metrics().update_health_status(healthy);

    HealthStatus {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: current_timestamp(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: metrics().get_metrics().uptime_seconds,
        checks,
    }
}

/// GET /health, /metrics, /live and / (endpoint listing)
pub fn routes(
    manager: Arc<HealthCheckManager>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // GET /health - 200 when every critical component is healthy, 503 otherwise
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::any().map(move || manager.clone()))
        .and_then(|manager: Arc<HealthCheckManager>| async move {
            let status = health_status(&manager).await;
            let code = if status.status == "healthy" {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
        });

    // GET /metrics - complete metrics export
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    // GET /live - liveness probe
    let live_route = warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            })
        });

    // GET / - API documentation
    let root_route = warp::path::end().and(warp::get()).map(|| {
        let endpoints = BTreeMap::from([
            (
                "POST /workflow/process".to_string(),
                "Process a health article URL".to_string(),
            ),
            (
                "GET /health".to_string(),
                "Overall health status with detailed checks".to_string(),
            ),
            (
                "GET /metrics".to_string(),
                "Request, cache, retry and stage metrics".to_string(),
            ),
            ("GET /live".to_string(), "Liveness probe".to_string()),
        ]);
        warp::reply::json(&ApiDocumentationResponse { endpoints })
    });

    health_route.or(metrics_route).or(live_route).or(root_route)
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
