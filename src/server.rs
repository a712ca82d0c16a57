//! HTTP surface
//!
//! `POST /workflow/process` runs one request through the coordinator; the
//! health routes are mounted next to it. The client's IP address is the
//! rate-limit identity. Dropping the connection drops the handler future,
//! which abandons in-flight outbound calls and retry loops. A panic inside
//! the pipeline is caught and answered with the generic 500 envelope.

use crate::config::ServerConfig;
use crate::error::WorkflowError;
use crate::health::HealthCheckManager;
use crate::observability::{self, metrics::metrics};
use crate::protocol::{ErrorEnvelope, WorkflowRequest};
use crate::validation::ValidationError;
use crate::workflow::WorkflowCoordinator;
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Identity used when the peer address is unknown
const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),
    #[error("Failed to bind server: {0}")]
    Bind(#[from] warp::Error),
}

/// `POST /workflow/process`
pub fn workflow_route(
    coordinator: Arc<WorkflowCoordinator>,
    request_timeout: Duration,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("workflow" / "process")
        .and(warp::post())
        .and(warp::addr::remote())
        .and(warp::body::content_length_limit(MAX_REQUEST_BYTES))
        .and(warp::body::bytes())
        .and_then(move |remote: Option<SocketAddr>, body: Bytes| {
            let coordinator = coordinator.clone();
            async move {
                Ok::<_, Infallible>(
                    process_request(&coordinator, request_timeout, remote, &body).await,
                )
            }
        })
}

/// Workflow and health routes with JSON rejections
pub fn routes(
    coordinator: Arc<WorkflowCoordinator>,
    health: Arc<HealthCheckManager>,
    request_timeout: Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    workflow_route(coordinator, request_timeout)
        .or(observability::health::routes(health))
        .recover(handle_rejection)
}

async fn process_request(
    coordinator: &WorkflowCoordinator,
    request_timeout: Duration,
    remote: Option<SocketAddr>,
    body: &[u8],
) -> Response {
    let request: WorkflowRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            let error = WorkflowError::validation(&ValidationError::UnsupportedPayload(format!(
                "Invalid request body: {e}"
            )));
            return error_response(&error);
        }
    };

    let identity = remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());

    let started = Instant::now();
    let pipeline = AssertUnwindSafe(coordinator.process(&request, &identity)).catch_unwind();
    match tokio::time::timeout(request_timeout, pipeline).await {
        Ok(Ok(outcome)) => match outcome.result {
            Ok(response) => warp::reply::json(&response).into_response(),
            Err(error) => error_response(&error),
        },
        Ok(Err(panic)) => {
            let error = WorkflowError::internal();
            metrics().request_failed(error.kind.as_str(), started.elapsed());
            error!(
                conversation_id = %request.conversation_id,
                panic = panic_message(panic.as_ref()),
                "Workflow panicked"
            );
            error_response(&error)
        }
        Err(_) => {
            let error = WorkflowError::deadline(request_timeout);
            metrics().request_failed(error.kind.as_str(), started.elapsed());
            warn!(
                conversation_id = %request.conversation_id,
                timeout_secs = request_timeout.as_secs(),
                "Workflow request timed out"
            );
            error_response(&error)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// JSON error envelope with the mapped status and, for 429, a `Retry-After` header
pub fn error_response(error: &WorkflowError) -> Response {
    let status = StatusCode::from_u16(error.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let reply = warp::reply::with_status(warp::reply::json(&error.to_envelope()), status);
    match error.retry_after {
        Some(seconds) => {
            warp::reply::with_header(reply, "Retry-After", seconds.to_string()).into_response()
        }
        None => reply.into_response(),
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "NOT_FOUND", "No such endpoint")
    } else if rejection
        .find::<warp::reject::PayloadTooLarge>()
        .is_some()
    {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "Request body too large",
        )
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        )
    } else {
        (StatusCode::BAD_REQUEST, "BAD_REQUEST", "Malformed request")
    };

    let envelope = ErrorEnvelope {
        success: false,
        message: message.to_string(),
        error_code: code.to_string(),
        retry_after: None,
    };
    Ok(warp::reply::with_status(warp::reply::json(&envelope), status).into_response())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(
    config: &ServerConfig,
    coordinator: Arc<WorkflowCoordinator>,
    health: Arc<HealthCheckManager>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{}:{}", config.host, config.port);
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| ServerError::InvalidAddress(address.clone()))?;

    let routes = routes(
        coordinator,
        health,
        Duration::from_secs(config.request_timeout_secs),
    );
    let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(address = %bound, "HTTP server listening");

    server.await;
    info!("HTTP server stopped");
    Ok(())
}
