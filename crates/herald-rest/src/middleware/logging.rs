//! Request logging middleware.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tokio::time::Instant;
use tracing::{debug, info};

/// Probe endpoints are polled constantly and logged at debug level.
const QUIET_PATHS: &[&str] = &["/health", "/ready", "/live"];

/// Request logging middleware.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if QUIET_PATHS.contains(&uri.path()) {
        debug!(target: "http", method = %method, uri = %uri, status, duration_ms, "HTTP request completed");
    } else {
        info!(target: "http", method = %method, uri = %uri, status, duration_ms, "HTTP request completed");
    }

    response
}
