//! Logging middleware
//!
//! Records HTTP request and response information

use axum::{
    extract::Request,
    http::{HeaderValue, Method, Uri},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Requests slower than this are flagged
const SLOW_REQUEST: Duration = Duration::from_secs(5);

/// Request logging middleware
///
/// Opens an `http_request` span per request and echoes its id in
/// `x-request-id`
pub async fn request_logging_middleware(method: Method, uri: Uri, request: Request, next: Next) -> Response {
    let start_time = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %uri.path(),
    );

    async move {
        let user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        info!(user_agent = %user_agent, "Request started: {} {}", method, uri.path());

        let mut response = next.run(request).await;

        let duration = start_time.elapsed();
        let status = response.status();
        let duration_ms = duration.as_secs_f64() * 1000.0;

        if status.is_client_error() {
            warn!(status = status.as_u16(), duration_ms, "Client error");
        } else if status.is_server_error() {
            warn!(status = status.as_u16(), duration_ms, "Server error");
        } else {
            info!(status = status.as_u16(), duration_ms, "Request completed");
        }

        // Streaming bodies are still open here; this measures time to headers
        if duration > SLOW_REQUEST {
            warn!("Slow request detected: {} {} - Duration: {:.2}s", method, uri.path(), duration.as_secs_f64());
        }

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
    .instrument(span)
    .await
}
