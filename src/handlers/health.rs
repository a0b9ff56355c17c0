//! Health check handlers
//!
//! Provides application health status check endpoints

use crate::handlers::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Version information
    pub version: String,
    /// Timestamp
    pub timestamp: String,
    /// Details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// Check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Configured provider count
    pub providers: usize,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Memory usage (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<MemoryUsage>,
}

/// Memory usage information
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Used memory in bytes
    pub used_bytes: u64,
    /// Total memory in bytes
    pub total_bytes: u64,
    /// Usage percentage
    pub usage_percent: f64,
}

fn health_response(status: &str, providers: usize) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        details: Some(HealthDetails {
            providers,
            uptime_seconds: get_uptime_seconds(),
            memory_usage: get_memory_usage(),
        }),
    }
}

/// Service banner
///
/// GET /
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "BYOK LLM gateway",
        "version": crate::VERSION,
        "status": "running",
    }))
}

/// Basic health check
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing health check");
    Json(health_response("healthy", state.provider_count))
}

/// Readiness check
///
/// GET /health/ready
/// Not ready (503) while no provider is configured
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    debug!("Executing readiness check");

    if state.provider_count == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(health_response("not_ready", 0))).into_response();
    }
    Json(health_response("ready", state.provider_count)).into_response()
}

/// Liveness check
///
/// GET /health/live
/// Does not check external dependencies
pub async fn liveness_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing liveness check");
    Json(health_response("alive", state.provider_count))
}

/// Get service uptime in seconds
fn get_uptime_seconds() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START_TIME: OnceLock<Instant> = OnceLock::new();
    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

/// Get memory usage information from /proc (Linux only; None elsewhere)
fn get_memory_usage() -> Option<MemoryUsage> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let field_bytes = |name: &str| {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };

    let used = field_bytes("VmRSS:")?;
    let total = field_bytes("VmSize:")?;
    let usage_percent = if total > 0 { (used as f64 / total as f64) * 100.0 } else { 0.0 };
    Some(MemoryUsage { used_bytes: used, total_bytes: total, usage_percent })
}
