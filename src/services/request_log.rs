//! Request logging collaborator
//!
//! One record per request outcome, written fire-and-forget on a detached task

use super::usage::UsageRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Outcome of one gateway request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub user_id: String,
    /// Provider that served (or last failed) the request
    pub provider: String,
    /// Model the client asked for
    pub model: String,
    /// Model that actually answered
    pub served_model: Option<String>,
    /// HTTP status sent to the client
    pub status: u16,
    pub usage: Option<UsageRecord>,
    pub response_time_ms: f64,
    pub is_fallback: bool,
    pub fallback_kind: Option<String>,
    /// `exact`, `semantic`, or `None` for a miss
    pub cache_hit: Option<String>,
    pub error: Option<String>,
    pub streamed: bool,
    /// Truncated request summary
    pub request_summary: Option<Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RequestLogEntry {
    pub fn new(user_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            provider: String::new(),
            model: model.into(),
            served_model: None,
            status: 200,
            usage: None,
            response_time_ms: 0.0,
            is_fallback: false,
            fallback_kind: None,
            cache_hit: None,
            error: None,
            streamed: false,
            request_summary: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Sink for request outcomes
#[async_trait]
pub trait RequestLogger: Send + Sync {
    async fn record(&self, entry: RequestLogEntry);
}

/// Logger writing each outcome as a structured tracing event
#[derive(Debug, Default, Clone)]
pub struct TracingRequestLogger;

#[async_trait]
impl RequestLogger for TracingRequestLogger {
    async fn record(&self, entry: RequestLogEntry) {
        let (prompt_tokens, completion_tokens, total_tokens, credential, tokens_per_second, attempts) = entry
            .usage
            .as_ref()
            .map(|u| {
                (
                    u.prompt_tokens,
                    u.completion_tokens,
                    u.total_tokens,
                    u.credential_name.as_str(),
                    u.tokens_per_second,
                    u.rotation_log.len(),
                )
            })
            .unwrap_or((0, 0, 0, "", 0.0, 0));

        info!(
            target: "request_log",
            user = %entry.user_id,
            provider = %entry.provider,
            model = %entry.model,
            served_model = entry.served_model.as_deref().unwrap_or(""),
            status = entry.status,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            tokens_per_second,
            credential,
            attempts,
            response_time_ms = entry.response_time_ms,
            is_fallback = entry.is_fallback,
            fallback_kind = entry.fallback_kind.as_deref().unwrap_or(""),
            cache = entry.cache_hit.as_deref().unwrap_or("miss"),
            streamed = entry.streamed,
            error = entry.error.as_deref().unwrap_or(""),
            "request_log"
        );
    }
}

/// Write an entry on a detached task; the handle may be awaited or dropped
pub fn schedule(logger: Arc<dyn RequestLogger>, entry: RequestLogEntry) -> JoinHandle<()> {
    tokio::spawn(async move { logger.record(entry).await })
}
