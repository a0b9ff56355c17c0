//! Chat Completions handler
//!
//! POST /v1/api/chat/completions

use super::{apply_meta_headers, fallback_model_header, sse_response, AppState};
use crate::middleware::AuthenticatedUser;
use crate::models::openai::ChatRequest;
use crate::services::gateway::StreamTarget;
use crate::utils::error::{helpers, AppResult};
use crate::utils::logging::create_request_log_summary;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::debug;

/// Handle a Chat Completions request, streaming or not
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(mut request) = payload.map_err(|e| helpers::validation_error(e.body_text()))?;

    if let Some(fallback) = fallback_model_header(&headers) {
        request.fallback_model = Some(fallback);
    }
    state.converter.validate_chat_request(&request)?;

    if let Ok(summary) = serde_json::to_string(&create_request_log_summary(&request)) {
        debug!(user = %user.user_id, "Chat request: {}", summary);
    }

    if request.is_stream() {
        let handle = state.gateway.stream(&user.user_id, request, StreamTarget::Chat).await?;
        return Ok(sse_response(handle));
    }

    let completion = state.gateway.complete(&user.user_id, request).await?;
    let mut response = Json(completion.response).into_response();
    apply_meta_headers(response.headers_mut(), &completion.meta);
    Ok(response)
}
