//! Responses API handler
//!
//! POST /v1/api/responses
//!
//! Requests are converted to chat, dispatched through the same gateway, and
//! rendered back as response objects or Responses lifecycle events.

use super::{apply_meta_headers, fallback_model_header, sse_response, AppState};
use crate::middleware::AuthenticatedUser;
use crate::models::responses::ResponsesRequest;
use crate::services::gateway::StreamTarget;
use crate::utils::error::{helpers, AppResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::debug;

pub async fn create_response(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    payload: Result<Json<ResponsesRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(mut request) = payload.map_err(|e| helpers::validation_error(e.body_text()))?;

    if let Some(fallback) = fallback_model_header(&headers) {
        request.fallback_model = Some(fallback);
    }

    let chat = state.converter.to_chat_request(request.clone())?;
    state.converter.validate_chat_request(&chat)?;
    debug!(user = %user.user_id, model = %chat.model, stream = chat.is_stream(), "Responses request");

    if chat.is_stream() {
        let template = state.converter.response_template(&request, &chat.model);
        let handle = state
            .gateway
            .stream(&user.user_id, chat, StreamTarget::Responses(template))
            .await?;
        return Ok(sse_response(handle));
    }

    let completion = state.gateway.complete(&user.user_id, chat).await?;
    let object = state
        .converter
        .to_response_object(completion.response, &request, completion.usage);
    let mut response = Json(object).into_response();
    apply_meta_headers(response.headers_mut(), &completion.meta);
    Ok(response)
}
