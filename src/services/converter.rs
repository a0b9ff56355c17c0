//! API converter service
//!
//! Converts Responses API requests into Chat Completions requests before
//! dispatch, renders chat results back as response objects, and validates
//! requests on both surfaces

use super::translator::message_content;
use crate::models::openai::{ChatMessage, ChatRequest, ChatResponse, ContentPart, MessageContent, Usage};
use crate::models::responses::{OutputItem, ResponseInput, ResponseObject, ResponsesRequest};
use crate::utils::error::{helpers, AppResult};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Responses-only request fields that have no Chat Completions counterpart
const RESPONSES_ONLY_FIELDS: &[&str] = &["store", "previous_response_id", "text", "truncation", "include", "reasoning"];

/// API converter
#[derive(Debug, Clone, Default)]
pub struct ApiConverter;

impl ApiConverter {
    /// Create a new converter instance
    pub fn new() -> Self {
        Self
    }

    /// Convert a Responses request to the Chat Completions request dispatched
    /// upstream
    pub fn to_chat_request(&self, request: ResponsesRequest) -> AppResult<ChatRequest> {
        let mut messages = Vec::new();

        if let Some(instructions) = request.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage::text("system", instructions));
        }

        match request.input {
            ResponseInput::Text(text) => {
                if !text.trim().is_empty() {
                    messages.push(ChatMessage::text("user", text));
                }
            }
            ResponseInput::Messages(input) => {
                messages.extend(input.into_iter().map(Self::normalize_input_message));
            }
        }

        if !messages.iter().any(|m| m.role != "system") {
            return Err(helpers::validation_error("input must not be empty"));
        }

        let extra = Self::chat_extra(request.extra);
        debug!(model = %request.model, messages = messages.len(), "Converted Responses request to chat");

        Ok(ChatRequest {
            model: request.model,
            messages,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stream: request.stream,
            stream_options: None,
            tools: request.tools,
            tool_choice: request.tool_choice,
            user: request.user,
            fallback_model: request.fallback_model,
            cache: request.cache,
            cache_threshold: request.cache_threshold,
            vault_id: request.vault_id,
            extra,
        })
    }

    /// Responses input parts become plain chat text parts
    fn normalize_input_message(mut message: ChatMessage) -> ChatMessage {
        message.content = message.content.take().map(|content| match content {
            MessageContent::Parts(parts) => MessageContent::Parts(
                parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::InputText { text } | ContentPart::OutputText { text } => {
                            ContentPart::Text { text }
                        }
                        other => other,
                    })
                    .collect(),
            ),
            text => text,
        });
        message
    }

    /// Passthrough fields valid on Chat Completions; `reasoning.effort` maps to
    /// `reasoning_effort`
    fn chat_extra(mut extra: Map<String, Value>) -> Map<String, Value> {
        if let Some(effort) = extra.get("reasoning").and_then(|r| r.get("effort")).cloned() {
            extra.entry("reasoning_effort").or_insert(effort);
        }
        for field in RESPONSES_ONLY_FIELDS {
            extra.remove(*field);
        }
        extra
    }

    /// In-progress response object for a request, used as the snapshot in
    /// streaming lifecycle events
    pub fn response_template(&self, request: &ResponsesRequest, model: &str) -> ResponseObject {
        ResponseObject {
            id: format!("resp_{}", Uuid::new_v4().simple()),
            object: "response".to_string(),
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
            status: "in_progress".to_string(),
            model: model.to_string(),
            output: Vec::new(),
            usage: None,
            error: None,
            instructions: request.instructions.clone(),
            max_output_tokens: request.max_output_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            tools: request.tools.clone(),
            tool_choice: request.tool_choice.clone(),
            metadata: request.metadata.clone(),
        }
    }

    /// Render a chat result as a completed response object
    pub fn to_response_object(&self, response: ChatResponse, request: &ResponsesRequest, usage: Usage) -> ResponseObject {
        let mut object = self.response_template(request, &response.model);
        let item_id = format!("msg_{}", Uuid::new_v4().simple());

        object.status = "completed".to_string();
        object.output = vec![OutputItem::message(
            &item_id,
            "completed",
            message_content(&response.first_text(), response.first_tool_calls()),
        )];
        object.usage = Some(usage.into());
        object
    }

    /// Validate a chat request before dispatch
    pub fn validate_chat_request(&self, request: &ChatRequest) -> AppResult<()> {
        if request.model.trim().is_empty() {
            return Err(helpers::validation_error("model is required"));
        }
        if request.messages.is_empty() {
            return Err(helpers::validation_error("messages must not be empty"));
        }
        if let Some(temperature) = request.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(helpers::validation_error("temperature must be between 0 and 2"));
            }
        }
        if let Some(top_p) = request.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(helpers::validation_error("top_p must be between 0 and 1"));
            }
        }
        if let Some(threshold) = request.cache_threshold {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(helpers::validation_error("cache_threshold must be in (0, 1]"));
            }
        }
        Ok(())
    }
}
