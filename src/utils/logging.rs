//! Logging utilities
//!
//! Shared logging configuration and helper functions

use crate::models::openai::{ChatMessage, ChatRequest, MessageContent};
use serde_json::{json, Value};

/// Set to true to include full request details (tools, system prompts) in debug logs
/// Default is false to reduce log verbosity
pub const VERBOSE_REQUEST_LOGGING: bool = false;

/// Truncate a string with a note about original length
pub fn truncate_content(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total > max_chars {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars truncated)", head, total - max_chars)
    } else {
        s.to_string()
    }
}

/// Create a filtered version of a chat message for logging
fn filter_message(msg: &ChatMessage) -> Value {
    let content = match &msg.content {
        Some(MessageContent::Text(t)) => {
            // For system messages, truncate more aggressively
            let max_len = if msg.role == "system" { 100 } else { 200 };
            Value::String(truncate_content(t, max_len))
        }
        Some(MessageContent::Parts(parts)) => json!(format!("[...{} content parts]", parts.len())),
        None => Value::Null,
    };

    let mut obj = json!({
        "role": msg.role,
        "content": content,
    });

    if let Some(tool_calls) = &msg.tool_calls {
        obj["tool_calls"] = json!(format!("[...{} tool calls]", tool_calls.len()));
    }
    if let Some(tool_call_id) = &msg.tool_call_id {
        obj["tool_call_id"] = json!(tool_call_id);
    }

    obj
}

/// Create a filtered summary of a chat request for logging
/// Keeps original structure but truncates verbose content
pub fn create_request_log_summary(request: &ChatRequest) -> Value {
    if VERBOSE_REQUEST_LOGGING {
        return serde_json::to_value(request).unwrap_or(json!({"error": "serialize failed"}));
    }

    let filtered_messages: Vec<Value> = request.messages.iter().map(filter_message).collect();

    let tools = match &request.tools {
        Some(t) if !t.is_empty() => json!([format!("...{} tools (details truncated)", t.len())]),
        _ => Value::Null,
    };

    json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "stream": request.stream,
        "fallback_model": request.fallback_model,
        "messages": filtered_messages,
        "tools": tools,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_content("héllo wörld", 4), "héll... (7 chars truncated)");
        assert_eq!(truncate_content("short", 10), "short");
    }

    #[test]
    fn test_summary_truncates_long_messages() {
        let request = ChatRequest {
            model: "openai:gpt-4o".to_string(),
            messages: vec![ChatMessage::text("user", "x".repeat(500))],
            ..Default::default()
        };
        let summary = create_request_log_summary(&request);
        let content = summary["messages"][0]["content"].as_str().unwrap();
        assert!(content.contains("300 chars truncated"));
        assert_eq!(summary["model"], "openai:gpt-4o");
    }
}
