//! Data model serialization tests

use byokproxy::models::openai::*;
use byokproxy::models::responses::*;
use byokproxy::models::RotationLogEntry;
use serde_json::json;

#[test]
fn test_chat_request_keeps_unknown_fields() {
    let request: ChatRequest = serde_json::from_value(json!({
        "model": "openrouter:meta-llama/llama-3-70b",
        "messages": [{ "role": "user", "content": "Hi" }],
        "response_format": { "type": "json_object" },
        "seed": 42,
        "fallback_model": "groq:llama3-70b",
        "vault_id": "vault-9"
    }))
    .unwrap();

    assert_eq!(request.extra["seed"], 42);
    assert_eq!(request.fallback_model.as_deref(), Some("groq:llama3-70b"));

    let forwarded = serde_json::to_value(&request).unwrap();
    assert_eq!(forwarded["response_format"]["type"], "json_object");
    assert_eq!(forwarded["seed"], 42);
    assert!(forwarded.get("fallback_model").is_none());
    assert!(forwarded.get("vault_id").is_none());
    assert!(forwarded.get("max_tokens").is_none());
}

#[test]
fn test_message_content_forms() {
    let text: ChatMessage = serde_json::from_value(json!({ "role": "user", "content": "plain" })).unwrap();
    assert_eq!(text.content, Some(MessageContent::Text("plain".to_string())));

    let parts: ChatMessage = serde_json::from_value(json!({
        "role": "user",
        "content": [
            { "type": "text", "text": "look at this" },
            { "type": "image_url", "image_url": { "url": "https://example.com/cat.png", "detail": "low" } }
        ]
    }))
    .unwrap();
    match parts.content {
        Some(MessageContent::Parts(ref items)) => {
            assert_eq!(items.len(), 2);
            assert!(matches!(items[1], ContentPart::ImageUrl { .. }));
        }
        ref other => panic!("unexpected content: {:?}", other),
    }

    let tool_result: ChatMessage = serde_json::from_value(json!({
        "role": "tool",
        "content": "42",
        "tool_call_id": "call_1"
    }))
    .unwrap();
    assert_eq!(tool_result.tool_call_id.as_deref(), Some("call_1"));

    let null_content: ChatMessage = serde_json::from_value(json!({
        "role": "assistant",
        "content": null,
        "tool_calls": [{ "id": "call_1", "function": { "name": "search" } }]
    }))
    .unwrap();
    assert!(null_content.content.is_none());
    let call = &null_content.tool_calls.unwrap()[0];
    assert_eq!(call.call_type, "function");
    assert_eq!(call.function.arguments, "");
}

#[test]
fn test_chat_response_tolerates_sparse_upstream() {
    let response: ChatResponse = serde_json::from_value(json!({
        "choices": [{ "message": { "role": "assistant", "content": "hi" } }]
    }))
    .unwrap();

    assert_eq!(response.object, "chat.completion");
    assert_eq!(response.first_text(), "hi");
    assert!(response.first_tool_calls().is_empty());
    assert!(response.usage.is_none());
}

#[test]
fn test_usage_normalization() {
    let usage = Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 99 }.normalized();
    assert_eq!(usage.total_tokens, 15);
    assert_eq!(Usage::new(3, 4).total_tokens, 7);

    let responses: ResponseUsage = Usage::new(3, 4).into();
    assert_eq!(responses, ResponseUsage { input_tokens: 3, output_tokens: 4, total_tokens: 7 });
}

#[test]
fn test_chunk_defaults_and_tool_deltas() {
    let chunk: ChatChunk = serde_json::from_value(json!({
        "choices": [{
            "index": 0,
            "delta": { "tool_calls": [{ "index": 0, "function": { "arguments": "{\"a\"" } }] }
        }]
    }))
    .unwrap();

    assert!(chunk.id.is_empty());
    let delta = &chunk.choices[0].delta;
    assert!(delta.content.is_none());
    let call = &delta.tool_calls.as_ref().unwrap()[0];
    assert!(call.id.is_none());
    assert_eq!(call.function.as_ref().unwrap().arguments.as_deref(), Some("{\"a\""));

    // Absent fields stay absent on the way back out
    let out = serde_json::to_value(&chunk).unwrap();
    assert!(out.get("usage").is_none());
    assert!(out["choices"][0]["delta"].get("content").is_none());
}

#[test]
fn test_responses_input_variants() {
    let text: ResponsesRequest = serde_json::from_value(json!({ "model": "openai:gpt-4o", "input": "Hello" })).unwrap();
    assert_eq!(text.input, ResponseInput::Text("Hello".to_string()));

    let messages: ResponsesRequest = serde_json::from_value(json!({
        "model": "openai:gpt-4o",
        "input": [{ "role": "user", "content": [{ "type": "input_text", "text": "Hello" }] }],
        "previous_response_id": "resp_123"
    }))
    .unwrap();
    match messages.input {
        ResponseInput::Messages(ref list) => assert_eq!(list.len(), 1),
        ref other => panic!("unexpected input: {:?}", other),
    }
    assert_eq!(messages.extra["previous_response_id"], "resp_123");
}

#[test]
fn test_stream_event_wire_shape() {
    let event = ResponseStreamEvent::OutputTextDelta {
        sequence_number: 4,
        item_id: "msg_1".to_string(),
        output_index: 0,
        content_index: 0,
        delta: "Hi".to_string(),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "response.output_text.delta");
    assert_eq!(value["type"], event.event_name());
    assert_eq!(value["sequence_number"], 4);
    assert!(!event.is_terminal());

    let item = OutputItem::message("msg_1", "completed", vec![OutputContent::text("Hi")]);
    let value = serde_json::to_value(&item).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["role"], "assistant");
    assert_eq!(value["content"][0], json!({ "type": "output_text", "text": "Hi", "annotations": [] }));
}

#[test]
fn test_rotation_log_entry_serialization() {
    let success = serde_json::to_value(RotationLogEntry::success("k1")).unwrap();
    assert_eq!(success, json!({ "key": "k1", "status": "success" }));

    let failure = RotationLogEntry::failure("k2", "rate_limited", "Rate limit reached");
    assert!(!failure.is_success());
    let value = serde_json::to_value(&failure).unwrap();
    assert_eq!(value["error"], "Rate limit reached");
}
