//! Converter tests
//!
//! Responses to Chat Completions conversion and back

use byokproxy::models::openai::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ContentPart, FunctionCall, MessageContent, ToolCall, Usage,
};
use byokproxy::models::responses::{OutputContent, ResponsesRequest};
use byokproxy::ApiConverter;
use serde_json::{json, Value};

fn responses_request(value: Value) -> ResponsesRequest {
    serde_json::from_value(value).unwrap()
}

fn chat_response(message: ChatMessage, finish_reason: &str) -> ChatResponse {
    ChatResponse {
        id: "chatcmpl-1".to_string(),
        object: "chat.completion".to_string(),
        created: 1_700_000_000,
        model: "openai:gpt-4o".to_string(),
        choices: vec![Choice { index: 0, message, finish_reason: Some(finish_reason.to_string()), logprobs: None }],
        usage: None,
        system_fingerprint: None,
    }
}

#[test]
fn test_message_list_input_is_preserved() {
    let converter = ApiConverter::new();
    let request = responses_request(json!({
        "model": "openai:gpt-4o",
        "instructions": "You are terse",
        "input": [
            { "role": "user", "content": "What is 2+2?" },
            { "role": "assistant", "content": [{ "type": "output_text", "text": "4" }] },
            { "role": "user", "content": [{ "type": "input_text", "text": "And 3+3?" }] }
        ]
    }));

    let chat = converter.to_chat_request(request).unwrap();
    assert_eq!(chat.messages.len(), 4);
    assert_eq!(chat.messages[0].role, "system");
    assert_eq!(chat.messages[1].content, Some(MessageContent::Text("What is 2+2?".to_string())));
    assert_eq!(
        chat.messages[2].content,
        Some(MessageContent::Parts(vec![ContentPart::Text { text: "4".to_string() }]))
    );
    assert_eq!(
        chat.messages[3].content,
        Some(MessageContent::Parts(vec![ContentPart::Text { text: "And 3+3?".to_string() }]))
    );
}

#[test]
fn test_gateway_fields_carry_over() {
    let converter = ApiConverter::new();
    let request = responses_request(json!({
        "model": "openai:gpt-4o",
        "input": "Hello",
        "stream": true,
        "max_output_tokens": 256,
        "temperature": 0.2,
        "fallback_model": "groq:llama3-70b",
        "cache": false,
        "cache_threshold": 0.9,
        "vault_id": "vault-1",
        "reasoning": { "effort": "low" },
        "seed": 7
    }));

    let chat = converter.to_chat_request(request).unwrap();
    assert!(chat.is_stream());
    assert_eq!(chat.max_tokens, Some(256));
    assert_eq!(chat.temperature, Some(0.2));
    assert_eq!(chat.fallback_model.as_deref(), Some("groq:llama3-70b"));
    assert_eq!(chat.cache, Some(false));
    assert_eq!(chat.cache_threshold, Some(0.9));
    assert_eq!(chat.vault_id.as_deref(), Some("vault-1"));

    // Upstream sees reasoning_effort and the unknown passthrough, never gateway fields
    let upstream = serde_json::to_value(&chat).unwrap();
    assert_eq!(upstream["reasoning_effort"], "low");
    assert_eq!(upstream["seed"], 7);
    for gateway_only in ["fallback_model", "cache", "cache_threshold", "vault_id", "reasoning"] {
        assert!(upstream.get(gateway_only).is_none(), "{} leaked upstream", gateway_only);
    }
}

#[test]
fn test_instructions_only_is_rejected() {
    let converter = ApiConverter::new();
    let request = responses_request(json!({
        "model": "openai:gpt-4o",
        "instructions": "System only",
        "input": []
    }));
    assert!(converter.to_chat_request(request).is_err());
}

#[test]
fn test_response_object_with_tool_calls() {
    let converter = ApiConverter::new();
    let request = responses_request(json!({ "model": "openai:gpt-4o", "input": "Find a", "metadata": { "trace": "t1" } }));

    let call = ToolCall {
        id: "call_1".to_string(),
        call_type: "function".to_string(),
        function: FunctionCall { name: "search".to_string(), arguments: r#"{"q":"a"}"#.to_string() },
    };
    let message = ChatMessage {
        role: "assistant".to_string(),
        content: None,
        name: None,
        tool_calls: Some(vec![call.clone()]),
        tool_call_id: None,
    };

    let object = converter.to_response_object(chat_response(message, "tool_calls"), &request, Usage::new(30, 12));
    assert_eq!(object.status, "completed");
    assert_eq!(object.model, "openai:gpt-4o");
    assert_eq!(object.metadata, Some(json!({ "trace": "t1" })));

    let content = &object.output[0].content;
    assert_eq!(content[0], OutputContent::text(""));
    assert_eq!(content[1], OutputContent::ToolCalls { tool_calls: vec![call] });

    let usage = object.usage.unwrap();
    assert_eq!((usage.input_tokens, usage.output_tokens, usage.total_tokens), (30, 12, 42));
}

#[test]
fn test_response_template_is_in_progress() {
    let converter = ApiConverter::new();
    let request = responses_request(json!({ "model": "openai:gpt-4o", "input": "Hi", "instructions": "Be kind" }));

    let first = converter.response_template(&request, "openai:gpt-4o");
    let second = converter.response_template(&request, "openai:gpt-4o");
    assert_eq!(first.status, "in_progress");
    assert_eq!(first.object, "response");
    assert!(first.output.is_empty());
    assert!(first.usage.is_none());
    assert_eq!(first.instructions.as_deref(), Some("Be kind"));
    assert_ne!(first.id, second.id);
}

#[test]
fn test_validate_chat_request() {
    let converter = ApiConverter::new();
    let valid = ChatRequest {
        model: "openai:gpt-4o".to_string(),
        messages: vec![ChatMessage::text("user", "hi")],
        ..Default::default()
    };
    assert!(converter.validate_chat_request(&valid).is_ok());

    let mut no_model = valid.clone();
    no_model.model = " ".to_string();
    assert!(converter.validate_chat_request(&no_model).is_err());

    let mut hot = valid.clone();
    hot.temperature = Some(2.5);
    assert!(converter.validate_chat_request(&hot).is_err());

    let mut zero_threshold = valid.clone();
    zero_threshold.cache_threshold = Some(0.0);
    assert!(converter.validate_chat_request(&zero_threshold).is_err());

    let mut exact_threshold = valid;
    exact_threshold.cache_threshold = Some(1.0);
    assert!(converter.validate_chat_request(&exact_threshold).is_ok());
}
