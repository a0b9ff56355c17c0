//! Shared helpers for the integration test suites

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use byokproxy::config::{AppConfig, Settings};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

pub const ALICE_TOKEN: &str = "byok-test-token-alice";
pub const BOB_TOKEN: &str = "byok-test-token-bob";

pub const CHAT_PATH: &str = "/v1/api/chat/completions";
pub const RESPONSES_PATH: &str = "/v1/api/responses";

/// Build a configuration from `(provider, base_url)` pairs and
/// `(user, provider, keys)` credential lists
pub fn gateway_config(providers: &[(&str, &str)], credentials: &[(&str, &str, &[&str])]) -> AppConfig {
    let mut provider_map = Map::new();
    for (name, base_url) in providers {
        provider_map.insert(name.to_string(), json!({ "baseUrl": base_url }));
    }

    let mut users: Map<String, Value> = Map::new();
    for (user, provider, keys) in credentials {
        let entries: Vec<Value> = keys
            .iter()
            .map(|key| json!({ "id": format!("cred-{}", key), "name": format!("{} key", key), "key": key }))
            .collect();
        let by_provider = users.entry(user.to_string()).or_insert_with(|| json!({}));
        by_provider[*provider] = Value::Array(entries);
    }

    serde_json::from_value(json!({
        "tokens": {
            ALICE_TOKEN: "alice",
            BOB_TOKEN: "bob"
        },
        "providers": provider_map,
        "credentials": users
    }))
    .expect("test config must deserialize")
}

/// Default settings with the response cache switched on or off
pub fn settings(cache_enabled: bool) -> Settings {
    let mut settings = Settings::default();
    settings.cache.enabled = cache_enabled;
    settings
}

pub fn app(settings: Settings, config: &AppConfig) -> Router {
    byokproxy::create_router(settings, config).expect("router must build")
}

pub fn post_json(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

pub fn chat_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }]
    })
}

/// Upstream non-streaming completion body
pub fn completion(model: &str, text: &str, usage: Option<(u32, u32)>) -> Value {
    let mut body = json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1_700_000_000u64,
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    });
    if let Some((prompt, completion)) = usage {
        body["usage"] = json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion
        });
    }
    body
}

/// Upstream streaming chunk carrying a content delta
pub fn content_chunk(model: &str, content: &str) -> Value {
    json!({
        "id": "chatcmpl-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000u64,
        "model": model,
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }]
    })
}

pub fn finish_chunk(model: &str, reason: &str) -> Value {
    json!({
        "id": "chatcmpl-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000u64,
        "model": model,
        "choices": [{ "index": 0, "delta": {}, "finish_reason": reason }]
    })
}

/// Render upstream chunks as an SSE body terminated by `[DONE]`
pub fn sse_body(chunks: &[Value]) -> String {
    let mut body: String = chunks.iter().map(|c| format!("data: {}\n\n", c)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

/// One parsed SSE frame from a gateway response
#[derive(Debug, Clone)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap()
    }
}

/// Split an SSE response body into frames, skipping comments
pub fn parse_frames(body: &str) -> Vec<Frame> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
                }
            }
            (!data.is_empty()).then(|| Frame { event, data: data.join("\n") })
        })
        .collect()
}

/// Concatenated `delta.content` of chat chunk frames
pub fn streamed_text(frames: &[Frame]) -> String {
    frames
        .iter()
        .filter(|f| f.data != "[DONE]")
        .filter_map(|f| {
            f.json()["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .collect()
}
