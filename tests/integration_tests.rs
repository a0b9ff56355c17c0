//! Integration tests
//!
//! End-to-end requests through the router against mock upstream providers

mod common;

use axum::http::StatusCode;
use common::*;
use httpmock::prelude::*;
use serde_json::json;

#[tokio::test]
async fn test_health_endpoints() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[]);
    let app = app(settings(false), &config);

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "byokproxy");
    assert_eq!(health["details"]["providers"], 1);
    assert!(health["version"].is_string());

    let live = body_json(send(&app, get("/health/live")).await).await;
    assert_eq!(live["status"], "alive");

    let ready = send(&app, get("/health/ready")).await;
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(body_json(ready).await["status"], "ready");

    let root = body_json(send(&app, get("/")).await).await;
    assert_eq!(root["status"], "running");
}

#[tokio::test]
async fn test_readiness_without_providers() {
    let config = byokproxy::AppConfig::default();
    let app = app(settings(false), &config);

    let response = send(&app, get("/health/ready")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "not_ready");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[]);
    let app = app(settings(false), &config);

    let response = send(&app, post_json(CHAT_PATH, None, chat_body("openai:gpt-4o", "Hi"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_api_key");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[]);
    let app = app(settings(false), &config);

    let request = post_json(CHAT_PATH, Some("byok-not-a-real-token"), chat_body("openai:gpt-4o", "Hi"));
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = post_json(RESPONSES_PATH, Some("byok-not-a-real-token"), json!({"model": "openai:gpt-4o", "input": "Hi"}));
    assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_chat_completion_passthrough() {
    let server = MockServer::start_async().await;
    let upstream = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer sk-alice-one")
                .json_body_partial(r#"{"model": "gpt-4o", "stream": false}"#);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("gpt-4o", "Hello from upstream", Some((12, 5))));
        })
        .await;

    let config = gateway_config(&[("openai", &server.base_url())], &[("alice", "openai", &["sk-alice-one"])]);
    let app = app(settings(false), &config);

    let response = send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body("openai:gpt-4o", "Hi"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-byok-fallback"), Some("false"));
    assert_eq!(header(&response, "x-byok-served-model"), Some("openai:gpt-4o"));
    assert_eq!(header(&response, "x-byok-cache"), Some("miss"));
    assert!(header(&response, "x-request-id").is_some());

    let body = body_json(response).await;
    assert_eq!(body["model"], "openai:gpt-4o");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello from upstream");
    assert_eq!(body["usage"]["prompt_tokens"], 12);
    assert_eq!(body["usage"]["completion_tokens"], 5);
    assert_eq!(body["usage"]["total_tokens"], 17);

    upstream.assert_async().await;
}

#[tokio::test]
async fn test_estimated_usage_sums_to_total() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("gpt-4o", "A fairly short answer without usage numbers", None));
        })
        .await;

    let config = gateway_config(&[("openai", &server.base_url())], &[("alice", "openai", &["sk-alice-one"])]);
    let app = app(settings(false), &config);

    let body = body_json(send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body("openai:gpt-4o", "Hi there"))).await).await;
    let prompt = body["usage"]["prompt_tokens"].as_u64().unwrap();
    let completion = body["usage"]["completion_tokens"].as_u64().unwrap();
    assert!(prompt > 0);
    assert!(completion > 0);
    assert_eq!(body["usage"]["total_tokens"].as_u64().unwrap(), prompt + completion);
}

#[tokio::test]
async fn test_rate_limited_provider_falls_back_transparently() {
    let primary = MockServer::start_async().await;
    let secondary = MockServer::start_async().await;

    let limited = primary
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429)
                .header("content-type", "application/json")
                .json_body(json!({"error": {"message": "Rate limit reached", "type": "rate_limit_error"}}));
        })
        .await;
    let served = secondary
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer gsk-alice")
                .json_body_partial(r#"{"model": "gpt-4o"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("gpt-4o", "Served by the backup provider", Some((9, 6))));
        })
        .await;

    let config = gateway_config(
        &[("openai", &primary.base_url()), ("groq", &secondary.base_url())],
        &[("alice", "openai", &["sk-alice-one", "sk-alice-two"]), ("alice", "groq", &["gsk-alice"])],
    );
    let app = app(settings(false), &config);

    let response = send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body("openai:gpt-4o", "Hi"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-byok-fallback"), Some("true"));
    assert_eq!(header(&response, "x-byok-served-model"), Some("groq:gpt-4o"));

    let body = body_json(response).await;
    assert_eq!(body["model"], "groq:gpt-4o");
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Served by the backup provider");

    // A fallback answer has the same shape as a primary one
    let allowed = ["id", "object", "created", "model", "choices", "usage", "system_fingerprint"];
    for key in body.as_object().unwrap().keys() {
        assert!(allowed.contains(&key.as_str()), "unexpected top-level key {}", key);
    }

    limited.assert_hits_async(2).await;
    served.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_exhausted_without_alternate() {
    let server = MockServer::start_async().await;
    let limited = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("slow down");
        })
        .await;

    let config = gateway_config(
        &[("openai", &server.base_url())],
        &[("alice", "openai", &["sk-alice-one", "sk-alice-two"])],
    );
    let app = app(settings(false), &config);

    let response = send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body("openai:gpt-4o", "Hi"))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "rate_limit_exceeded");
    assert!(body["error"]["message"].as_str().unwrap().contains("rate limited"));

    limited.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_second_key_serves_after_first_is_rejected() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions").header("authorization", "Bearer sk-alice-one");
            then.status(401).json_body(json!({"error": {"message": "Incorrect API key provided"}}));
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions").header("authorization", "Bearer sk-alice-two");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("gpt-4o", "Second key works", Some((3, 3))));
        })
        .await;

    let config = gateway_config(
        &[("openai", &server.base_url())],
        &[("alice", "openai", &["sk-alice-one", "sk-alice-two"])],
    );
    let app = app(settings(false), &config);

    let response = send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body("openai:gpt-4o", "Hi"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Rotation inside one provider is not a fallback
    assert_eq!(header(&response, "x-byok-fallback"), Some("false"));
    assert_eq!(body_json(response).await["choices"][0]["message"]["content"], "Second key works");

    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_explicit_fallback_header_after_provider_step() {
    let primary = MockServer::start_async().await;
    let secondary = MockServer::start_async().await;

    primary
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(503).body("overloaded");
        })
        .await;
    // The alternate provider does not serve the bare model, only the explicit one
    let explicit = secondary
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .json_body_partial(r#"{"model": "claude-3-haiku"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("claude-3-haiku", "Explicit fallback answer", Some((4, 4))));
        })
        .await;

    let config = gateway_config(
        &[("openai", &primary.base_url()), ("anthropic", &secondary.base_url())],
        &[("alice", "openai", &["sk-alice-one"]), ("alice", "anthropic", &["ak-alice"])],
    );
    let app = app(settings(false), &config);

    let mut request = post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body("openai:gpt-4o", "Hi"));
    request
        .headers_mut()
        .insert("x-fallback-model", "anthropic:claude-3-haiku".parse().unwrap());

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-byok-fallback"), Some("true"));
    assert_eq!(header(&response, "x-byok-served-model"), Some("anthropic:claude-3-haiku"));
    assert_eq!(body_json(response).await["model"], "anthropic:claude-3-haiku");

    explicit.assert_async().await;
}

#[tokio::test]
async fn test_unresolvable_models_are_rejected() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[("alice", "openai", &["sk-alice-one"])]);
    let app = app(settings(false), &config);

    for model in ["gpt-4o", "mystery:gpt-4o"] {
        let response = send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), chat_body(model, "Hi"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "model {}", model);
        assert_eq!(body_json(response).await["error"]["code"], "model_not_found");
    }

    // Bob holds no openai key
    let response = send(&app, post_json(CHAT_PATH, Some(BOB_TOKEN), chat_body("openai:gpt-4o", "Hi"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[("alice", "openai", &["sk-alice-one"])]);
    let app = app(settings(false), &config);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(CHAT_PATH)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", ALICE_TOKEN))
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_request");

    let empty = json!({"model": "openai:gpt-4o", "messages": []});
    let response = send(&app, post_json(CHAT_PATH, Some(ALICE_TOKEN), empty)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[("alice", "openai", &["sk-alice-one"])]);
    let mut settings = settings(false);
    settings.request.max_request_size = 64;
    let app = app(settings, &config);

    let body = chat_body("openai:gpt-4o", &"x".repeat(500)).to_string();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri(CHAT_PATH)
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .header("authorization", format!("Bearer {}", ALICE_TOKEN))
        .body(axum::body::Body::from(body))
        .unwrap();

    assert_eq!(send(&app, request).await.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_responses_non_streaming_shape() {
    let server = MockServer::start_async().await;
    let upstream = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .json_body_partial(r#"{"model": "gpt-4o", "max_tokens": 64}"#);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("gpt-4o", "Hi there", Some((20, 2))));
        })
        .await;

    let config = gateway_config(&[("openai", &server.base_url())], &[("alice", "openai", &["sk-alice-one"])]);
    let app = app(settings(false), &config);

    let request = post_json(
        RESPONSES_PATH,
        Some(ALICE_TOKEN),
        json!({
            "model": "openai:gpt-4o",
            "instructions": "Be brief",
            "input": "Say hi",
            "max_output_tokens": 64,
            "store": true
        }),
    );
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-byok-served-model"), Some("openai:gpt-4o"));

    let body = body_json(response).await;
    assert_eq!(body["object"], "response");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["model"], "openai:gpt-4o");
    assert!(body["id"].as_str().unwrap().starts_with("resp_"));
    assert_eq!(body["instructions"], "Be brief");
    assert_eq!(body["output"][0]["type"], "message");
    assert_eq!(body["output"][0]["role"], "assistant");
    assert_eq!(body["output"][0]["content"][0]["type"], "output_text");
    assert_eq!(body["output"][0]["content"][0]["text"], "Hi there");
    assert_eq!(body["usage"]["input_tokens"], 20);
    assert_eq!(body["usage"]["output_tokens"], 2);
    assert_eq!(body["usage"]["total_tokens"], 22);

    upstream.assert_async().await;
}

#[tokio::test]
async fn test_responses_rejects_empty_input() {
    let config = gateway_config(&[("openai", "https://api.openai.com/v1")], &[("alice", "openai", &["sk-alice-one"])]);
    let app = app(settings(false), &config);

    let request = post_json(RESPONSES_PATH, Some(ALICE_TOKEN), json!({"model": "openai:gpt-4o", "input": "  "}));
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_request");
}
