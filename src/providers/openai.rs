//! OpenAI-compatible provider transport
//!
//! Every supported vendor speaks the Chat Completions wire format, so one
//! transport parameterized by base URL and credential serves all of them

use super::{ChunkStream, Credential, Provider};
use crate::models::openai::{ChatChunk, ChatRequest, ChatResponse};
use crate::utils::error::AttemptError;
use crate::utils::logging::truncate_content;
use crate::utils::sse::{SseDecoder, SseEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    stream_client: Client,
}

impl OpenAIProvider {
    /// Create a new provider with default timeouts
    pub fn new() -> Result<Self> {
        Self::with_timeouts(120, 300)
    }

    /// Create a new provider with custom timeouts
    pub fn with_timeouts(timeout_secs: u64, stream_timeout_secs: u64) -> Result<Self> {
        let user_agent = format!("byokproxy/{}", env!("CARGO_PKG_VERSION"));

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;

        let stream_client = Client::builder()
            .timeout(Duration::from_secs(stream_timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("Failed to create streaming HTTP client")?;

        Ok(Self { client, stream_client })
    }

    /// Build the request URL
    fn build_url(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn chat_complete(
        &self,
        request: &ChatRequest,
        base_url: &str,
        credential: &Credential,
    ) -> Result<ChatResponse, AttemptError> {
        debug!(credential = %credential.id, model = %request.model, "Sending chat completion request");

        let response = self
            .client
            .post(Self::build_url(base_url))
            .bearer_auth(&credential.secret)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::unclassified(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::unclassified(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(AttemptError::upstream(status.as_u16(), upstream_error_message(status.as_u16(), &body)));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AttemptError::unclassified(format!("Failed to parse provider response: {}", e)))?;

        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(error_from_body(err));
        }

        serde_json::from_value(value)
            .map_err(|e| AttemptError::unclassified(format!("Unexpected provider response shape: {}", e)))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        base_url: &str,
        credential: &Credential,
    ) -> Result<ChunkStream, AttemptError> {
        debug!(credential = %credential.id, model = %request.model, "Sending streaming chat completion request");

        let response = self
            .stream_client
            .post(Self::build_url(base_url))
            .bearer_auth(&credential.secret)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::unclassified(format!("Streaming request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::upstream(status.as_u16(), upstream_error_message(status.as_u16(), &body)));
        }

        Ok(decode_chunks(response.bytes_stream()))
    }
}

/// Best human-readable message from an upstream error body
pub fn upstream_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}: {}", status, truncate_content(body.trim(), 200)))
}

/// Classify an `error` object embedded in a success-status body or stream
fn error_from_body(err: &Value) -> AttemptError {
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());

    let code = err.get("code");
    let rate_limited = code.and_then(Value::as_u64) == Some(429)
        || code.and_then(Value::as_str).map_or(false, |c| c.contains("rate_limit"))
        || err.get("type").and_then(Value::as_str).map_or(false, |t| t.contains("rate_limit"));

    if rate_limited {
        return AttemptError::rate_limited(message);
    }
    match code.and_then(Value::as_u64) {
        Some(status @ 400..=599) => AttemptError::upstream(status as u16, message),
        _ => AttemptError::unclassified(message),
    }
}

enum StreamItem {
    Chunk(ChatChunk),
    Failure(AttemptError),
    Done,
    Skip,
}

fn parse_event(event: &SseEvent) -> StreamItem {
    let data = event.data.trim();
    if data.is_empty() {
        return StreamItem::Skip;
    }
    if event.is_done() {
        return StreamItem::Done;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!("Skipping malformed stream chunk: {} - data: {}", e, truncate_content(data, 200));
            return StreamItem::Skip;
        }
    };

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        return StreamItem::Failure(error_from_body(err));
    }

    match serde_json::from_value::<ChatChunk>(value) {
        Ok(chunk) => StreamItem::Chunk(chunk),
        Err(e) => {
            warn!("Skipping stream chunk with unexpected shape: {}", e);
            StreamItem::Skip
        }
    }
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<ChatChunk, AttemptError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    /// Queue parsed events; returns false once the stream has ended
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) -> bool {
        for event in events {
            match parse_event(&event) {
                StreamItem::Chunk(chunk) => self.pending.push_back(Ok(chunk)),
                StreamItem::Failure(err) => {
                    self.pending.push_back(Err(err));
                    return false;
                }
                StreamItem::Done => return false,
                StreamItem::Skip => {}
            }
        }
        true
    }
}

/// Turn a raw SSE byte stream into parsed chunks
///
/// Ends at `[DONE]`, at the end of the body, or after the first error item.
pub fn decode_chunks<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(buf)) => {
                    let events = state.decoder.feed(buf.as_ref());
                    state.finished = !state.absorb(events);
                }
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(AttemptError::unclassified(format!("Stream read failed: {}", e))));
                    state.finished = true;
                }
                None => {
                    let tail = state.decoder.flush();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::FailureKind;

    fn byte_stream(parts: Vec<&'static str>) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
        futures::stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    #[tokio::test]
    async fn test_decode_skips_malformed_and_stops_at_done() {
        let stream = decode_chunks(byte_stream(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: not-json\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        let text: String = items
            .iter()
            .map(|i| i.as_ref().unwrap().choices[0].delta.content.clone().unwrap())
            .collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_decode_surfaces_inline_error() {
        let stream = decode_chunks(byte_stream(vec![
            "data: {\"error\":{\"message\":\"quota\",\"code\":\"rate_limit_exceeded\"}}\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        let err = items[0].as_ref().unwrap_err();
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert_eq!(err.message, "quota");
    }

    #[tokio::test]
    async fn test_decode_flushes_unterminated_tail() {
        let stream = decode_chunks(byte_stream(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"tail\"}}]}",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_upstream_error_message() {
        let body = r#"{"error":{"message":"Invalid model","type":"invalid_request_error"}}"#;
        assert_eq!(upstream_error_message(400, body), "Invalid model");
        assert_eq!(upstream_error_message(502, "<html>bad gateway</html>"), "HTTP 502: <html>bad gateway</html>");
    }

    #[test]
    fn test_build_url_trims_slash() {
        assert_eq!(
            OpenAIProvider::build_url("https://api.groq.com/openai/v1/"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }
}
