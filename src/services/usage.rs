//! Usage accounting
//!
//! Token counts come from the upstream when it reports them and from a
//! per-family estimate otherwise. Totals are always recomputed from the parts.

use crate::models::openai::{ChatMessage, Tool, ToolCall, Usage};
use crate::models::RotationLogEntry;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Tokens added per message for role and separators
const TOKENS_PER_MESSAGE: u32 = 3;
/// Tokens priming the assistant reply
const REPLY_PRIMING_TOKENS: u32 = 3;
/// Flat cost of one image part
const TOKENS_PER_IMAGE: u32 = 85;

/// Tokenizer family used for estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerFamily {
    O200k,
    Cl100k,
    Claude,
    Gemini,
    Llama,
    Generic,
}

impl TokenizerFamily {
    /// Pick the family for a model name, with or without provider prefix
    pub fn for_model(model: &str) -> Self {
        let bare = super::router::split_model(model)
            .map(|(_, bare)| bare)
            .unwrap_or(model)
            .to_lowercase();
        let bare = bare.rsplit('/').next().unwrap_or(&bare).to_string();

        if bare.starts_with("gpt-4o")
            || bare.starts_with("gpt-4.1")
            || bare.starts_with("gpt-5")
            || bare.starts_with("o1")
            || bare.starts_with("o3")
            || bare.starts_with("o4")
        {
            TokenizerFamily::O200k
        } else if bare.starts_with("gpt-4") || bare.starts_with("gpt-3.5") || bare.starts_with("text-embedding") {
            TokenizerFamily::Cl100k
        } else if bare.contains("claude") {
            TokenizerFamily::Claude
        } else if bare.contains("gemini") || bare.contains("gemma") {
            TokenizerFamily::Gemini
        } else if ["llama", "mistral", "mixtral", "qwen"].iter().any(|f| bare.contains(f)) {
            TokenizerFamily::Llama
        } else {
            TokenizerFamily::Generic
        }
    }

    /// Average ASCII characters per token
    fn chars_per_token(self) -> f64 {
        match self {
            TokenizerFamily::O200k => 4.2,
            TokenizerFamily::Cl100k => 4.0,
            TokenizerFamily::Claude => 3.5,
            TokenizerFamily::Gemini => 4.0,
            TokenizerFamily::Llama => 3.8,
            TokenizerFamily::Generic => 4.0,
        }
    }

    /// Estimated tokens in a text; non-ASCII characters count one each
    pub fn count(self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let (ascii, other) = text
            .chars()
            .fold((0usize, 0usize), |(a, o), c| if c.is_ascii() { (a + 1, o) } else { (a, o + 1) });
        let estimate = (ascii as f64 / self.chars_per_token()).ceil() as u32 + other as u32;
        estimate.max(1)
    }
}

/// Estimated prompt tokens of a message list
pub fn count_message_tokens(messages: &[ChatMessage], model: &str) -> u32 {
    let family = TokenizerFamily::for_model(model);
    let mut total = REPLY_PRIMING_TOKENS;
    for message in messages {
        total += TOKENS_PER_MESSAGE;
        total += family.count(&message.role);
        if let Some(content) = &message.content {
            total += family.count(&content.extract_text());
            total += content.image_count() as u32 * TOKENS_PER_IMAGE;
        }
        if let Some(name) = &message.name {
            total += family.count(name);
        }
        if let Some(calls) = &message.tool_calls {
            total += count_tool_call_tokens(calls, model);
        }
    }
    total
}

/// Estimated tokens of tool definitions
pub fn count_tool_tokens(tools: &[Tool], model: &str) -> u32 {
    let family = TokenizerFamily::for_model(model);
    tools
        .iter()
        .map(|tool| family.count(&serde_json::to_string(tool).unwrap_or_default()))
        .sum()
}

/// Estimated tokens of generated tool calls
pub fn count_tool_call_tokens(calls: &[ToolCall], model: &str) -> u32 {
    let family = TokenizerFamily::for_model(model);
    calls
        .iter()
        .map(|call| family.count(&call.function.name) + family.count(&call.function.arguments))
        .sum()
}

/// Estimated completion tokens of generated output
pub fn count_completion_tokens(text: &str, calls: &[ToolCall], model: &str) -> u32 {
    TokenizerFamily::for_model(model).count(text) + count_tool_call_tokens(calls, model)
}

/// Per-request usage record handed to the request logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: f64,
    pub tokens_per_second: f64,
    pub credential_name: String,
    pub rotation_log: Vec<RotationLogEntry>,
}

impl UsageRecord {
    pub fn as_usage(&self) -> Usage {
        Usage::new(self.prompt_tokens, self.completion_tokens)
    }
}

/// Measures one request and produces its usage record
#[derive(Debug, Clone)]
pub struct UsageAccountant {
    started: Instant,
}

impl UsageAccountant {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Build the record; the total is derived, never taken from upstream
    pub fn finish(
        &self,
        usage: Usage,
        credential_name: impl Into<String>,
        rotation_log: Vec<RotationLogEntry>,
    ) -> UsageRecord {
        let usage = usage.normalized();
        let latency_ms = self.elapsed_ms();
        let tokens_per_second = if latency_ms > 0.0 {
            usage.completion_tokens as f64 / (latency_ms / 1000.0)
        } else {
            0.0
        };

        UsageRecord {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            latency_ms,
            tokens_per_second,
            credential_name: credential_name.into(),
            rotation_log,
        }
    }
}

/// Upstream usage when reported, otherwise the estimate
pub fn resolve_usage(reported: Option<Usage>, estimated_prompt: u32, estimated_completion: u32) -> Usage {
    match reported {
        Some(usage) if usage.prompt_tokens > 0 || usage.completion_tokens > 0 => usage.normalized(),
        _ => Usage::new(estimated_prompt, estimated_completion),
    }
}
