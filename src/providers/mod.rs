//! Provider module
//!
//! Defines the upstream transport trait and the data a single attempt needs:
//! which endpoint to call and which credential to present

pub mod openai;

use crate::models::openai::{ChatChunk, ChatRequest, ChatResponse};
use crate::utils::error::AttemptError;
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

/// A boxed, sendable stream
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Upstream chunk stream of one attempt
pub type ChunkStream = BoxStream<'static, Result<ChatChunk, AttemptError>>;

/// Default base URL for OpenAI-compatible providers
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider endpoint as resolved from the provider directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    /// Stable provider id
    pub id: String,
    /// Normalized provider name, as used in model prefixes
    pub name: String,
    /// Base URL (optional)
    pub base_url: Option<String>,
}

/// A user's stored upstream API key
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Identifier recorded in rotation logs
    pub id: String,
    /// Display name for billing attribution
    pub name: String,
    /// Secret key, never logged
    pub secret: String,
    /// Base URL override for this key
    pub base_url: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Transport for a single upstream attempt
///
/// Implementations make exactly one HTTP call with the given credential and
/// classify failures; rotation and fallback live above this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the transport name
    fn name(&self) -> &str;

    /// Send a chat completion request (non-streaming)
    async fn chat_complete(
        &self,
        request: &ChatRequest,
        base_url: &str,
        credential: &Credential,
    ) -> Result<ChatResponse, AttemptError>;

    /// Send a chat completion request (streaming)
    ///
    /// Resolves once the upstream has answered with a success status; errors
    /// after that point arrive as items of the stream.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        base_url: &str,
        credential: &Credential,
    ) -> Result<ChunkStream, AttemptError>;
}

pub use openai::OpenAIProvider;
