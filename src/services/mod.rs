//! Service layer module
//!
//! Contains credential rotation, routing, the fallback cascade, stream
//! translation, the semantic cache and the per-request gateway

pub mod cache;
pub mod cascade;
pub mod client;
pub mod converter;
pub mod directory;
pub mod embedding;
pub mod gateway;
pub mod request_log;
pub mod router;
pub mod translator;
pub mod usage;

pub use cache::{CacheHit, CacheScope, CacheStore, HitType, InMemoryCacheStore, SemanticCache};
pub use cascade::{Dispatched, FallbackCascade, FallbackKind, Outcome};
pub use client::{Attempted, ProviderClient};
pub use converter::ApiConverter;
pub use directory::{ContextRetriever, CredentialDirectory, ProviderDirectory, StaticDirectory, TokenDirectory};
pub use embedding::{EmbeddingService, OpenAIEmbeddingService};
pub use gateway::{Completion, Gateway, ServeMeta, StreamHandle, StreamTarget};
pub use request_log::{RequestLogEntry, RequestLogger, TracingRequestLogger};
pub use router::Router;
pub use translator::{StreamTranslator, ToolCallAccumulator, WireFrame};
pub use usage::{UsageAccountant, UsageRecord};
