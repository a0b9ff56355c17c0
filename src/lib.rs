//! BYOK LLM gateway library
//!
//! OpenAI-compatible Chat Completions and Responses API surface over users'
//! own provider keys, with credential rotation, fallback across providers and
//! models, stream translation and a semantic response cache

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod utils;

// Re-export common types
pub use config::{AppConfig, Settings};
pub use handlers::{build_router, create_router, AppState};
pub use models::{openai, responses};
pub use services::{ApiConverter, FallbackCascade, Gateway, SemanticCache, StreamTranslator};
pub use utils::error::{AppError, AppResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get version information
pub fn version_info() -> String {
    format!("{} v{} - {}", NAME, VERSION, DESCRIPTION)
}
