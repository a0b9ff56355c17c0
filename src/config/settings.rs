//! Application configuration settings
//!
//! Process-level settings read from the environment (and `.env`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream HTTP configuration
    pub upstream: UpstreamConfig,
    /// Semantic cache configuration
    pub cache: CacheConfig,
    /// Fallback cascade configuration
    pub fallback: FallbackConfig,
    /// Request configuration
    pub request: RequestConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

/// Upstream HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Non-streaming request timeout in seconds
    pub timeout: u64,
    /// Streaming request timeout in seconds
    pub stream_timeout: u64,
}

/// Semantic cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether requests are cached unless they opt out
    pub enabled: bool,
    /// Default cosine similarity threshold for semantic hits
    pub similarity_threshold: f32,
    /// Characters per chunk when replaying a cached response as a stream
    pub replay_chunk_chars: usize,
    /// Whether the lookup happens before or after context injection
    pub lookup: CacheLookup,
}

/// Fallback cascade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Which fallback step runs first
    pub order: FallbackOrder,
}

/// Request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Maximum request size in bytes
    pub max_request_size: usize,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allowed origins for CORS
    pub allowed_origins: Vec<String>,
    /// Whether CORS is enabled
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (text/json)
    pub format: String,
}

/// Order of the two fallback steps after the requested model fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackOrder {
    /// Same model on other providers, then the explicit fallback model
    ProviderFirst,
    /// Explicit fallback model, then same model on other providers
    ExplicitFirst,
}

impl FromStr for FallbackOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "provider_first" => Ok(FallbackOrder::ProviderFirst),
            "explicit_first" => Ok(FallbackOrder::ExplicitFirst),
            other => anyhow::bail!("Invalid fallback order: {}", other),
        }
    }
}

/// Position of the cache lookup relative to context injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLookup {
    /// Key on the messages the client sent
    BeforeContext,
    /// Key on the messages after vault passages were injected
    AfterContext,
}

impl FromStr for CacheLookup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "before_context" => Ok(CacheLookup::BeforeContext),
            "after_context" => Ok(CacheLookup::AfterContext),
            other => anyhow::bail!("Invalid cache lookup position: {}", other),
        }
    }
}

impl Settings {
    /// Create a new configuration instance
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let settings = Self {
            server: ServerConfig {
                host: get_env_or_default("SERVER_HOST", "0.0.0.0"),
                port: get_env_or_default("SERVER_PORT", "8082")
                    .parse()
                    .context("Invalid port number")?,
            },
            upstream: UpstreamConfig {
                timeout: get_env_or_default("UPSTREAM_TIMEOUT", "120")
                    .parse()
                    .context("Invalid upstream timeout")?,
                stream_timeout: get_env_or_default("UPSTREAM_STREAM_TIMEOUT", "300")
                    .parse()
                    .context("Invalid upstream stream timeout")?,
            },
            cache: CacheConfig {
                enabled: get_env_or_default("CACHE_ENABLED", "true")
                    .parse()
                    .context("Invalid cache enabled flag")?,
                similarity_threshold: get_env_or_default("CACHE_SIMILARITY_THRESHOLD", "0.95")
                    .parse()
                    .context("Invalid cache similarity threshold")?,
                replay_chunk_chars: get_env_or_default("CACHE_REPLAY_CHUNK_CHARS", "16")
                    .parse()
                    .context("Invalid cache replay chunk size")?,
                lookup: get_env_or_default("CACHE_LOOKUP", "before_context").parse()?,
            },
            fallback: FallbackConfig {
                order: get_env_or_default("FALLBACK_ORDER", "provider_first").parse()?,
            },
            request: RequestConfig {
                max_request_size: get_env_or_default("MAX_REQUEST_SIZE", "10485760")
                    .parse()
                    .context("Invalid maximum request size")?,
            },
            security: SecurityConfig {
                allowed_origins: get_env_or_default("ALLOWED_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                cors_enabled: get_env_or_default("CORS_ENABLED", "true")
                    .parse()
                    .context("Invalid CORS enabled flag")?,
            },
            logging: LoggingConfig {
                level: get_env_or_default("RUST_LOG", "info"),
                format: get_env_or_default("LOG_FORMAT", "text"),
            },
        };

        // Validate configuration
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port == 0 {
            anyhow::bail!("Port number cannot be 0");
        }

        // Validate timeout values
        if self.upstream.timeout == 0 || self.upstream.stream_timeout == 0 {
            anyhow::bail!("Timeout values cannot be 0");
        }

        let threshold = self.cache.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!(
                "Cache similarity threshold must be in (0, 1], got {}",
                self.cache.similarity_threshold
            );
        }

        if self.cache.replay_chunk_chars == 0 {
            anyhow::bail!("Cache replay chunk size cannot be 0");
        }

        // Validate request size limit
        if self.request.max_request_size == 0 {
            anyhow::bail!("Maximum request size cannot be 0");
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        // Validate log format
        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "0.0.0.0".to_string(), port: 8082 },
            upstream: UpstreamConfig { timeout: 120, stream_timeout: 300 },
            cache: CacheConfig {
                enabled: true,
                similarity_threshold: 0.95,
                replay_chunk_chars: 16,
                lookup: CacheLookup::BeforeContext,
            },
            fallback: FallbackConfig { order: FallbackOrder::ProviderFirst },
            request: RequestConfig { max_request_size: 10 * 1024 * 1024 },
            security: SecurityConfig {
                allowed_origins: vec!["*".to_string()],
                cors_enabled: true,
            },
            logging: LoggingConfig { level: "info".to_string(), format: "text".to_string() },
        }
    }
}

/// Get environment variable or default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
