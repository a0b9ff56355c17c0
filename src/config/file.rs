//! File-based configuration loading
//!
//! Loads gateway tokens, provider endpoints and per-user credentials from a
//! JSON file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host (default: "127.0.0.1" - localhost only)
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (default: 8082)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8082
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Application configuration loaded from JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server address override (optional, environment settings apply otherwise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Gateway API token to user id
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,

    /// Provider endpoints keyed by provider name
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Per-user credential lists: user id to provider name to credentials
    #[serde(default)]
    pub credentials: BTreeMap<String, BTreeMap<String, Vec<CredentialConfig>>>,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Provider endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable provider id (defaults to the provider name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Base URL for the provider API
    #[serde(rename = "baseUrl", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// One stored upstream API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Credential id recorded in rotation logs
    pub id: String,

    /// Display name used for billing and logs
    #[serde(default)]
    pub name: String,

    /// Secret API key
    pub key: String,

    /// Base URL override for this credential
    #[serde(rename = "baseUrl", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Preferred provider whose credentials pay for embeddings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_embedding_model(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config JSON")?;

        config.validate()?;

        debug!(
            "Loaded {} providers, {} users with credentials",
            config.providers.len(),
            config.credentials.len()
        );
        Ok(config)
    }

    /// Load configuration from default locations
    /// Searches in order:
    /// 1. $BYOKPROXY_CONFIG
    /// 2. ~/.config/byokproxy/byokproxy.json
    /// 3. ./byokproxy.json
    ///
    /// Returns error if no configuration file is found.
    pub fn load_default() -> Result<Self> {
        for path in Self::candidate_paths() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        anyhow::bail!(
            "Configuration file not found. Please create one at:\n\
             - $BYOKPROXY_CONFIG\n\
             - ~/.config/byokproxy/byokproxy.json (recommended)\n\
             - ./byokproxy.json (current directory)"
        )
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var("BYOKPROXY_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("byokproxy").join("byokproxy.json"));
        }
        paths.push(PathBuf::from("byokproxy.json"));
        paths
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("At least one provider must be configured");
        }

        for (name, provider) in &self.providers {
            if let Some(base_url) = &provider.base_url {
                if !base_url.starts_with("http") {
                    anyhow::bail!("Invalid base URL for provider '{}': {}", name, base_url);
                }
            }
        }

        let token_users: Vec<&String> = self.tokens.values().collect();
        for (user, by_provider) in &self.credentials {
            if !token_users.contains(&user) {
                anyhow::bail!("User '{}' has credentials but no API token", user);
            }

            for (provider_name, credentials) in by_provider {
                if !self.providers.contains_key(provider_name) {
                    anyhow::bail!(
                        "Credentials of user '{}' reference unknown provider '{}'",
                        user,
                        provider_name
                    );
                }

                for credential in credentials {
                    if credential.key.trim().is_empty() {
                        anyhow::bail!(
                            "Credential '{}' of user '{}' for provider '{}' has an empty key",
                            credential.id,
                            user,
                            provider_name
                        );
                    }
                    if let Some(base_url) = &credential.base_url {
                        if !base_url.starts_with("http") {
                            anyhow::bail!("Invalid base URL for credential '{}': {}", credential.id, base_url);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Provider id for a configured provider name
    pub fn provider_id(&self, name: &str) -> Option<String> {
        self.providers
            .get(name)
            .map(|p| p.id.clone().unwrap_or_else(|| name.to_string()))
    }
}
