//! Collaborator directories
//!
//! Token, provider and credential lookups the gateway needs per request, plus
//! the optional knowledge-vault retriever. `StaticDirectory` serves all of
//! them from the JSON configuration file.

use crate::config::AppConfig;
use crate::providers::{Credential, ProviderEndpoint};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves gateway API tokens to user ids
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    /// `None` when the token is unknown
    async fn authenticate(&self, token: &str) -> Result<Option<String>>;
}

/// Resolves provider names to endpoints
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Look up a provider by its (normalized) name as seen by `user_id`
    async fn resolve(&self, name: &str, user_id: &str) -> Result<Option<ProviderEndpoint>>;

    /// Providers the user holds at least one credential for, in a stable order
    async fn configured_for(&self, user_id: &str) -> Result<Vec<ProviderEndpoint>>;
}

/// Fetches a user's credentials for one provider
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// Ordered credential list; empty when the user has none
    async fn fetch(&self, user_id: &str, provider: &ProviderEndpoint) -> Result<Vec<Credential>>;
}

/// Retrieves knowledge-vault passages for context injection
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, user_id: &str, vault_id: &str, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// Provider names are matched case-insensitively and without spaces
pub fn normalize_provider_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase()
}

/// Directory backed by the loaded configuration file
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    tokens: HashMap<String, String>,
    providers: Vec<ProviderEndpoint>,
    credentials: HashMap<(String, String), Vec<Credential>>,
}

impl StaticDirectory {
    pub fn from_config(config: &AppConfig) -> Self {
        let providers: Vec<ProviderEndpoint> = config
            .providers
            .iter()
            .map(|(name, provider)| ProviderEndpoint {
                id: provider.id.clone().unwrap_or_else(|| name.clone()),
                name: normalize_provider_name(name),
                base_url: provider.base_url.clone(),
            })
            .collect();

        let mut credentials = HashMap::new();
        for (user, by_provider) in &config.credentials {
            for (provider_name, entries) in by_provider {
                let Some(provider_id) = config.provider_id(provider_name) else {
                    continue;
                };
                let list: Vec<Credential> = entries
                    .iter()
                    .map(|c| Credential {
                        id: c.id.clone(),
                        name: if c.name.is_empty() { c.id.clone() } else { c.name.clone() },
                        secret: c.key.clone(),
                        base_url: c.base_url.clone(),
                    })
                    .collect();
                credentials.insert((user.clone(), provider_id), list);
            }
        }

        Self {
            tokens: config.tokens.clone().into_iter().collect(),
            providers,
            credentials,
        }
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl TokenDirectory for StaticDirectory {
    async fn authenticate(&self, token: &str) -> Result<Option<String>> {
        Ok(self.tokens.get(token).cloned())
    }
}

#[async_trait]
impl ProviderDirectory for StaticDirectory {
    async fn resolve(&self, name: &str, _user_id: &str) -> Result<Option<ProviderEndpoint>> {
        let wanted = normalize_provider_name(name);
        Ok(self.providers.iter().find(|p| p.name == wanted).cloned())
    }

    async fn configured_for(&self, user_id: &str) -> Result<Vec<ProviderEndpoint>> {
        Ok(self
            .providers
            .iter()
            .filter(|p| {
                self.credentials
                    .get(&(user_id.to_string(), p.id.clone()))
                    .map_or(false, |list| !list.is_empty())
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CredentialDirectory for StaticDirectory {
    async fn fetch(&self, user_id: &str, provider: &ProviderEndpoint) -> Result<Vec<Credential>> {
        Ok(self
            .credentials
            .get(&(user_id.to_string(), provider.id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}
