//! Request Router
//!
//! Resolves `provider:model` names to a provider client carrying the user's
//! credentials, and lists alternate providers for the same bare model

use super::client::ProviderClient;
use super::directory::{CredentialDirectory, ProviderDirectory};
use crate::providers::{Provider, ProviderEndpoint};
use crate::utils::error::{helpers, AppResult};
use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, warn};

/// Split a model name into provider and bare model
///
/// The first `:` wins; otherwise the first `/`. Names without either, or with
/// an empty side, have no provider.
pub fn split_model(model: &str) -> Option<(&str, &str)> {
    let (provider, bare) = model
        .split_once(':')
        .or_else(|| model.split_once('/'))?;
    if provider.trim().is_empty() || bare.trim().is_empty() {
        return None;
    }
    Some((provider.trim(), bare.trim()))
}

/// Request Router
///
/// Resolution is done per request against the directories; nothing about
/// providers is cached between requests.
pub struct Router {
    providers: Arc<dyn ProviderDirectory>,
    credentials: Arc<dyn CredentialDirectory>,
    transport: Arc<dyn Provider>,
}

impl Router {
    pub fn new(
        providers: Arc<dyn ProviderDirectory>,
        credentials: Arc<dyn CredentialDirectory>,
        transport: Arc<dyn Provider>,
    ) -> Self {
        Self { providers, credentials, transport }
    }

    /// Resolve a model name to a client for the user's credentials
    pub async fn resolve(&self, user_id: &str, model: &str) -> AppResult<ProviderClient> {
        let (provider_name, _) = split_model(model).ok_or_else(|| helpers::model_not_found(model))?;

        let endpoint = self
            .providers
            .resolve(provider_name, user_id)
            .await
            .context("Provider lookup failed")?
            .ok_or_else(|| helpers::model_not_found(model))?;

        let credentials = self
            .credentials
            .fetch(user_id, &endpoint)
            .await
            .context("Credential lookup failed")?;

        if credentials.is_empty() {
            debug!(user = %user_id, provider = %endpoint.name, "User has no credentials for provider");
            return Err(helpers::model_not_found(model));
        }

        debug!(provider = %endpoint.name, credentials = credentials.len(), "Resolved model {}", model);
        Ok(ProviderClient::new(endpoint, credentials, self.transport.clone()))
    }

    /// Other providers the user can reach, each paired with the
    /// `provider:bare_model` name to request there
    ///
    /// Directory failures yield no alternates rather than an error.
    pub async fn alternates(
        &self,
        user_id: &str,
        primary: &ProviderEndpoint,
        bare_model: &str,
    ) -> Vec<(String, ProviderClient)> {
        let endpoints = match self.providers.configured_for(user_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(user = %user_id, "Failed to list configured providers: {}", e);
                return Vec::new();
            }
        };

        let mut alternates = Vec::new();
        for endpoint in endpoints.into_iter().filter(|e| e.id != primary.id) {
            match self.credentials.fetch(user_id, &endpoint).await {
                Ok(credentials) if !credentials.is_empty() => {
                    let model = format!("{}:{}", endpoint.name, bare_model);
                    alternates.push((model, ProviderClient::new(endpoint, credentials, self.transport.clone())));
                }
                Ok(_) => {}
                Err(e) => warn!(provider = %endpoint.name, "Failed to fetch credentials: {}", e),
            }
        }
        alternates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Credential, OpenAIProvider};
    use crate::utils::error::AppError;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Provider configs that differ per user
    struct PerUser;

    #[async_trait]
    impl ProviderDirectory for PerUser {
        async fn resolve(&self, name: &str, user_id: &str) -> Result<Option<ProviderEndpoint>> {
            if name != "custom" {
                return Ok(None);
            }
            Ok(Some(ProviderEndpoint {
                id: format!("custom-{}", user_id),
                name: "custom".to_string(),
                base_url: Some(format!("https://{}.llm.example.com/v1", user_id)),
            }))
        }

        async fn configured_for(&self, _user_id: &str) -> Result<Vec<ProviderEndpoint>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl CredentialDirectory for PerUser {
        async fn fetch(&self, user_id: &str, provider: &ProviderEndpoint) -> Result<Vec<Credential>> {
            if provider.id != format!("custom-{}", user_id) || user_id == "bob" {
                return Ok(Vec::new());
            }
            Ok(vec![Credential {
                id: "k1".to_string(),
                name: "k1".to_string(),
                secret: "sk-k1".to_string(),
                base_url: None,
            }])
        }
    }

    struct Broken;

    #[async_trait]
    impl ProviderDirectory for Broken {
        async fn resolve(&self, _name: &str, _user_id: &str) -> Result<Option<ProviderEndpoint>> {
            anyhow::bail!("directory unavailable")
        }

        async fn configured_for(&self, _user_id: &str) -> Result<Vec<ProviderEndpoint>> {
            Ok(Vec::new())
        }
    }

    fn router(providers: Arc<dyn ProviderDirectory>) -> Router {
        Router::new(providers, Arc::new(PerUser), Arc::new(OpenAIProvider::new().unwrap()))
    }

    #[tokio::test]
    async fn test_resolve_passes_the_user_to_the_directory() {
        let router = router(Arc::new(PerUser));

        let client = router.resolve("alice", "custom:gpt-4o").await.unwrap();
        assert_eq!(client.endpoint().id, "custom-alice");
        assert_eq!(client.endpoint().base_url.as_deref(), Some("https://alice.llm.example.com/v1"));

        let missing = router.resolve("bob", "custom:gpt-4o").await;
        assert!(matches!(missing, Err(AppError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_failure_is_a_server_error() {
        let router = router(Arc::new(Broken));
        let err = router.resolve("alice", "custom:gpt-4o").await.err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_split_model_prefers_colon() {
        assert_eq!(split_model("openai:gpt-4o"), Some(("openai", "gpt-4o")));
        assert_eq!(split_model("openrouter:meta-llama/llama-3-70b"), Some(("openrouter", "meta-llama/llama-3-70b")));
        assert_eq!(split_model("groq/llama3-8b"), Some(("groq", "llama3-8b")));
    }

    #[test]
    fn test_split_model_rejects_bare_names() {
        assert_eq!(split_model("gpt-4o"), None);
        assert_eq!(split_model(":gpt-4o"), None);
        assert_eq!(split_model("openai:"), None);
    }
}
