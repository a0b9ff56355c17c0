//! Embedding service
//!
//! Text to vector embeddings for the semantic cache, paid for with the
//! requesting user's own provider credentials

use super::directory::{normalize_provider_name, CredentialDirectory, ProviderDirectory};
use crate::config::file::EmbeddingConfig;
use crate::providers::{Credential, DEFAULT_BASE_URL};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Providers tried for embeddings after the configured one
const FALLBACK_EMBEDDING_PROVIDERS: &[&str] = &["openai", "openrouter"];

/// Abstraction for text to vector embedding
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, user_id: &str, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client
pub struct OpenAIEmbeddingService {
    client: reqwest::Client,
    providers: Arc<dyn ProviderDirectory>,
    credentials: Arc<dyn CredentialDirectory>,
    config: EmbeddingConfig,
}

impl OpenAIEmbeddingService {
    pub fn new(
        providers: Arc<dyn ProviderDirectory>,
        credentials: Arc<dyn CredentialDirectory>,
        config: EmbeddingConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build embedding HTTP client")?;
        Ok(Self { client, providers, credentials, config })
    }

    /// Provider names in the order they are tried
    fn candidate_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.provider.iter().map(|p| normalize_provider_name(p)).collect();
        for name in FALLBACK_EMBEDDING_PROVIDERS {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// First credential the user holds for an embedding-capable provider,
    /// with the base URL to call
    async fn select_credential(&self, user_id: &str) -> Result<(String, Credential)> {
        for name in self.candidate_providers() {
            let Some(endpoint) = self.providers.resolve(&name, user_id).await? else {
                continue;
            };
            let credentials = self.credentials.fetch(user_id, &endpoint).await?;
            if let Some(credential) = credentials.into_iter().next() {
                let base_url = credential
                    .base_url
                    .clone()
                    .or_else(|| endpoint.base_url.clone())
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
                return Ok((base_url, credential));
            }
        }
        anyhow::bail!("No embedding-capable credentials for user {}", user_id)
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbeddingService {
    async fn embed(&self, user_id: &str, text: &str) -> Result<Vec<f32>> {
        let (base_url, credential) = self.select_credential(user_id).await?;
        let url = format!("{}/embeddings", base_url.trim_end_matches('/'));
        debug!(credential = %credential.id, model = %self.config.model, "Requesting embedding");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credential.secret)
            .json(&EmbeddingRequest { model: &self.config.model, input: text })
            .send()
            .await
            .context("Embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error {}: {}", status, crate::utils::error::sanitize_message(&body));
        }

        let data: EmbeddingResponse = response.json().await.context("Failed to parse embedding response")?;
        data.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("Empty embedding response")
    }
}
