//! Semantic response cache
//!
//! Lookups try the exact prompt hash first and fall back to embedding
//! similarity within the same (user, model) scope. Every failure degrades to
//! a miss; writes are best-effort.

use super::embedding::EmbeddingService;
use crate::models::openai::{ChatMessage, ChatResponse, Tool};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default cosine similarity for a semantic hit
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.95;

/// Partition of the cache; entries never leak across scopes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheScope {
    pub user_id: String,
    pub model: String,
}

impl CacheScope {
    pub fn new(user_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), model: model.into() }
    }
}

/// Stored prompt and response pair
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub scope: CacheScope,
    pub prompt: String,
    pub prompt_hash: String,
    /// Empty when the embedding could not be computed at write time
    pub embedding: Vec<f32>,
    pub response: ChatResponse,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitType {
    Exact,
    Semantic,
}

impl HitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitType::Exact => "exact",
            HitType::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub hit_type: HitType,
    pub similarity: f32,
    pub response: ChatResponse,
}

/// Storage behind the semantic cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn find_exact(&self, scope: &CacheScope, prompt_hash: &str) -> Result<Option<CacheEntry>>;

    /// Nearest entry in scope at or above `threshold`
    async fn find_similar(
        &self,
        scope: &CacheScope,
        embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<(CacheEntry, f32)>>;

    async fn insert(&self, entry: CacheEntry) -> Result<()>;
}

/// Process-local store with brute-force similarity search
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<CacheScope, Vec<CacheEntry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn find_exact(&self, scope: &CacheScope, prompt_hash: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(scope)
            .and_then(|list| list.iter().find(|e| e.prompt_hash == prompt_hash))
            .cloned())
    }

    async fn find_similar(
        &self,
        scope: &CacheScope,
        embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<(CacheEntry, f32)>> {
        let entries = self.entries.read().await;
        let Some(list) = entries.get(scope) else {
            return Ok(None);
        };

        let best = list
            .iter()
            .filter(|e| e.embedding.len() == embedding.len() && !e.embedding.is_empty())
            .map(|e| (e, cosine_similarity(embedding, &e.embedding)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(best.map(|(entry, similarity)| (entry.clone(), similarity)))
    }

    async fn insert(&self, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        let list = entries.entry(entry.scope.clone()).or_default();
        // Last write wins
        list.retain(|e| e.prompt_hash != entry.prompt_hash);
        list.push(entry);
        Ok(())
    }
}

/// Cosine similarity; 0.0 for zero or non-finite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm_a.is_finite() || !norm_b.is_finite() || norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() {
        sim
    } else {
        0.0
    }
}

/// Recursively rebuild objects with sorted keys
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonicalize(v))).collect::<Map<_, _>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Semantic cache
#[derive(Clone)]
pub struct SemanticCache {
    store: Arc<dyn CacheStore>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    default_threshold: f32,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn CacheStore>, embedder: Option<Arc<dyn EmbeddingService>>) -> Self {
        Self { store, embedder, default_threshold: DEFAULT_SIMILARITY_THRESHOLD }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Deterministic serialization of the prompt
    pub fn canonical_prompt(messages: &[ChatMessage], tools: Option<&[Tool]>) -> String {
        let value = json!({ "messages": messages, "tools": tools });
        canonicalize(value).to_string()
    }

    pub fn prompt_hash(canonical: &str) -> String {
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Text sent to the embedding service
    pub fn embedding_text(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .filter_map(|m| m.content.as_ref().map(|c| format!("{}: {}", m.role, c.extract_text())))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn embed(&self, user_id: &str, messages: &[ChatMessage]) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(user_id, &Self::embedding_text(messages)).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(e) => {
                warn!(user = %user_id, "Cache embedding failed: {}", e);
                None
            }
        }
    }

    /// Look up a cached response
    pub async fn find(
        &self,
        scope: &CacheScope,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
        threshold: Option<f32>,
    ) -> Option<CacheHit> {
        let hash = Self::prompt_hash(&Self::canonical_prompt(messages, tools));

        match self.store.find_exact(scope, &hash).await {
            Ok(Some(entry)) => {
                info!(model = %scope.model, "Cache hit (exact)");
                return Some(CacheHit { hit_type: HitType::Exact, similarity: 1.0, response: entry.response });
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Cache exact lookup failed: {}", e);
                return None;
            }
        }

        let embedding = self.embed(&scope.user_id, messages).await?;
        let threshold = threshold.unwrap_or(self.default_threshold);
        match self.store.find_similar(scope, &embedding, threshold).await {
            Ok(Some((entry, similarity))) => {
                info!(model = %scope.model, similarity, "Cache hit (semantic)");
                Some(CacheHit { hit_type: HitType::Semantic, similarity, response: entry.response })
            }
            Ok(None) => {
                debug!(model = %scope.model, "Cache miss");
                None
            }
            Err(e) => {
                warn!("Cache similarity lookup failed: {}", e);
                None
            }
        }
    }

    /// Store a response; failures are logged and swallowed
    pub async fn save(&self, scope: CacheScope, messages: &[ChatMessage], tools: Option<&[Tool]>, response: ChatResponse) {
        let prompt = Self::canonical_prompt(messages, tools);
        let prompt_hash = Self::prompt_hash(&prompt);
        let embedding = self.embed(&scope.user_id, messages).await.unwrap_or_default();

        let entry = CacheEntry {
            scope,
            prompt,
            prompt_hash,
            embedding,
            response,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.insert(entry).await {
            warn!("Cache write failed: {}", e);
        }
    }
}
