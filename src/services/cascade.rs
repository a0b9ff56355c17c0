//! Fallback cascade
//!
//! When the requested model's provider is exhausted, retries the same bare
//! model on the user's other providers and then the caller's explicit
//! fallback model (or the reverse, per `FallbackOrder`).

use super::client::{Attempted, ProviderClient};
use super::router::{split_model, Router};
use crate::config::FallbackOrder;
use crate::models::openai::{ChatRequest, ChatResponse};
use crate::models::RotationLogEntry;
use crate::providers::{ChunkStream, ProviderEndpoint};
use crate::utils::error::{AppError, AppResult, Exhausted};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Which cascade step produced the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Same bare model on another provider
    Provider,
    /// Caller-declared fallback model
    Explicit,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::Provider => "provider",
            FallbackKind::Explicit => "explicit",
        }
    }
}

/// A successfully dispatched request
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    /// `provider:model` that actually served the request
    pub served_model: String,
    /// Provider name that served the request
    pub provider: String,
    /// Display name of the credential used
    pub credential_name: String,
    /// Rotation log of the serving provider
    pub rotation_log: Vec<RotationLogEntry>,
    /// Set when a fallback step served the request
    pub fallback: Option<FallbackKind>,
}

impl<T> Dispatched<T> {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Outcome of trying one candidate
#[derive(Debug)]
pub enum Outcome<T> {
    Success(Dispatched<T>),
    /// Provider exhausted; the cascade may continue
    Retryable(AppError),
    /// Nothing to cascade from
    Terminal(AppError),
}

impl<T> Outcome<T> {
    /// Fallback eligibility depends only on the outcome kind
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Outcome::Retryable(_))
    }

    pub fn into_result(self) -> AppResult<Dispatched<T>> {
        match self {
            Outcome::Success(dispatched) => Ok(dispatched),
            Outcome::Retryable(err) | Outcome::Terminal(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Provider,
    Explicit,
}

impl FallbackOrder {
    fn steps(self) -> [Step; 2] {
        match self {
            FallbackOrder::ProviderFirst => [Step::Provider, Step::Explicit],
            FallbackOrder::ExplicitFirst => [Step::Explicit, Step::Provider],
        }
    }
}

/// Fallback cascade
pub struct FallbackCascade {
    router: Arc<Router>,
    order: FallbackOrder,
}

impl FallbackCascade {
    pub fn new(router: Arc<Router>, order: FallbackOrder) -> Self {
        Self { router, order }
    }

    /// Non-streaming dispatch
    pub async fn complete(&self, user_id: &str, request: &ChatRequest) -> AppResult<Dispatched<ChatResponse>> {
        self.dispatch(user_id, request, |client, req| async move { client.call(&req).await })
            .await
    }

    /// Streaming dispatch; resolves once a credential has committed
    pub async fn stream(&self, user_id: &str, request: &ChatRequest) -> AppResult<Dispatched<ChunkStream>> {
        self.dispatch(user_id, request, |client, req| async move { client.call_stream(&req).await })
            .await
    }

    async fn dispatch<T, F, Fut>(&self, user_id: &str, request: &ChatRequest, attempt: F) -> AppResult<Dispatched<T>>
    where
        F: Fn(ProviderClient, ChatRequest) -> Fut,
        Fut: Future<Output = Result<Attempted<T>, Exhausted>>,
    {
        let (outcome, primary_endpoint) = match self.router.resolve(user_id, &request.model).await {
            Ok(client) => {
                let endpoint = client.endpoint().clone();
                (Self::try_candidate(&attempt, client, request.clone(), None).await, Some(endpoint))
            }
            Err(err) => (Outcome::Terminal(err), None),
        };

        let eligible = outcome.is_fallback_eligible();
        let (original, primary_endpoint) = match (outcome.into_result(), primary_endpoint) {
            (Err(err), Some(endpoint)) if eligible => (err, endpoint),
            (result, _) => return result,
        };

        for step in self.order.steps() {
            let served = match step {
                Step::Provider => self.provider_step(user_id, request, &primary_endpoint, &attempt).await,
                Step::Explicit => self.explicit_step(user_id, request, &attempt).await,
            };
            if let Some(dispatched) = served {
                return Ok(dispatched);
            }
        }

        warn!(model = %request.model, "Fallback cascade exhausted: {}", original);
        Err(original)
    }

    async fn try_candidate<T, F, Fut>(
        attempt: &F,
        client: ProviderClient,
        request: ChatRequest,
        fallback: Option<FallbackKind>,
    ) -> Outcome<T>
    where
        F: Fn(ProviderClient, ChatRequest) -> Fut,
        Fut: Future<Output = Result<Attempted<T>, Exhausted>>,
    {
        let provider = client.endpoint().name.clone();
        let served_model = request.model.clone();
        match attempt(client, request).await {
            Ok(attempted) => Outcome::Success(Dispatched {
                value: attempted.value,
                served_model,
                provider,
                credential_name: attempted.credential_name,
                rotation_log: attempted.rotation_log,
                fallback,
            }),
            Err(exhausted) => Outcome::Retryable(AppError::from(exhausted)),
        }
    }

    async fn provider_step<T, F, Fut>(
        &self,
        user_id: &str,
        request: &ChatRequest,
        primary: &ProviderEndpoint,
        attempt: &F,
    ) -> Option<Dispatched<T>>
    where
        F: Fn(ProviderClient, ChatRequest) -> Fut,
        Fut: Future<Output = Result<Attempted<T>, Exhausted>>,
    {
        let (_, bare_model) = split_model(&request.model)?;

        for (model, client) in self.router.alternates(user_id, primary, bare_model).await {
            info!(from = %request.model, to = %model, "Trying provider fallback");
            let mut alternate = request.clone();
            alternate.model = model;

            match Self::try_candidate(attempt, client, alternate, Some(FallbackKind::Provider))
                .await
                .into_result()
            {
                Ok(dispatched) => return Some(dispatched),
                Err(err) => warn!("Provider fallback failed: {}", err),
            }
        }
        None
    }

    async fn explicit_step<T, F, Fut>(&self, user_id: &str, request: &ChatRequest, attempt: &F) -> Option<Dispatched<T>>
    where
        F: Fn(ProviderClient, ChatRequest) -> Fut,
        Fut: Future<Output = Result<Attempted<T>, Exhausted>>,
    {
        let fallback_model = request.fallback_model.as_deref()?.trim();
        if fallback_model.is_empty() || fallback_model == request.model {
            return None;
        }

        let client = match self.router.resolve(user_id, fallback_model).await {
            Ok(client) => client,
            Err(err) => {
                warn!(fallback = %fallback_model, "Explicit fallback model unavailable: {}", err);
                return None;
            }
        };

        info!(from = %request.model, to = %fallback_model, "Trying explicit fallback model");
        let mut fallback = request.clone();
        fallback.model = fallback_model.to_string();
        fallback.fallback_model = None;

        match Self::try_candidate(attempt, client, fallback, Some(FallbackKind::Explicit))
            .await
            .into_result()
        {
            Ok(dispatched) => Some(dispatched),
            Err(err) => {
                warn!("Explicit fallback failed: {}", err);
                None
            }
        }
    }
}
