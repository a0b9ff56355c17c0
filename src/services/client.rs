//! Provider client with credential rotation
//!
//! Tries a user's credentials for one provider in order until one succeeds.
//! Every failure kind rotates; the last failure decides the error surfaced
//! once the list is exhausted.

use crate::models::openai::{ChatRequest, ChatResponse};
use crate::models::RotationLogEntry;
use crate::providers::{ChunkStream, Credential, Provider, ProviderEndpoint, DEFAULT_BASE_URL};
use crate::utils::error::{AttemptError, Exhausted};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Result of a successful rotation
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    /// Display name of the credential that succeeded
    pub credential_name: String,
    /// One entry per credential tried, the last one being the success
    pub rotation_log: Vec<RotationLogEntry>,
}

/// Client for one provider and one user's credential list
#[derive(Clone)]
pub struct ProviderClient {
    endpoint: ProviderEndpoint,
    credentials: Vec<Credential>,
    transport: Arc<dyn Provider>,
}

impl ProviderClient {
    pub fn new(endpoint: ProviderEndpoint, credentials: Vec<Credential>, transport: Arc<dyn Provider>) -> Self {
        Self { endpoint, credentials, transport }
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }

    /// Base URL for an attempt with this credential
    fn base_url_for(&self, credential: &Credential) -> String {
        credential
            .base_url
            .clone()
            .or_else(|| self.endpoint.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// The request as the upstream must see it: bare model name, no prefix
    fn upstream_request(&self, request: &ChatRequest, stream: bool) -> ChatRequest {
        let mut upstream = request.clone();
        upstream.model = super::router::split_model(&request.model)
            .map(|(_, bare)| bare.to_string())
            .unwrap_or_else(|| request.model.clone());
        upstream.stream = Some(stream);
        if !stream {
            upstream.stream_options = None;
        }
        upstream
    }

    fn record_failure(&self, log: &mut Vec<RotationLogEntry>, credential: &Credential, err: &AttemptError) {
        warn!(
            provider = %self.endpoint.name,
            credential = %credential.id,
            status = %err.status_label(),
            "Credential attempt failed, rotating: {}",
            err.message
        );
        log.push(RotationLogEntry::failure(&credential.id, err.status_label(), err.message.clone()));
    }

    fn exhausted(&self, last: Option<AttemptError>, rotation_log: Vec<RotationLogEntry>) -> Exhausted {
        let last = last.unwrap_or_else(|| AttemptError::unclassified("No API keys available"));
        info!(
            provider = %self.endpoint.name,
            attempts = rotation_log.len(),
            "All credentials exhausted"
        );
        Exhausted { kind: last.kind, message: last.message, rotation_log }
    }

    /// Non-streaming call with rotation
    pub async fn call(&self, request: &ChatRequest) -> Result<Attempted<ChatResponse>, Exhausted> {
        let upstream = self.upstream_request(request, false);
        let mut rotation_log = Vec::with_capacity(self.credentials.len());
        let mut last_error = None;

        for credential in &self.credentials {
            let base_url = self.base_url_for(credential);
            match self.transport.chat_complete(&upstream, &base_url, credential).await {
                Ok(response) => {
                    debug!(provider = %self.endpoint.name, credential = %credential.id, "Credential attempt succeeded");
                    rotation_log.push(RotationLogEntry::success(&credential.id));
                    return Ok(Attempted {
                        value: response,
                        credential_name: credential.name.clone(),
                        rotation_log,
                    });
                }
                Err(err) => {
                    self.record_failure(&mut rotation_log, credential, &err);
                    last_error = Some(err);
                }
            }
        }

        Err(self.exhausted(last_error, rotation_log))
    }

    /// Streaming call with rotation
    ///
    /// A credential is committed once its stream yields the first item
    /// successfully (or ends cleanly without one). Failures after that point
    /// travel down the returned stream; no other credential is tried.
    pub async fn call_stream(&self, request: &ChatRequest) -> Result<Attempted<ChunkStream>, Exhausted> {
        let upstream = self.upstream_request(request, true);
        let mut rotation_log = Vec::with_capacity(self.credentials.len());
        let mut last_error = None;

        for credential in &self.credentials {
            let base_url = self.base_url_for(credential);
            let mut stream = match self.transport.chat_stream(&upstream, &base_url, credential).await {
                Ok(stream) => stream,
                Err(err) => {
                    self.record_failure(&mut rotation_log, credential, &err);
                    last_error = Some(err);
                    continue;
                }
            };

            let committed: ChunkStream = match stream.next().await {
                Some(Ok(first)) => Box::pin(futures::stream::once(async move { Ok(first) }).chain(stream)),
                Some(Err(err)) => {
                    self.record_failure(&mut rotation_log, credential, &err);
                    last_error = Some(err);
                    continue;
                }
                None => Box::pin(futures::stream::empty()),
            };

            debug!(provider = %self.endpoint.name, credential = %credential.id, "Stream committed to credential");
            rotation_log.push(RotationLogEntry::success(&credential.id));
            return Ok(Attempted {
                value: committed,
                credential_name: credential.name.clone(),
                rotation_log,
            });
        }

        Err(self.exhausted(last_error, rotation_log))
    }
}
