//! Gateway service
//!
//! Per-request orchestration: cache lookup, optional vault context, the
//! fallback cascade, stream translation, usage accounting, and the detached
//! logging and cache-write side effects.

use super::cache::{CacheHit, CacheScope, HitType, SemanticCache};
use super::cascade::{FallbackCascade, FallbackKind};
use super::directory::ContextRetriever;
use super::request_log::{schedule, RequestLogEntry, RequestLogger};
use super::router::split_model;
use super::translator::{replay_chunks, StreamTranslator, WireFrame};
use super::usage::{count_completion_tokens, count_message_tokens, count_tool_tokens, resolve_usage, UsageAccountant};
use crate::config::{settings::CacheConfig, CacheLookup};
use crate::models::openai::{ChatMessage, ChatRequest, ChatResponse, Tool, Usage};
use crate::models::responses::ResponseObject;
use crate::models::RotationLogEntry;
use crate::providers::ChunkStream;
use crate::utils::error::{AppError, AppResult};
use crate::utils::logging::create_request_log_summary;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Passages requested from a vault per request
const CONTEXT_PASSAGES: usize = 5;
/// Frames buffered between the pump task and the client
const FRAME_BUFFER: usize = 64;

/// Out-of-band facts about how a request was served
#[derive(Debug, Clone, PartialEq)]
pub struct ServeMeta {
    pub served_model: String,
    pub fallback: Option<FallbackKind>,
    pub cache: Option<(HitType, f32)>,
}

impl ServeMeta {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Non-streaming result
#[derive(Debug)]
pub struct Completion {
    pub response: ChatResponse,
    pub usage: Usage,
    pub meta: ServeMeta,
}

/// Wire format a stream is translated into
#[derive(Debug, Clone)]
pub enum StreamTarget {
    Chat,
    /// Responses events built around this in-progress response
    Responses(ResponseObject),
}

/// Streaming result; `frames` ends with a terminal frame unless the client
/// goes away first
pub struct StreamHandle {
    pub frames: ReceiverStream<WireFrame>,
    pub meta: ServeMeta,
}

/// Where a successful response is written back to the cache
struct CachePlan {
    scope: CacheScope,
    messages: Vec<ChatMessage>,
    tools: Option<Vec<Tool>>,
}

struct Prepared {
    request: ChatRequest,
    hit: Option<CacheHit>,
    plan: Option<CachePlan>,
}

/// Gateway service
pub struct Gateway {
    cascade: FallbackCascade,
    cache: SemanticCache,
    cache_config: CacheConfig,
    logger: Arc<dyn RequestLogger>,
    retriever: Option<Arc<dyn ContextRetriever>>,
}

impl Gateway {
    pub fn new(
        cascade: FallbackCascade,
        cache: SemanticCache,
        cache_config: CacheConfig,
        logger: Arc<dyn RequestLogger>,
    ) -> Self {
        Self { cascade, cache, cache_config, logger, retriever: None }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    fn cache_enabled(&self, request: &ChatRequest) -> bool {
        request.cache.unwrap_or(self.cache_config.enabled)
    }

    /// Inject vault passages as a leading system message; failures only log
    async fn inject_context(&self, user_id: &str, request: &mut ChatRequest) {
        let (Some(retriever), Some(vault_id)) = (&self.retriever, request.vault_id.as_deref()) else {
            return;
        };
        let Some(query) = request.last_user_text().filter(|q| !q.trim().is_empty()) else {
            return;
        };

        match retriever.retrieve(user_id, vault_id, &query, CONTEXT_PASSAGES).await {
            Ok(passages) if !passages.is_empty() => {
                debug!(vault = %vault_id, passages = passages.len(), "Injecting vault context");
                let context = format!("Relevant context:\n\n{}", passages.join("\n\n---\n\n"));
                request.messages.insert(0, ChatMessage::text("system", context));
            }
            Ok(_) => {}
            Err(e) => warn!(vault = %vault_id, "Context retrieval failed: {}", e),
        }
    }

    async fn lookup(&self, scope: &CacheScope, request: &ChatRequest) -> (Option<CacheHit>, CachePlan) {
        let plan = CachePlan {
            scope: scope.clone(),
            messages: request.messages.clone(),
            tools: request.tools.clone(),
        };
        let hit = self
            .cache
            .find(scope, &plan.messages, plan.tools.as_deref(), request.cache_threshold)
            .await;
        (hit, plan)
    }

    /// Cache lookup and context injection, in the configured order
    async fn prepare(&self, user_id: &str, mut request: ChatRequest) -> Prepared {
        let scope = CacheScope::new(user_id, &request.model);
        let caching = self.cache_enabled(&request);
        let mut hit = None;
        let mut plan = None;

        if caching && self.cache_config.lookup == CacheLookup::BeforeContext {
            let (found, key) = self.lookup(&scope, &request).await;
            hit = found;
            plan = Some(key);
        }
        if hit.is_some() {
            return Prepared { request, hit, plan };
        }

        self.inject_context(user_id, &mut request).await;

        if caching && self.cache_config.lookup == CacheLookup::AfterContext {
            let (found, key) = self.lookup(&scope, &request).await;
            hit = found;
            plan = Some(key);
        }
        Prepared { request, hit, plan }
    }

    fn prompt_tokens(request: &ChatRequest) -> u32 {
        count_message_tokens(&request.messages, &request.model)
            + request.tools.as_deref().map_or(0, |tools| count_tool_tokens(tools, &request.model))
    }

    fn log_entry(user_id: &str, request: &ChatRequest) -> RequestLogEntry {
        let mut entry = RequestLogEntry::new(user_id, &request.model);
        entry.provider = split_model(&request.model).map(|(p, _)| p.to_string()).unwrap_or_default();
        entry.request_summary = Some(create_request_log_summary(request));
        entry.streamed = request.is_stream();
        entry
    }

    fn log_failure(&self, mut entry: RequestLogEntry, accountant: &UsageAccountant, err: &AppError) {
        entry.status = err.status_code().as_u16();
        entry.error = Some(err.to_string());
        entry.response_time_ms = accountant.elapsed_ms();
        schedule(self.logger.clone(), entry);
    }

    /// Serve a non-streaming request
    pub async fn complete(&self, user_id: &str, request: ChatRequest) -> AppResult<Completion> {
        let accountant = UsageAccountant::start();
        let mut entry = Self::log_entry(user_id, &request);
        let requested_model = request.model.clone();
        let Prepared { request, hit, plan } = self.prepare(user_id, request).await;
        let prompt_tokens = Self::prompt_tokens(&request);

        if let Some(hit) = hit {
            let mut response = hit.response;
            response.model = requested_model.clone();
            let completion = count_completion_tokens(&response.first_text(), &response.first_tool_calls(), &requested_model);
            let usage = resolve_usage(response.usage, prompt_tokens, completion);
            response.usage = Some(usage);

            entry.cache_hit = Some(hit.hit_type.as_str().to_string());
            entry.served_model = Some(requested_model.clone());
            entry.usage = Some(accountant.finish(usage, "", Vec::new()));
            entry.response_time_ms = accountant.elapsed_ms();
            schedule(self.logger.clone(), entry);

            return Ok(Completion {
                response,
                usage,
                meta: ServeMeta { served_model: requested_model, fallback: None, cache: Some((hit.hit_type, hit.similarity)) },
            });
        }

        let dispatched = match self.cascade.complete(user_id, &request).await {
            Ok(dispatched) => dispatched,
            Err(err) => {
                self.log_failure(entry, &accountant, &err);
                return Err(err);
            }
        };

        let is_fallback = dispatched.is_fallback();
        let mut response = dispatched.value;
        response.model = dispatched.served_model.clone();
        let completion = count_completion_tokens(
            &response.first_text(),
            &response.first_tool_calls(),
            &dispatched.served_model,
        );
        let usage = resolve_usage(response.usage, prompt_tokens, completion);
        response.usage = Some(usage);

        entry.provider = dispatched.provider.clone();
        entry.served_model = Some(dispatched.served_model.clone());
        entry.is_fallback = is_fallback;
        entry.fallback_kind = dispatched.fallback.map(|k| k.as_str().to_string());
        entry.usage = Some(accountant.finish(usage, dispatched.credential_name, dispatched.rotation_log));
        entry.response_time_ms = accountant.elapsed_ms();
        schedule(self.logger.clone(), entry);

        // Only primary answers are cached under the requested model
        if let Some(plan) = plan.filter(|_| !is_fallback) {
            let cache = self.cache.clone();
            let cached = response.clone();
            tokio::spawn(async move { cache.save(plan.scope, &plan.messages, plan.tools.as_deref(), cached).await });
        }

        info!(
            model = %requested_model,
            served_model = %dispatched.served_model,
            fallback = is_fallback,
            total_tokens = usage.total_tokens,
            "Completed chat request"
        );

        Ok(Completion {
            response,
            usage,
            meta: ServeMeta { served_model: dispatched.served_model, fallback: dispatched.fallback, cache: None },
        })
    }

    /// Serve a streaming request
    ///
    /// Errors returned here happen before any frame exists and can still be
    /// rendered as an ordinary error response.
    pub async fn stream(&self, user_id: &str, request: ChatRequest, target: StreamTarget) -> AppResult<StreamHandle> {
        let accountant = UsageAccountant::start();
        let mut entry = Self::log_entry(user_id, &request);
        entry.streamed = true;
        let requested_model = request.model.clone();
        let Prepared { request, hit, plan } = self.prepare(user_id, request).await;
        let prompt_tokens = Self::prompt_tokens(&request);

        let (source, meta, credential_name, rotation_log, plan) = match hit {
            Some(hit) => {
                entry.cache_hit = Some(hit.hit_type.as_str().to_string());
                let chunks = replay_chunks(&hit.response, self.cache_config.replay_chunk_chars);
                let meta = ServeMeta {
                    served_model: requested_model.clone(),
                    fallback: None,
                    cache: Some((hit.hit_type, hit.similarity)),
                };
                let replay: ChunkStream = Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)));
                (replay, meta, String::new(), Vec::new(), None)
            }
            None => {
                let dispatched = match self.cascade.stream(user_id, &request).await {
                    Ok(dispatched) => dispatched,
                    Err(err) => {
                        self.log_failure(entry, &accountant, &err);
                        return Err(err);
                    }
                };
                entry.provider = dispatched.provider.clone();
                entry.is_fallback = dispatched.is_fallback();
                entry.fallback_kind = dispatched.fallback.map(|k| k.as_str().to_string());
                let plan = plan.filter(|_| !dispatched.is_fallback());
                let meta = ServeMeta {
                    served_model: dispatched.served_model,
                    fallback: dispatched.fallback,
                    cache: None,
                };
                (dispatched.value, meta, dispatched.credential_name, dispatched.rotation_log, plan)
            }
        };
        entry.served_model = Some(meta.served_model.clone());

        let translator = match target {
            StreamTarget::Chat => StreamTranslator::chat(meta.served_model.clone(), prompt_tokens),
            StreamTarget::Responses(mut template) => {
                template.model = meta.served_model.clone();
                StreamTranslator::responses(template, prompt_tokens)
            }
        };

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let pump = Pump {
            tx,
            source,
            translator,
            accountant,
            entry,
            credential_name,
            rotation_log,
            logger: self.logger.clone(),
            cache: self.cache.clone(),
            plan,
        };
        tokio::spawn(pump.run());

        Ok(StreamHandle { frames: ReceiverStream::new(rx), meta })
    }
}

/// Moves one stream from upstream to the client
struct Pump {
    tx: mpsc::Sender<WireFrame>,
    source: ChunkStream,
    translator: StreamTranslator,
    accountant: UsageAccountant,
    entry: RequestLogEntry,
    credential_name: String,
    rotation_log: Vec<RotationLogEntry>,
    logger: Arc<dyn RequestLogger>,
    cache: SemanticCache,
    plan: Option<CachePlan>,
}

impl Pump {
    async fn send_all(tx: &mpsc::Sender<WireFrame>, frames: Vec<WireFrame>) -> bool {
        for frame in frames {
            if tx.send(frame).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn run(mut self) {
        let opening = self.translator.begin();
        let mut connected = Self::send_all(&self.tx, opening).await;
        let mut failure: Option<AppError> = None;

        while connected {
            let item = tokio::select! {
                _ = self.tx.closed() => {
                    connected = false;
                    break;
                }
                item = self.source.next() => item,
            };
            match item {
                Some(Ok(chunk)) => {
                    let frames = self.translator.on_chunk(chunk);
                    connected = Self::send_all(&self.tx, frames).await;
                }
                Some(Err(err)) => {
                    warn!(model = %self.entry.model, "Upstream stream failed after commit: {}", err.message);
                    failure = Some(AppError::from(err));
                    break;
                }
                None => break,
            }
        }

        let usage = self.translator.final_usage();
        let mut entry = self.entry;
        entry.usage = Some(self.accountant.finish(usage, self.credential_name, self.rotation_log));
        entry.response_time_ms = self.accountant.elapsed_ms();
        if let Some(err) = &failure {
            entry.status = err.status_code().as_u16();
            entry.error = Some(err.to_string());
        }

        if !connected {
            // Closes the upstream connection before the log is written
            drop(self.source);
            info!(model = %entry.model, "Client disconnected mid-stream");
            entry.error = Some("client disconnected".to_string());
            schedule(self.logger, entry);
            return;
        }

        let mut side_effects = vec![schedule(self.logger.clone(), entry)];
        if let Some(plan) = self.plan.filter(|_| failure.is_none() && self.translator.has_output()) {
            let cache = self.cache.clone();
            let cached = self.translator.assembled_response(usage);
            side_effects.push(tokio::spawn(async move {
                cache.save(plan.scope, &plan.messages, plan.tools.as_deref(), cached).await
            }));
        }
        for handle in side_effects {
            if let Err(e) = handle.await {
                warn!("Stream side effect failed: {}", e);
            }
        }

        let closing = match &failure {
            Some(err) => self.translator.fail(err),
            None => self.translator.finish(usage),
        };
        Self::send_all(&self.tx, closing).await;
    }
}
