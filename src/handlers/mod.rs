//! HTTP handlers module
//!
//! Contains all HTTP endpoint handling logic and the router wiring

pub mod chat;
pub mod health;
pub mod responses;

use crate::config::{AppConfig, Settings};
use crate::middleware::{auth_middleware, request_logging_middleware};
use crate::providers::OpenAIProvider;
use crate::services::cache::{InMemoryCacheStore, SemanticCache};
use crate::services::gateway::{Gateway, ServeMeta, StreamHandle};
use crate::services::{
    ApiConverter, EmbeddingService, FallbackCascade, OpenAIEmbeddingService, Router as ModelRouter,
    StaticDirectory, TokenDirectory, TracingRequestLogger,
};
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderMap, HeaderValue},
    middleware,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Header naming a fallback model; overrides the body field
pub const FALLBACK_MODEL_HEADER: &str = "x-fallback-model";

/// Application state
pub struct AppState {
    pub settings: Settings,
    pub gateway: Gateway,
    pub tokens: Arc<dyn TokenDirectory>,
    pub converter: ApiConverter,
    /// Number of configured providers, reported by readiness
    pub provider_count: usize,
}

/// Create application router from settings and the configuration file
pub fn create_router(settings: Settings, config: &AppConfig) -> Result<Router> {
    let directory = Arc::new(StaticDirectory::from_config(config));
    let transport = Arc::new(OpenAIProvider::with_timeouts(
        settings.upstream.timeout,
        settings.upstream.stream_timeout,
    )?);

    let router = Arc::new(ModelRouter::new(directory.clone(), directory.clone(), transport));
    let cascade = FallbackCascade::new(router, settings.fallback.order);

    let embedder: Arc<dyn EmbeddingService> = Arc::new(OpenAIEmbeddingService::new(
        directory.clone(),
        directory.clone(),
        config.embedding.clone(),
    )?);
    let cache = SemanticCache::new(Arc::new(InMemoryCacheStore::new()), Some(embedder))
        .with_threshold(settings.cache.similarity_threshold);

    let gateway = Gateway::new(cascade, cache, settings.cache.clone(), Arc::new(TracingRequestLogger));
    info!(
        providers = directory.provider_count(),
        fallback_order = ?settings.fallback.order,
        cache_enabled = settings.cache.enabled,
        "Gateway initialized"
    );

    let state = Arc::new(AppState {
        settings,
        gateway,
        tokens: directory.clone(),
        converter: ApiConverter::new(),
        provider_count: directory.provider_count(),
    });
    Ok(build_router(state))
}

/// Assemble routes and middleware around prepared state
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/chat/completions", post(chat::chat_completions))
        .route("/responses", post(responses::create_response))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_logging_middleware));

    let mut router = Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/health/ready", get(health::readiness_check))
        .nest("/v1/api", api)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.settings.request.max_request_size))
        .layer(middleware_stack);

    if state.settings.security.cors_enabled {
        router = router.layer(cors_layer(&state.settings.security.allowed_origins));
    }

    router.with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Fallback model named in the request header, if any
pub(crate) fn fallback_model_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FALLBACK_MODEL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Out-of-band serving metadata; never part of the body
pub(crate) fn apply_meta_headers(headers: &mut HeaderMap, meta: &ServeMeta) {
    headers.insert(
        "x-byok-fallback",
        HeaderValue::from_static(if meta.is_fallback() { "true" } else { "false" }),
    );
    if let Ok(value) = HeaderValue::from_str(&meta.served_model) {
        headers.insert("x-byok-served-model", value);
    }

    match meta.cache {
        Some((hit_type, similarity)) => {
            headers.insert("x-byok-cache", HeaderValue::from_static(hit_type.as_str()));
            if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", similarity)) {
                headers.insert("x-byok-cache-similarity", value);
            }
        }
        None => {
            headers.insert("x-byok-cache", HeaderValue::from_static("miss"));
        }
    }
}

/// Render a gateway stream as an SSE response
pub(crate) fn sse_response(handle: StreamHandle) -> Response {
    let events = handle.frames.map(|frame| {
        let event = Event::default().data(frame.data());
        Ok::<_, Infallible>(match frame.event_name() {
            Some(name) => event.event(name),
            None => event,
        })
    });

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
        .into_response();
    apply_meta_headers(response.headers_mut(), &handle.meta);
    response
}
