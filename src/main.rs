//! BYOK gateway server
//!
//! OpenAI-compatible HTTP gateway forwarding to users' own provider keys

use anyhow::{Context, Result};
use byokproxy::config::{settings::LoggingConfig, AppConfig, Settings};
use byokproxy::create_router;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Environment settings first: they carry the log level and format
    let settings = Settings::new().context("Failed to load server settings")?;
    init_logging(&settings.logging)?;
    info!("{}", byokproxy::version_info());

    // Provider, token and credential configuration from JSON file (required)
    let app_config = AppConfig::load_default().context("Failed to load provider configuration")?;
    info!(providers = app_config.providers.len(), "Provider configuration loaded");

    // The file's server section overrides the environment
    let addr = match &app_config.server {
        Some(server) => format!("{}:{}", server.host, server.port),
        None => format!("{}:{}", settings.server.host, settings.server.port),
    };

    let app = create_router(settings, &app_config)?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("BYOK gateway started on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Chat endpoint: http://{}/v1/api/chat/completions", addr);
    info!("Responses endpoint: http://{}/v1/api/responses", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    Ok(())
}

/// Initialize logging system
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if logging.format == "json" {
        // JSON format logs (production environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(logging.level.as_str())
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        )
    } else {
        // Human readable format (development environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(logging.level.as_str())
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;
    Ok(())
}
