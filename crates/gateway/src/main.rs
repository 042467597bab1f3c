use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use va_domain::config::{load_secrets, Config, ConfigSeverity};
use va_gateway::state::AppState;
use va_gateway::ws::session_ws;
use va_llm::OpenAiCompatClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env();
    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,va_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("voice-agent gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Secrets ──────────────────────────────────────────────────────
    let secrets = load_secrets(config.secrets_file.as_deref()).context("loading secrets file")?;
    tracing::info!(customers = secrets.len(), "secrets loaded");

    // ── LLM client ───────────────────────────────────────────────────
    let llm = Arc::new(OpenAiCompatClient::new(config.llm.base_url.clone()));
    tracing::info!(base_url = %config.llm.base_url, model = %config.llm.model, "llm client ready");

    let listen_host = config.gateway.listen_host.clone();
    let listen_port = config.gateway.listen_port;
    let client_asset_dir = config.gateway.client_asset_dir.clone();

    let state = AppState::new(config, secrets, llm);

    // ── Router ───────────────────────────────────────────────────────
    let mut app = Router::new().route("/session", get(session_ws));

    if let Some(dir) = client_asset_dir.as_deref() {
        if std::path::Path::new(dir).exists() {
            app = app.nest_service("/", ServeDir::new(dir));
            tracing::info!(dir, "serving client assets");
        } else {
            tracing::warn!(dir, "client asset dir configured but not found — not serving static assets");
        }
    }

    let app = app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{listen_host}:{listen_port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "voice-agent gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}
