mod handlers;
mod language_config;
mod metrics;
mod routes;

use axum::Router;
use language_config::LanguageRegistry;
use metrics::Metrics;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use verdict_common::config::JudgeConfig;

#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
    pub languages: LanguageRegistry,
    pub metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Verdict API booting...");

    let config = JudgeConfig::from_env();

    let languages = LanguageRegistry::load_from_file(&config.languages_path).map_err(|e| {
        error!(path = %config.languages_path.display(), error = %e, "Failed to load languages");
        e
    })?;
    info!(languages = languages.languages().len(), "Loaded language registry");

    let metrics = Metrics::register()?;

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = ConnectionManager::new(client).await?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let state = Arc::new(AppState {
        redis: redis_conn,
        languages,
        metrics,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(config.api_listen_addr.as_str()).await?;
    info!(addr = %config.api_listen_addr, "HTTP server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
