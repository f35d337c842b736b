//! Stockpile Client - local control API over the sync orchestrator.

use std::sync::Arc;
use stockpile_client::config::Config;
use stockpile_client::db::LocalStore;
use stockpile_client::fetch::HttpFetcher;
use stockpile_client::orchestrator::SyncOrchestrator;
use stockpile_client::AppState;
use stockpile_engine::ApiCatalog;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpile_client=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Stockpile Client on {}:{}", config.host, config.port);

    // Open the local store (runs migrations)
    let store = LocalStore::open(&config.database_url).await?;
    tracing::info!(database = %config.database_url, "Local store ready");

    let fetcher = HttpFetcher::new(
        &config.api_base_url,
        config.auth_token.clone(),
        config.sync.fetch_timeout,
    )?;
    let orchestrator = SyncOrchestrator::new(
        Arc::new(ApiCatalog::with_defaults()),
        store.clone(),
        Arc::new(fetcher),
        config.sync.clone(),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        store: store.clone(),
    };
    let app = stockpile_client::app(state.clone());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.orchestrator.cancel();
    store.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
