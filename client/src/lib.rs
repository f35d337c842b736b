//! Stockpile Client - warehouse data sync into a local SQLite store.
//!
//! Pulls the warehouse endpoints in dependency phases, materializes one local
//! table per endpoint and exposes run control over a local HTTP API.

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod routes;

use crate::db::LocalStore;
use crate::orchestrator::SyncOrchestrator;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub store: LocalStore,
}

/// Build the control API router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
