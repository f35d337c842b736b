//! HTTP route definitions.

mod health;
mod outbox;
mod sync;

use crate::AppState;
use axum::Router;

/// Create all control API routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes())
        .merge(outbox::routes())
}
