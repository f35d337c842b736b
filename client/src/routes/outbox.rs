//! Outbox routes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Deserialize;

use crate::db::{OutboundTransaction, Outbox};
use crate::error::{AppError, Result};
use crate::AppState;

/// Body of `POST /outbox`.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Create outbox routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/outbox", get(list_handler).post(enqueue_handler))
}

/// GET /outbox - Every outbound transaction, oldest first.
async fn list_handler(State(state): State<AppState>) -> Result<Json<Vec<OutboundTransaction>>> {
    let items = Outbox::new(state.store.clone()).list().await?;
    Ok(Json(items))
}

/// POST /outbox - Queue an outbound transaction.
async fn enqueue_handler(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<OutboundTransaction>)> {
    let kind = request.kind.trim();
    if kind.is_empty() {
        return Err(AppError::BadRequest("kind must not be empty".to_string()));
    }

    let item = Outbox::new(state.store.clone())
        .enqueue(kind, &request.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}
