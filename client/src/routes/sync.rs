//! Sync control routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stockpile_engine::{Activity, ActivityId, ConsolidatedRecord, RetryPlan, RunState};

use crate::db::{SyncStateEntry, SyncStateRepository};
use crate::error::{AppError, Result};
use crate::AppState;

/// Body of `POST /sync/start`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub org_id: Option<String>,
    pub enabled_keys: Vec<String>,
    pub default_org_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub run: u32,
    pub run_state: RunState,
    pub activity_ids: Vec<ActivityId>,
}

/// Body of `POST /sync/retry`. Without ids every failed endpoint is retried.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    #[serde(default)]
    pub activity_ids: Option<Vec<ActivityId>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub run_state: RunState,
    pub endpoints: Vec<SyncStateEntry>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/start", post(start_handler))
        .route("/sync/retry", post(retry_handler))
        .route("/sync/cancel", post(cancel_handler))
        .route("/sync/activities", get(activities_handler))
        .route("/sync/activities/{id}", get(activity_handler))
        .route("/sync/consolidated", get(consolidated_handler))
        .route("/sync/state", get(state_handler))
        .route("/sync/clear-errors", post(clear_errors_handler))
}

/// POST /sync/start - Start a run in the background.
async fn start_handler(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>)> {
    let prepared = state.orchestrator.prepare_run(
        request.org_id,
        &request.enabled_keys,
        request.default_org_id,
    )?;

    let response = StartResponse {
        run: prepared.run(),
        run_state: state.orchestrator.run_state(),
        activity_ids: prepared.activity_ids().cloned().collect(),
    };

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.execute_run(prepared).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /sync/retry - Retry failed endpoints in the background.
async fn retry_handler(
    State(state): State<AppState>,
    Json(request): Json<RetryRequest>,
) -> Result<(StatusCode, Json<RetryPlan>)> {
    let prepared = state.orchestrator.prepare_retry(request.activity_ids)?;
    let plan = prepared.plan().clone();

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.execute_retry(prepared).await;
    });

    Ok((StatusCode::ACCEPTED, Json(plan)))
}

/// POST /sync/cancel - Cancel whatever is in flight.
async fn cancel_handler(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.cancel();
    StatusCode::NO_CONTENT
}

/// GET /sync/activities - Every activity in creation order.
async fn activities_handler(State(state): State<AppState>) -> Json<Vec<Activity>> {
    Json(state.orchestrator.activities())
}

/// GET /sync/activities/{id} - One activity.
async fn activity_handler(
    State(state): State<AppState>,
    Path(id): Path<ActivityId>,
) -> Result<Json<Activity>> {
    state
        .orchestrator
        .activity(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("activity '{}'", id)))
}

/// GET /sync/consolidated - One record per endpoint.
async fn consolidated_handler(State(state): State<AppState>) -> Json<Vec<ConsolidatedRecord>> {
    Json(state.orchestrator.consolidated())
}

/// GET /sync/state - Run state and per-endpoint sync bookkeeping.
async fn state_handler(State(state): State<AppState>) -> Result<Json<StateResponse>> {
    let endpoints = SyncStateRepository::new(state.store.clone()).all().await?;
    Ok(Json(StateResponse {
        run_state: state.orchestrator.run_state(),
        endpoints,
    }))
}

/// POST /sync/clear-errors - Drop failed activities.
async fn clear_errors_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let cleared = state.orchestrator.clear_errors()?;
    Ok(Json(ClearResponse { cleared }))
}
