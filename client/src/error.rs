//! Unified error handling for the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use stockpile_engine::Outcome;

/// Errors raised while syncing an endpoint or driving a run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(stockpile_engine::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(stockpile_engine::Error),

    #[error("Write failure on table '{table}': {message}")]
    WriteFailure { table: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cancelled")]
    Cancelled,

    #[error("A sync run is already in progress")]
    SyncInProgress,

    #[error("No retryable endpoints")]
    NoRetryableEndpoints,
}

impl From<stockpile_engine::Error> for SyncError {
    fn from(err: stockpile_engine::Error) -> Self {
        if err.is_configuration() {
            SyncError::Configuration(err)
        } else {
            SyncError::InvalidResponse(err)
        }
    }
}

impl SyncError {
    /// Whether the shared store handle itself is unusable.
    pub fn is_store_failure(&self) -> bool {
        match self {
            SyncError::Database(e) => matches!(
                e,
                sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// The activity outcome this error produces.
    ///
    /// Configuration errors block the endpoint since retrying cannot fix
    /// them. Everything else leaves it in ERROR, open to a bounded retry.
    pub fn outcome(&self) -> Outcome {
        match self {
            SyncError::Cancelled => Outcome::Cancelled,
            SyncError::Configuration(_) => Outcome::blocked(self.to_string()),
            _ => Outcome::error(self.to_string()),
        }
    }
}

/// Control API error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::Sync(e @ (SyncError::SyncInProgress | SyncError::NoRetryableEndpoints)) => {
                (StatusCode::CONFLICT, e.to_string(), None)
            }
            AppError::Sync(e) => {
                tracing::warn!("Sync error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Sync error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
