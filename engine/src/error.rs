//! Error types for the Stockpile engine.

use crate::{ApiKey, Phase};
use thiserror::Error;

/// All possible errors from the Stockpile engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Metadata errors
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    // Response shape errors
    #[error("no array field found in data document")]
    NoArrayFound,

    #[error("malformed header: cell {index} is null")]
    MalformedHeader { index: usize },

    #[error("column count mismatch in row {row}: expected {expected}, got {got}")]
    ColumnCountMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("invalid response shape: {0}")]
    InvalidResponseShape(String),

    // Configuration errors
    #[error("unknown endpoint key: {0}")]
    UnknownEndpoint(ApiKey),

    #[error("endpoint '{key}' requires {identifier}")]
    MissingIdentifier {
        key: ApiKey,
        identifier: &'static str,
    },

    #[error("duplicate endpoint key in {phase} catalog: {key}")]
    DuplicateEndpoint { key: ApiKey, phase: Phase },
}

impl Error {
    /// Whether this error stems from configuration rather than the server.
    ///
    /// Configuration errors are never retried automatically.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownEndpoint(_)
                | Error::MissingIdentifier { .. }
                | Error::DuplicateEndpoint { .. }
        )
    }

    /// Whether this error describes a malformed server payload.
    pub fn is_response_shape(&self) -> bool {
        matches!(
            self,
            Error::InvalidMetadata(_)
                | Error::NoArrayFound
                | Error::MalformedHeader { .. }
                | Error::ColumnCountMismatch { .. }
                | Error::InvalidResponseShape(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
