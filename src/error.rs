//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its HTTP front end.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired on indexed access
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Operation cannot be applied to the stored entry (incr/decr)
    #[error("{0}")]
    InvalidOperation(String),

    /// Value could not be encoded or decoded by the codec
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection could not be opened, tuned, or locked in time
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Statement failed inside the storage engine
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Builds a connection error without an engine source.
    pub fn connection(message: impl Into<String>) -> Self {
        CacheError::Connection {
            message: message.into(),
            source: None,
        }
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        let lock_or_open = matches!(
            err.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen)
        );

        if lock_or_open {
            CacheError::Connection {
                message: err.to_string(),
                source: Some(err),
            }
        } else {
            CacheError::Storage {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidOperation(_) => StatusCode::CONFLICT,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Storage { .. } | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
