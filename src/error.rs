//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for every cache engine and the registry.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Add was called for a key that already exists in the engine
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Update was called for a key that does not exist in the engine
    #[error("Key not found: {0}")]
    NotFound(String),

    /// No engine is configured for the requested context
    #[error("Unknown cache context: {0}")]
    UnknownContext(String),

    /// A required configuration field is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The persistent store failed
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The available-memory probe could not be read
    #[error("Memory probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// A value or item could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Peer transport I/O failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::DuplicateKey(_) => StatusCode::CONFLICT,
            CacheError::NotFound(_) | CacheError::UnknownContext(_) => StatusCode::NOT_FOUND,
            CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
            CacheError::ProbeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Configuration(_) | CacheError::Store(_) | CacheError::Transport(_) => {
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
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;
