//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheStats, EngineKind};

/// Response body for reading an item (GET /caches/:context/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub context: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl GetResponse {
    pub fn new(context: impl Into<String>, key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            context: context.into(),
            key: key.into(),
            value,
        }
    }
}

/// Response body for add, update and remove
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    /// Success message
    pub message: String,
    /// The affected key
    pub key: String,
}

impl MessageResponse {
    pub fn new(key: impl Into<String>, action: &str) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' {} successfully", key, action),
            key,
        }
    }
}

/// Response body for listing keys (GET /caches/:context)
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub context: String,
    pub keys: Vec<String>,
}

/// Response body for the stats endpoint (GET /stats/:context)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub context: String,
    /// Engine serving the context
    pub engine: EngineKind,
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(context: impl Into<String>, engine: EngineKind, stats: CacheStats) -> Self {
        Self {
            context: context.into(),
            engine,
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Configured cache contexts
    pub contexts: Vec<String>,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(contexts: Vec<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            contexts,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
