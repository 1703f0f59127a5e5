//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cache::{NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION};

/// Request body for adding an item (PUT /caches/:context/:key)
///
/// # Fields
/// - `value`: Any JSON value
/// - `absolute_expiration`: Optional RFC 3339 deadline
/// - `sliding_expiration_secs`: Optional renewal window in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct AddRequest {
    pub value: serde_json::Value,
    #[serde(default)]
    pub absolute_expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sliding_expiration_secs: Option<u64>,
}

impl AddRequest {
    pub fn absolute_expiration(&self) -> DateTime<Utc> {
        self.absolute_expiration.unwrap_or(NO_ABSOLUTE_EXPIRATION)
    }

    pub fn sliding_expiration(&self) -> Duration {
        self.sliding_expiration_secs
            .map(Duration::from_secs)
            .unwrap_or(NO_SLIDING_EXPIRATION)
    }
}

/// Request body for replacing a value (POST /caches/:context/:key)
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub value: serde_json::Value,
}
