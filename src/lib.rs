//! Tiercache - pluggable caching engines behind one registry
//!
//! Provides in-memory, SQLite-backed, hot/cold tiered and peer-replicated
//! caches, each serving a named context.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod replication;
pub mod tasks;

pub use api::AppState;
pub use config::{CachingConfig, ServerConfig};
pub use error::{CacheError, Result};
pub use registry::CacheRegistry;
