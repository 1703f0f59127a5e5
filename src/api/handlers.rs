//! API Handlers
//!
//! HTTP request handlers mapping each route onto the cache registry.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{CacheError, Result};
use crate::models::{
    AddRequest, GetResponse, HealthResponse, KeysResponse, MessageResponse, StatsResponse,
    UpdateRequest,
};
use crate::registry::CacheRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CacheRegistry>,
}

impl AppState {
    pub fn new(registry: CacheRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Runs a registry call on the blocking pool; persistent engines block
    /// on their store.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&CacheRegistry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        match tokio::task::spawn_blocking(move || f(&registry)).await {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Handler for PUT /caches/:context/:key
///
/// Adds a new item; an existing live key is a conflict.
pub async fn add_handler(
    State(state): State<AppState>,
    Path((context, key)): Path<(String, String)>,
    Json(req): Json<AddRequest>,
) -> Result<Json<MessageResponse>> {
    let absolute = req.absolute_expiration();
    let sliding = req.sliding_expiration();
    let item_key = key.clone();

    state
        .call(move |registry| {
            registry.add_with_expiration(&context, &item_key, req.value, absolute, sliding)
        })
        .await?;

    Ok(Json(MessageResponse::new(key, "added")))
}

/// Handler for GET /caches/:context/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path((context, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    let (ctx, item_key) = (context.clone(), key.clone());
    let value = state
        .call(move |registry| registry.get_value(&ctx, &item_key))
        .await?
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(context, key, value)))
}

/// Handler for POST /caches/:context/:key
///
/// Replaces the value of an existing item, keeping its expiration.
pub async fn update_handler(
    State(state): State<AppState>,
    Path((context, key)): Path<(String, String)>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<MessageResponse>> {
    let item_key = key.clone();
    state
        .call(move |registry| registry.update_value(&context, &item_key, req.value))
        .await?;

    Ok(Json(MessageResponse::new(key, "updated")))
}

/// Handler for DELETE /caches/:context/:key
///
/// Removing a missing key still succeeds.
pub async fn remove_handler(
    State(state): State<AppState>,
    Path((context, key)): Path<(String, String)>,
) -> Result<Json<MessageResponse>> {
    let item_key = key.clone();
    state
        .call(move |registry| registry.remove(&context, &item_key))
        .await?;

    Ok(Json(MessageResponse::new(key, "removed")))
}

/// Handler for GET /caches/:context
pub async fn keys_handler(
    State(state): State<AppState>,
    Path(context): Path<String>,
) -> Result<Json<KeysResponse>> {
    let ctx = context.clone();
    let keys = state
        .call(move |registry| Ok(registry.enumerate(&ctx)?.collect::<Vec<_>>()))
        .await?;

    Ok(Json(KeysResponse { context, keys }))
}

/// Handler for GET /stats/:context
pub async fn stats_handler(
    State(state): State<AppState>,
    Path(context): Path<String>,
) -> Result<Json<StatsResponse>> {
    let ctx = context.clone();
    let (kind, stats) = state
        .call(move |registry| {
            let engine = registry.engine(&ctx)?;
            Ok((engine.kind(), engine.stats()))
        })
        .await?;

    Ok(Json(StatsResponse::new(context, kind, stats)))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let contexts = state
        .registry
        .contexts()
        .into_iter()
        .map(String::from)
        .collect();
    Json(HealthResponse::healthy(contexts))
}
