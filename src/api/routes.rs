//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{get, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    add_handler, get_handler, health_handler, keys_handler, remove_handler, stats_handler,
    update_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /caches/:context/:key` - Add an item
/// - `GET /caches/:context/:key` - Read an item
/// - `POST /caches/:context/:key` - Replace an item's value
/// - `DELETE /caches/:context/:key` - Remove an item
/// - `GET /caches/:context` - List live keys
/// - `GET /stats/:context` - Engine statistics
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/caches/:context/:key",
            put(add_handler)
                .get(get_handler)
                .post(update_handler)
                .delete(remove_handler),
        )
        .route("/caches/:context", get(keys_handler))
        .route("/stats/:context", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
