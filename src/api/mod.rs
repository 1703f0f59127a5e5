//! API Module
//!
//! HTTP handlers and routing exposing the cache registry over REST.
//!
//! # Endpoints
//! - `PUT /caches/:context/:key` - Add an item
//! - `GET /caches/:context/:key` - Read an item
//! - `POST /caches/:context/:key` - Replace an item's value
//! - `DELETE /caches/:context/:key` - Remove an item
//! - `GET /caches/:context` - List live keys
//! - `GET /stats/:context` - Engine statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
