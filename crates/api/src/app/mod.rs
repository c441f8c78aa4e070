//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: upstream, channel manager and listen loop wiring
//! - `routes/`: websocket endpoint and operational routes
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod errors;
pub mod routes;
pub mod services;

use services::RelayServices;

/// Build the full HTTP router.
///
/// The websocket endpoint is mounted at `ws_path`.
pub fn build_app(services: Arc<RelayServices>, ws_path: &str) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/stats", get(routes::system::stats))
        .route(ws_path, get(routes::websocket::subscribe))
        .fallback(routes::system::not_found)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
