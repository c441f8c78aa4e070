use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::app::errors::json_error;
use crate::app::services::RelayServices;

/// GET /health
///
/// 200 while the listen loop is consuming the upstream, 503 once it stopped.
pub async fn health(Extension(services): Extension<Arc<RelayServices>>) -> axum::response::Response {
    if !services.is_listening() {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "upstream_unavailable",
            "listen loop is not running",
        );
    }

    Json(json!({
        "status": "ok",
        "started_at": services.started_at(),
        "listen": services.listen_stats(),
    }))
    .into_response()
}

/// GET /stats
pub async fn stats(Extension(services): Extension<Arc<RelayServices>>) -> impl IntoResponse {
    Json(json!({
        "channels": services.relay().manager().stats().await,
        "listen": services.listen_stats(),
    }))
}

pub async fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "no such route")
}
