//! Websocket subscriber endpoint.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use tracing::{debug, warn};

use crate::app::services::RelayServices;
use crate::audience;
use crate::ws::WsConnection;

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET {ws_path}
///
/// Upgrades to a websocket and relays every notification for the resolved
/// audiences until either side closes. Audiences are resolved once, here,
/// from the request that opened the socket.
pub async fn subscribe(
    ws: WebSocketUpgrade,
    Extension(services): Extension<Arc<RelayServices>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let audiences = audience::resolve(services.audience_source(), &headers, &params);
    let channels = services.channels().to_vec();
    let relay = services.relay().clone();

    ws.on_upgrade(move |socket| async move {
        debug!(channels = ?channels, audiences = ?audiences, "websocket subscriber connected");
        match relay.serve(WsConnection::new(socket), &channels, &audiences).await {
            Ok(summary) => debug!(
                subscriber_id = %summary.id,
                reason = %summary.reason,
                delivered = summary.delivered,
                "websocket subscriber disconnected"
            ),
            Err(err) => warn!(error = %err, "websocket subscriber rejected"),
        }
    })
}
