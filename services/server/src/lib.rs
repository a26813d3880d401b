pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod router;
pub mod state;
pub mod storage;
pub mod supervisor;

pub use state::AppState;

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// The whole HTTP/WS surface: the session router's WebSocket endpoint plus
/// the liveness/readiness probes from §4.G. There is no REST API — every
/// domain operation goes through the framed protocol in §4.A.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(metrics::healthz))
        .route("/readyz", get(metrics::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| router::handle_socket(socket, remote_addr, state))
}
