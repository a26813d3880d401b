//! Process-wide atomic counters (§4.G) plus the `/healthz` and `/readyz`
//! axum handlers that expose liveness/readiness to an orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::state::AppState;

#[derive(Default)]
pub struct Metrics {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub messages_routed: AtomicU64,
    pub malformed_frames_rejected: AtomicU64,
    pub slow_consumer_drops: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "connections_accepted": self.connections_accepted.load(Ordering::Relaxed),
            "connections_active": self.connections_active.load(Ordering::Relaxed),
            "messages_routed": self.messages_routed.load(Ordering::Relaxed),
            "malformed_frames_rejected": self.malformed_frames_rejected.load(Ordering::Relaxed),
            "slow_consumer_drops": self.slow_consumer_drops.load(Ordering::Relaxed),
        })
    }
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(state.metrics.snapshot())),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": err.to_string() })),
        ),
    }
}
