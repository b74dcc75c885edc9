use axum::{Json, extract::State, response::Json as ResponseJson};
use serde::Serialize;

use crate::ServerState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub transport: &'static str,
    /// Seconds since the server started.
    pub uptime: u64,
    pub active_sessions: usize,
}

/// Liveness endpoint. Never authenticated and never rate limited.
pub async fn health_check(State(state): State<ServerState>) -> ResponseJson<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        transport: state.transport_label,
        uptime: state.started_at.elapsed().as_secs(),
        active_sessions: state.sessions.active(),
    })
}
