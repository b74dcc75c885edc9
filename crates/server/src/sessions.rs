//! Active-session gauge for the health endpoint.
//!
//! Session negotiation itself (ID issuance, transport reuse, DELETE-close)
//! is delegated to the protocol library's session manager. This layer only
//! observes the `Mcp-Session-Id` header traffic so `/health` can report how
//! many sessions are live.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tracing::debug;

use crate::ServerState;

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Default)]
pub struct SessionGauge {
    sessions: DashMap<String, Instant>,
}

impl SessionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    fn observe_open(&self, id: &str) {
        if self
            .sessions
            .insert(id.to_string(), Instant::now())
            .is_none()
        {
            debug!(session = %id, "Session opened");
        }
    }

    fn observe_close(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            debug!(session = %id, "Session closed");
        }
    }
}

fn session_id<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn track_sessions(
    State(state): State<ServerState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let request_session = session_id(&req);

    let response = next.run(req).await;

    if method == Method::DELETE {
        if let Some(id) = &request_session
            && response.status().is_success()
        {
            state.sessions.observe_close(id);
        }
        return response;
    }

    // A session header on the response marks the session as live, whether
    // it was just created (initialize) or merely reused.
    if let Some(id) = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        state.sessions.observe_open(id);
    } else if let Some(id) = &request_session
        && response.status().is_success()
    {
        state.sessions.observe_open(id);
    }

    response
}
