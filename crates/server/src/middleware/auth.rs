//! Bearer-token authentication for the HTTP transport.
//!
//! The health path never passes through this layer (it is mounted outside
//! it), so everything arriving here requires a valid token. Failures are
//! audited with source address and path, never with credential contents.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utils::response::ErrorResponse;

use crate::ServerState;

const REALM: &str = "mcp";

pub async fn require_bearer(
    State(state): State<ServerState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let source = super::client_addr(&req);
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let Some(expected) = state.auth_token.as_deref() else {
        // HTTP transport refuses to start without a token; reaching this
        // point without one is a wiring bug, so fail closed.
        return unauthorized(&source, &path, "auth token not configured");
    };

    match bearer_token(&req) {
        Some(presented) if token_matches(&presented, expected) => {
            let response = next.run(req).await;
            info!(
                source = %source,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                "request"
            );
            response
        }
        Some(_) => unauthorized(&source, &path, "invalid bearer token"),
        None => unauthorized(&source, &path, "missing or malformed Authorization header"),
    }
}

fn bearer_token<B>(req: &Request<B>) -> Option<String> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let token = header.strip_prefix("Bearer ")?;
    (!token.is_empty()).then(|| token.to_string())
}

/// Comparison that does not leak the match prefix length through timing.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn unauthorized(source: &str, path: &str, reason: &str) -> Response {
    warn!(source = %source, path = %path, "Authentication failed: {reason}");
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Bearer realm=\"{REALM}\""),
        )],
        Json(ErrorResponse::new("Unauthorized")),
    )
        .into_response()
}
