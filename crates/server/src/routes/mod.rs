use axum::{Router, http::HeaderValue, middleware::from_fn_with_state, routing::get};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::{ServerState, mcp::ContextServer, middleware, sessions};

pub mod health;

/// Compose the HTTP surface: an unauthenticated `/health` plus the MCP
/// streamable-HTTP endpoint behind session tracking, auth, and rate
/// limiting. Each MCP session gets its own `ContextServer` instance from
/// the service factory; they all share the state inside `AppContext`.
pub fn router(state: ServerState) -> Router {
    let ctx = state.app.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(ContextServer::new(ctx.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = cors_layer(state.allowed_origin.as_deref());

    let mcp_routes = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(from_fn_with_state(state.clone(), sessions::track_sessions))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::enforce,
        ))
        .layer(cors);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(mcp_routes)
        .with_state(state)
}

/// Permissive CORS by default, restricted to one origin when configured.
/// Preflight `OPTIONS` requests are answered by this layer.
fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::header::HeaderName::from_static("mcp-session-id")]);

    match allowed_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => base.allow_origin(value),
            Err(_) => {
                warn!(origin, "Invalid MCP_ALLOWED_ORIGIN; allowing any origin");
                base.allow_origin(Any)
            }
        },
        None => base.allow_origin(Any),
    }
}
