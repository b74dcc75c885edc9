pub mod config;
pub mod mcp;
pub mod middleware;
pub mod routes;
pub mod sessions;

use std::{sync::Arc, time::Instant};

use services::services::context::AppContext;

use crate::{middleware::rate_limit::RateLimiter, sessions::SessionGauge};

/// Shared state for the HTTP transport: the application context plus the
/// transport-level services (auth secret, limiter, session gauge).
#[derive(Clone)]
pub struct ServerState {
    pub app: AppContext,
    pub auth_token: Option<String>,
    pub allowed_origin: Option<String>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionGauge>,
    pub started_at: Instant,
    pub transport_label: &'static str,
}
