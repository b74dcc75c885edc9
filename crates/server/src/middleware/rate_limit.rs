//! Fixed-window per-source rate limiting.
//!
//! One bucket per source address; the window resets 60 s after its first
//! request. Over-budget requests get `429` with `Retry-After` and
//! `X-RateLimit-*` headers. The health path is mounted outside this layer.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::warn;
use utils::response::ErrorResponse;

use crate::ServerState;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_secs: u64,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn check(&self, source: &str) -> Decision {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(source.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        let reset_secs = self
            .window
            .saturating_sub(now.duration_since(bucket.window_start))
            .as_secs()
            .max(1);

        if bucket.count >= self.limit {
            return Decision {
                allowed: false,
                remaining: 0,
                reset_secs,
            };
        }
        bucket.count += 1;
        Decision {
            allowed: true,
            remaining: self.limit - bucket.count,
            reset_secs,
        }
    }

    /// Drop buckets whose window has fully elapsed.
    pub fn sweep(&self) {
        let window = self.window;
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < window);
    }

    /// Periodic sweeper, once per window.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        let window = limiter.window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }
}

pub async fn enforce(
    State(state): State<ServerState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let source = super::client_addr(&req);
    let decision = state.rate_limiter.check(&source);
    let limit = state.rate_limiter.limit;

    if !decision.allowed {
        warn!(source = %source, path = %req.uri().path(), "Rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new("Rate limit exceeded")),
        )
            .into_response();
        let headers = response.headers_mut();
        headers.insert("retry-after", header_value(decision.reset_secs));
        headers.insert("x-ratelimit-limit", header_value(limit as u64));
        headers.insert("x-ratelimit-remaining", header_value(0));
        headers.insert("x-ratelimit-reset", header_value(decision.reset_secs));
        return response;
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", header_value(limit as u64));
    headers.insert("x-ratelimit-remaining", header_value(decision.remaining as u64));
    headers.insert("x-ratelimit-reset", header_value(decision.reset_secs));
    response
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("numeric header value")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_per_source() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        // A second source is unaffected.
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn window_expiry_resets_the_budget() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("a").allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::per_minute(3);
        assert_eq!(limiter.check("a").remaining, 2);
        assert_eq!(limiter.check("a").remaining, 1);
        assert_eq!(limiter.check("a").remaining, 0);
        assert!(!limiter.check("a").allowed);
    }

    #[test]
    fn sweep_drops_expired_buckets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(5));
        limiter.check("a");
        std::thread::sleep(Duration::from_millis(10));
        limiter.sweep();
        assert!(limiter.buckets.is_empty());
    }
}
