pub mod auth;
pub mod rate_limit;

use axum::{extract::ConnectInfo, http::Request};

/// Client address for auth logging and rate limiting: the first entry of
/// `X-Forwarded-For` when present, else the peer address.
pub fn client_addr<B>(req: &Request<B>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};

    use super::*;

    #[test]
    fn forwarded_header_takes_first_entry() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_addr(&req), "203.0.113.9");
    }

    #[test]
    fn missing_peer_info_is_unknown() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_addr(&req), "unknown");
    }
}
