//! Reverse-proxy header normalization.
//!
//! Resolves the address of the real client once per request and stores it as a
//! [`ClientIp`] extension. Everything downstream (access log, rate limiter,
//! audit logging) reads that value instead of parsing headers again.

use axum::{
    extract::{connect_info::ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::config::AppConfig;

/// Address of the client that originated the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientIp(pub IpAddr);

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Picks the client address from `X-Forwarded-For` or `X-Real-IP`.
///
/// Only the rightmost `X-Forwarded-For` entry is used: it is the one our own
/// proxy appended, everything left of it is whatever the client sent. Falls back to the transport address, and to loopback when even that is
/// unknown (e.g. a router driven directly in tests).
pub fn extract_ip_from_headers(headers: &HeaderMap, fallback: Option<IpAddr>) -> IpAddr {
    if let Some(h) = headers.get("x-forwarded-for").and_then(|hv| hv.to_str().ok()) {
        if let Some(last) = h.rsplit(',').next() {
            if let Ok(ip) = last.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip").and_then(|hv| hv.to_str().ok()) {
        if let Ok(ip) = h.trim().parse::<IpAddr>() {
            return ip;
        }
    }
    fallback.unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Resolves the client address for a request that has not passed the proxy stage.
pub fn resolve_client_ip(headers: &HeaderMap, remote: Option<IpAddr>, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        extract_ip_from_headers(headers, remote)
    } else {
        remote.unwrap_or(IpAddr::from([127, 0, 0, 1]))
    }
}

fn remote_ip<B>(req: &axum::http::Request<B>) -> Option<IpAddr> {
    req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip())
}

/// Outermost pipeline stage.
///
/// Forwarding headers are only honoured when `server.trust_proxy_headers` is
/// set; otherwise any client could choose its own rate-limit key.
pub async fn normalize_proxy_headers(
    State(cfg): State<Arc<AppConfig>>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = resolve_client_ip(req.headers(), remote_ip(&req), cfg.server.trust_proxy_headers);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = parts.extensions.get::<ClientIp>() {
            return Ok(*ip);
        }
        let remote = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
        Ok(ClientIp(remote.unwrap_or(IpAddr::from([127, 0, 0, 1]))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_last_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_ip_from_headers(&headers, None), IpAddr::from([203, 0, 113, 7]));
    }

    #[test]
    fn test_spoofed_forwarded_prefix_does_not_change_the_key() {
        let mut first = HeaderMap::new();
        first.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1, 203.0.113.7"));
        let mut second = HeaderMap::new();
        second.insert("x-forwarded-for", HeaderValue::from_static("2.2.2.2, 203.0.113.7"));
        assert_eq!(
            resolve_client_ip(&first, None, true),
            resolve_client_ip(&second, None, true)
        );
    }

    #[test]
    fn test_real_ip_and_fallback() {
        let mut headers = HeaderMap::new();
        let remote = Some(IpAddr::from([192, 0, 2, 1]));
        assert_eq!(extract_ip_from_headers(&headers, remote), IpAddr::from([192, 0, 2, 1]));

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_ip_from_headers(&headers, remote), IpAddr::from([198, 51, 100, 2]));
    }

    #[test]
    fn test_untrusted_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let remote = Some(IpAddr::from([192, 0, 2, 1]));
        assert_eq!(resolve_client_ip(&headers, remote, false), IpAddr::from([192, 0, 2, 1]));
        assert_eq!(resolve_client_ip(&headers, remote, true), IpAddr::from([203, 0, 113, 7]));
    }
}
