//! Security headers for every handler response.
//!
//! Applied as the innermost global stage, so redirects issued by route guards
//! carry the same headers as regular pages.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config::AppConfig;

const DEFAULT_HSTS_MAX_AGE: u64 = 31_536_000;

/// Adds the standard security headers.
///
/// - `X-Content-Type-Options: nosniff`
/// - `X-Frame-Options: SAMEORIGIN`
/// - `Referrer-Policy: same-origin`
/// - `Permissions-Policy`, `Cross-Origin-Opener-Policy`, `Cross-Origin-Resource-Policy`
/// - `Strict-Transport-Security` when TLS is terminated here or HSTS is enabled
/// - `Content-Security-Policy` from configuration
///
/// Authenticated pages and JSON bodies are never cached.
pub async fn security_headers_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;
    apply_security_headers(&cfg, res.headers_mut());
    res
}

pub fn apply_security_headers(cfg: &AppConfig, headers: &mut HeaderMap) {
    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(HeaderName::from_static("referrer-policy"), HeaderValue::from_static("same-origin"));
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    if cfg.hsts_enabled() {
        let sec = cfg.security.as_ref();
        let max_age = sec.and_then(|s| s.hsts_max_age).unwrap_or(DEFAULT_HSTS_MAX_AGE);
        let include_sub = if sec.and_then(|s| s.hsts_include_subdomains).unwrap_or(false) {
            "; includeSubDomains"
        } else {
            ""
        };
        let value = format!("max-age={}{}", max_age, include_sub);
        headers.insert(
            HeaderName::from_static("strict-transport-security"),
            HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("max-age=31536000")),
        );
    }

    if let Some(csp) = cfg.security.as_ref().and_then(|s| s.csp.as_deref()) {
        if !csp.trim().is_empty() {
            if let Ok(val) = HeaderValue::from_str(csp) {
                headers.insert(HeaderName::from_static("content-security-policy"), val);
            }
        }
    }

    let is_dynamic = headers
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|s| s.starts_with("application/json") || s.starts_with("text/html"))
        .unwrap_or(false);
    if is_dynamic {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }
}
