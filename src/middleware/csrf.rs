//! Cross-Site Request Forgery (CSRF) protection.
//!
//! Tokens are bound to the session: `hex(HMAC-SHA256(key, session_id))`. The key
//! survives restarts (configured, or generated once and kept in the settings
//! table), so tokens on pages rendered before a restart stay valid.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::SqliteStore;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";
/// Settings-table entry holding the generated key (hex).
pub const CSRF_KEY_SETTING: &str = "csrf_key";
const GENERATED_KEY_BYTES: usize = 32;

/// Path prefixes that never require a token. API clients authenticate with a key
/// instead of an ambient cookie.
const EXEMPT_PREFIXES: &[&str] = &["/api/"];

/// The keyed MAC used to derive and check tokens.
#[derive(Clone)]
pub struct CsrfKey {
    mac: Arc<HmacSha256>,
}

impl fmt::Debug for CsrfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CsrfKey(..)")
    }
}

impl CsrfKey {
    pub fn new(key: &[u8]) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(key).map_err(|e| anyhow::anyhow!("invalid csrf key: {}", e))?;
        Ok(Self { mac: Arc::new(mac) })
    }

    /// Token for the given session id.
    pub fn token_for(&self, session_id: &str) -> String {
        let mut mac = (*self.mac).clone();
        mac.update(session_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a submitted token.
    pub fn verify(&self, session_id: &str, token: &str) -> bool {
        let Ok(submitted) = hex::decode(token.trim()) else {
            return false;
        };
        let mut mac = (*self.mac).clone();
        mac.update(session_id.as_bytes());
        mac.verify_slice(&submitted).is_ok()
    }

    /// Configured key, else the persisted one, else a freshly generated key that is
    /// persisted for the next start.
    pub async fn load_or_create(store: &SqliteStore, configured: Option<&str>) -> anyhow::Result<Self> {
        if let Some(key) = configured {
            tracing::info!("Using configured CSRF key");
            return Self::new(key.as_bytes());
        }

        if let Some(stored) = store.get_setting(CSRF_KEY_SETTING).await? {
            let bytes = hex::decode(stored.trim())
                .map_err(|e| anyhow::anyhow!("stored csrf key is not valid hex: {}", e))?;
            return Self::new(&bytes);
        }

        let mut buf = [0u8; GENERATED_KEY_BYTES];
        OsRng.fill_bytes(&mut buf);
        // Another instance may have raced us; whatever landed first wins.
        let stored = store.insert_setting_if_absent(CSRF_KEY_SETTING, &hex::encode(buf)).await?;
        let bytes = hex::decode(stored.trim())
            .map_err(|e| anyhow::anyhow!("stored csrf key is not valid hex: {}", e))?;
        tracing::info!("Generated new CSRF key");
        Self::new(&bytes)
    }
}

pub fn requires_token(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn is_form(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

fn form_token(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(name, _)| name == CSRF_FORM_FIELD)
        .map(|(_, value)| value.into_owned())
}

/// Rejects state-changing requests that do not carry a valid token.
///
/// Runs before the context stage, so a rejected request causes no session or
/// store work at all.
pub async fn protect(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !requires_token(req.method()) || is_exempt(req.uri().path()) {
        return next.run(req).await;
    }

    let session_id = CookieJar::from_headers(req.headers())
        .get(&state.config.session.cookie_name)
        .map(|c| c.value().to_owned());
    let header_token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (req, token) = match header_token {
        Some(token) => (req, Some(token)),
        None if is_form(&req) => {
            let (parts, body) = req.into_parts();
            let bytes = match to_bytes(body, state.config.server.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(_) => return AppError::BadRequest("Request body too large".to_string()).into_response(),
            };
            let token = form_token(&bytes);
            (Request::from_parts(parts, Body::from(bytes)), token)
        }
        None => (req, None),
    };

    match (session_id, token) {
        (Some(sid), Some(token)) if state.csrf.verify(&sid, &token) => next.run(req).await,
        (sid, token) => {
            state.metrics.inc_csrf_rejected();
            tracing::warn!(
                method = %req.method(),
                path = %req.uri().path(),
                has_session = sid.is_some(),
                has_token = token.is_some(),
                "CSRF validation failed"
            );
            AppError::CsrfMismatch.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_bound_to_session() {
        let key = CsrfKey::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let token = key.token_for("session-a");
        assert_eq!(token.len(), 64);
        assert!(key.verify("session-a", &token));
        assert!(!key.verify("session-b", &token));
        assert!(!key.verify("session-a", "not-hex"));
        assert!(!key.verify("session-a", ""));
    }

    #[test]
    fn test_different_keys_disagree() {
        let a = CsrfKey::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let b = CsrfKey::new(b"fedcba9876543210fedcba9876543210").unwrap();
        assert!(!b.verify("s", &a.token_for("s")));
    }

    #[test]
    fn test_methods_and_exemptions() {
        assert!(requires_token(&Method::POST));
        assert!(requires_token(&Method::DELETE));
        assert!(!requires_token(&Method::GET));
        assert!(!requires_token(&Method::HEAD));
        assert!(is_exempt("/api/login"));
        assert!(!is_exempt("/login"));
        assert!(!is_exempt("/apis"));
    }

    #[test]
    fn test_form_token_extraction() {
        assert_eq!(form_token(b"username=a&csrf_token=abc%2B1&x=y").as_deref(), Some("abc+1"));
        assert_eq!(form_token(b"username=a"), None);
    }
}
