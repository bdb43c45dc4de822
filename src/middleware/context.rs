//! Session and identity context for each request.
//!
//! [`inject`] resolves the session cookie, reloads the user and hands both to the
//! rest of the request as a [`Context`]. When the response comes back, a
//! modified session is written and the cookie is (re)issued.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::SET_COOKIE, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::middleware::csrf::CsrfKey;
use crate::session::Session;
use crate::state::AppState;
use crate::types::{Flash, User};

/// Request-scoped view of the session and the authenticated user.
///
/// The session is shared between this stage and the handler of the same request
/// only; it is never cached across requests.
#[derive(Clone)]
pub struct Context {
    session: Arc<Mutex<Session>>,
    user: Option<User>,
    csrf: CsrfKey,
}

impl Context {
    pub fn new(session: Session, user: Option<User>, csrf: CsrfKey) -> Self {
        Self { session: Arc::new(Mutex::new(session)), user, csrf }
    }

    /// The authenticated user as loaded at the start of this request.
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub async fn impersonator(&self) -> Option<i64> {
        self.session.lock().await.impersonator()
    }

    /// Anti-forgery token for forms rendered in this response.
    ///
    /// A session that was never stored is persisted so the token stays verifiable.
    pub async fn csrf_token(&self) -> String {
        let mut session = self.session.lock().await;
        if session.is_new() {
            session.touch();
        }
        self.csrf.token_for(session.id())
    }

    pub async fn add_flash(&self, flash: Flash) {
        self.session.lock().await.add_flash(flash);
    }

    pub async fn take_flashes(&self) -> Vec<Flash> {
        self.session.lock().await.take_flashes()
    }

    /// Binds the session to `user` under a new id.
    pub async fn establish(&self, user: &User, impersonator: Option<i64>) {
        self.session.lock().await.establish(user.id, impersonator);
    }

    /// Logs the session out. Queued flashes survive for the next page.
    pub async fn clear_identity(&self) {
        self.session.lock().await.clear_identity();
    }
}

impl<S> FromRequestParts<S> for Context
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Context>()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("request context missing; is the context stage installed?")))
    }
}

/// Extracts the authenticated user, rejecting anonymous requests with 401.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = Context::from_request_parts(parts, state).await?;
        ctx.user
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

async fn resolve_session(state: &AppState, jar: &CookieJar) -> Session {
    let ttl = state.session_ttl;
    let Some(cookie) = jar.get(&state.config.session.cookie_name) else {
        return Session::new(ttl);
    };
    match state.sessions.load_session(cookie.value()).await {
        Ok(Some(session)) if !session.is_expired(Utc::now()) => session,
        Ok(Some(expired)) => {
            debug!("Session expired, starting a new one");
            if let Err(e) = state.sessions.delete_session(expired.id()).await {
                warn!(error = %e, "Failed to delete expired session");
            }
            Session::new(ttl)
        }
        Ok(None) => Session::new(ttl),
        Err(e) => {
            warn!(error = %e, "SessionResolutionFailure: continuing with an anonymous session");
            Session::new(ttl)
        }
    }
}

async fn resolve_user(state: &AppState, session: &Session) -> Option<User> {
    let user_id = session.user_id()?;
    match state.users.get_user(user_id).await {
        Ok(Some(user)) if !user.account_locked || session.impersonator().is_some() => Some(user),
        Ok(Some(user)) => {
            debug!(user_id = user.id, "Session belongs to a locked account");
            None
        }
        Ok(None) => {
            debug!(user_id, "Session refers to a missing user");
            None
        }
        Err(e) => {
            warn!(user_id, error = %e, "Failed to load session user");
            None
        }
    }
}

fn session_cookie(state: &AppState, session: &Session) -> Option<HeaderValue> {
    let cookie = Cookie::build((state.config.session.cookie_name.clone(), session.id().to_owned()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.server.use_tls)
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

/// Context stage of the global pipeline.
pub async fn inject(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let session = resolve_session(&state, &jar).await;
    let user = resolve_user(&state, &session).await;

    let ctx = Context::new(session, user, state.csrf.clone());
    req.extensions_mut().insert(ctx.clone());

    let mut res = next.run(req).await;

    let mut session = ctx.session.lock().await;
    if session.is_modified() {
        let was_new = session.is_new();
        match state.sessions.save_session(&session).await {
            Ok(()) => {
                if was_new {
                    state.metrics.inc_sessions_created();
                }
                session.mark_saved();
                if let Some(value) = session_cookie(&state, &session) {
                    res.headers_mut().append(SET_COOKIE, value);
                }
            }
            // The response is already produced; the client keeps its old session.
            Err(e) => error!("Failed to persist session: {}", e),
        }
    }
    res
}
