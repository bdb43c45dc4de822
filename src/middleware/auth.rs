use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use super::context::Context;
use crate::error::AppError;
use crate::state::AppState;
use crate::types::{Permission, User};

/// Paths a user with a pending password reset may still reach.
const RESET_ALLOWED_PATHS: &[&str] = &["/reset_password", "/logout"];

/// The user behind a valid API key, set by [`require_api_key`].
#[derive(Clone, Debug)]
pub struct ApiCaller(pub User);

fn redirect_with_next(target: &str, req: &Request) -> Response {
    let current = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let next: String = url::form_urlencoded::byte_serialize(current.as_bytes()).collect();
    Redirect::temporary(&format!("{}?next={}", target, next)).into_response()
}

fn context(req: &Request) -> Result<&Context, AppError> {
    req.extensions()
        .get::<Context>()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("request context missing; is the context stage installed?")))
}

/// Browser routes: anonymous requests go to the login page, accounts with a
/// pending reset go to the reset page.
pub async fn require_login(req: Request, next: Next) -> Response {
    let user = match context(&req) {
        Ok(ctx) => ctx.user().cloned(),
        Err(e) => return e.into_response(),
    };
    match user {
        None => redirect_with_next("/login", &req),
        Some(user) if user.password_change_required && !RESET_ALLOWED_PATHS.contains(&req.uri().path()) => {
            redirect_with_next("/reset_password", &req)
        }
        Some(_) => next.run(req).await,
    }
}

pub async fn require_permission(State(permission): State<Permission>, req: Request, next: Next) -> Response {
    let user = match context(&req) {
        Ok(ctx) => ctx.user().cloned(),
        Err(e) => return e.into_response(),
    };
    match user {
        None => redirect_with_next("/login", &req),
        Some(user) if user.has_permission(permission) => next.run(req).await,
        Some(user) => {
            tracing::info!(
                user_id = user.id,
                permission = permission.as_str(),
                path = %req.uri().path(),
                "Permission denied"
            );
            AppError::Forbidden(format!("Missing permission: {}", permission.as_str())).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

fn api_key_from_request(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(key) = value.strip_prefix("Bearer ") {
            let key = key.trim();
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
    }
    Query::<ApiKeyQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.api_key)
        .filter(|k| !k.is_empty())
}

/// API routes: `Authorization: Bearer <key>` or `?api_key=<key>`.
pub async fn require_api_key(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(key) = api_key_from_request(&req) else {
        return AppError::Unauthorized("API Key not set".to_string()).into_response();
    };
    match state.users.get_user_by_api_key(&key).await {
        Ok(Some(user)) if user.account_locked => {
            tracing::info!(user_id = user.id, "API request refused: account locked");
            AppError::AccountLocked.into_response()
        }
        Ok(Some(user)) => {
            req.extensions_mut().insert(ApiCaller(user));
            next.run(req).await
        }
        Ok(None) => AppError::Unauthorized("Invalid API Key".to_string()).into_response(),
        Err(e) => {
            tracing::error!("API key lookup failed: {}", e);
            AppError::ServiceUnavailable("API key lookup failed".to_string()).into_response()
        }
    }
}
