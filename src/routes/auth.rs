use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde_json::json;
use tracing::{info, warn};

use super::{found, next_path, DEFAULT_LANDING};
use crate::auth::AuthError;
use crate::error::AppResult;
use crate::middleware::{ClientIp, Context, CurrentUser};
use crate::state::AppState;
use crate::types::{Flash, FlashKind, ImpersonateForm, LoginForm, NextQuery, ResetPasswordForm, SsoQuery};
use crate::views::page;

async fn render_login(state: &AppState, ctx: &Context, next: Option<&str>, status: StatusCode) -> AppResult<Response> {
    let data = page(ctx, "Login", json!({ "next": next.unwrap_or_default() })).await;
    let html = state.views.render("login", &data)?;
    Ok((status, html).into_response())
}

pub async fn login_page(
    State(state): State<AppState>,
    ctx: Context,
    Query(q): Query<NextQuery>,
) -> AppResult<Response> {
    render_login(&state, &ctx, q.next.as_deref(), StatusCode::OK).await
}

/// Password login. Failures re-render the form with `401` and a flash.
pub async fn login(
    State(state): State<AppState>,
    ctx: Context,
    ClientIp(ip): ClientIp,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    match state.auth.login(&form.username, &form.password).await {
        Ok(user) => {
            ctx.establish(&user, None).await;
            state.metrics.inc_logins_succeeded();
            info!(user_id = user.id, %ip, "Login succeeded");
            Ok(found(&next_path(form.next.as_deref())))
        }
        Err(e @ (AuthError::InvalidCredentials | AuthError::AccountLocked)) => {
            state.metrics.inc_logins_failed();
            info!(%ip, reason = %e, "Login failed");
            ctx.add_flash(Flash::new(FlashKind::Danger, e.to_string())).await;
            render_login(&state, &ctx, form.next.as_deref(), StatusCode::UNAUTHORIZED).await
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn logout(ctx: Context) -> Response {
    ctx.clear_identity().await;
    ctx.add_flash(Flash::new(FlashKind::Success, "You have successfully logged out")).await;
    found("/login")
}

/// Trusted single sign-on hand-off.
///
/// An unknown or locked user gets an empty `200`; the reason only goes to the log.
pub async fn sso(
    State(state): State<AppState>,
    ctx: Context,
    ClientIp(ip): ClientIp,
    Query(q): Query<SsoQuery>,
) -> AppResult<Response> {
    let name = q.name.unwrap_or_default();
    match state.auth.sso(&name).await {
        Ok(user) => {
            ctx.establish(&user, None).await;
            state.metrics.inc_logins_succeeded();
            info!(user_id = user.id, %ip, "SSO login succeeded");
            Ok(found(&next_path(q.next.as_deref())))
        }
        Err(e @ (AuthError::InvalidCredentials | AuthError::AccountLocked)) => {
            state.metrics.inc_logins_failed();
            warn!(%ip, username = %name, reason = %e, "SSO login refused");
            Ok(StatusCode::OK.into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// Switches the session to another account without its password.
pub async fn impersonate(
    State(state): State<AppState>,
    ctx: Context,
    CurrentUser(admin): CurrentUser,
    Form(form): Form<ImpersonateForm>,
) -> AppResult<Response> {
    let target = state.auth.impersonate(&form.username).await?;
    ctx.establish(&target, Some(admin.id)).await;
    info!(admin_id = admin.id, target_id = target.id, "Impersonation started");
    Ok(found(DEFAULT_LANDING))
}

fn settings_redirect() -> Response {
    (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, "/settings")]).into_response()
}

async fn render_reset(
    state: &AppState,
    ctx: &Context,
    next: Option<&str>,
    status: StatusCode,
) -> AppResult<Response> {
    let data = page(
        ctx,
        "Reset Password",
        json!({
            "next": next.unwrap_or_default(),
            "min_password_length": state.auth.policy().min_password_length,
        }),
    )
    .await;
    let html = state.views.render("reset_password", &data)?;
    Ok((status, html).into_response())
}

pub async fn reset_password_page(
    State(state): State<AppState>,
    ctx: Context,
    CurrentUser(user): CurrentUser,
    Query(q): Query<NextQuery>,
) -> AppResult<Response> {
    if !user.password_change_required {
        ctx.add_flash(Flash::new(FlashKind::Info, "Please reset your password through the settings page")).await;
        return Ok(settings_redirect());
    }
    render_reset(&state, &ctx, q.next.as_deref(), StatusCode::OK).await
}

/// `PasswordResetRequired -> Active`.
pub async fn reset_password(
    State(state): State<AppState>,
    ctx: Context,
    CurrentUser(user): CurrentUser,
    Form(form): Form<ResetPasswordForm>,
) -> AppResult<Response> {
    match state.auth.reset_password(&user, &form.password, &form.confirm_password).await {
        Ok(()) => {
            ctx.add_flash(Flash::new(FlashKind::Success, "Password successfully reset")).await;
            Ok(found(&next_path(form.next.as_deref())))
        }
        Err(AuthError::ResetNotRequired) => {
            ctx.add_flash(Flash::new(FlashKind::Info, "Please reset your password through the settings page")).await;
            Ok(settings_redirect())
        }
        Err(AuthError::PasswordPolicy(violation)) => {
            ctx.add_flash(Flash::new(FlashKind::Danger, violation.to_string())).await;
            render_reset(&state, &ctx, form.next.as_deref(), StatusCode::BAD_REQUEST).await
        }
        Err(e) => Err(e.into()),
    }
}
