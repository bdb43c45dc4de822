use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde_json::json;

use crate::auth::AuthError;
use crate::error::AppResult;
use crate::middleware::{Context, CurrentUser};
use crate::state::AppState;
use crate::types::{ApiResponse, ChangePasswordForm};
use crate::views::page;

pub async fn settings_page(
    State(state): State<AppState>,
    ctx: Context,
    CurrentUser(user): CurrentUser,
) -> AppResult<Html<String>> {
    let data = page(
        &ctx,
        "Settings",
        json!({
            "api_key": user.api_key,
            "min_password_length": state.auth.policy().min_password_length,
        }),
    )
    .await;
    state.views.render("settings", &data)
}

/// Voluntary password change. Answers with JSON so the page can show the result inline.
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Response> {
    let result = state
        .auth
        .change_password(&user, &form.current_password, &form.new_password, &form.confirm_new_password)
        .await;
    match result {
        Ok(()) => Ok(Json(ApiResponse::ok("Settings Updated")).into_response()),
        Err(e @ (AuthError::IncorrectPassword | AuthError::PasswordPolicy(_))) => {
            Ok((StatusCode::BAD_REQUEST, Json(ApiResponse::failed(e.to_string()))).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
