use axum::{
    extract::{Path, State},
    response::Html,
    Json,
};
use serde_json::json;
use tracing::info;

use crate::error::AppResult;
use crate::middleware::{Context, CurrentUser};
use crate::state::AppState;
use crate::types::{ApiResponse, User};
use crate::views::page;

pub async fn list_users(State(state): State<AppState>, ctx: Context) -> AppResult<Html<String>> {
    let users: Vec<_> = state
        .users
        .list_users()
        .await?
        .into_iter()
        .map(|u| {
            json!({
                "username": u.username,
                "role": u.role,
                "state": u.state(),
                "failed_logins": u.failed_logins,
                "last_login": u.last_login,
            })
        })
        .collect();
    let data = page(&ctx, "Users", json!({ "users": users })).await;
    state.views.render("users", &data)
}

/// `Locked -> Active`.
pub async fn unlock(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.auth.unlock(&username).await?;
    info!(admin_id = admin.id, user_id = user.id, "Unlock requested");
    Ok(Json(ApiResponse::with_data("Account unlocked", user)))
}

pub async fn lock(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.auth.lock(&username).await?;
    info!(admin_id = admin.id, user_id = user.id, "Lock requested");
    Ok(Json(ApiResponse::with_data("Account locked", user)))
}

/// `Active -> PasswordResetRequired`.
pub async fn require_reset(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.auth.require_password_reset(&username).await?;
    info!(admin_id = admin.id, user_id = user.id, "Password reset forced");
    Ok(Json(ApiResponse::with_data("Password reset required", user)))
}
