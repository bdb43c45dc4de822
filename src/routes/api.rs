use axum::{extract::State, Extension, Json};
use tracing::info;

use crate::auth::AuthError;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::ApiCaller;
use crate::middleware::ClientIp;
use crate::state::AppState;
use crate::types::{ApiLoginRequest, ApiResponse, ApiUser};

/// JSON login for API clients. Returns the key to use on subsequent calls.
pub async fn api_login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<ApiLoginRequest>,
) -> AppResult<Json<ApiResponse<ApiUser>>> {
    match state.auth.login(&req.username, &req.password).await {
        Ok(user) => {
            state.metrics.inc_logins_succeeded();
            info!(user_id = user.id, %ip, "API login succeeded");
            Ok(Json(ApiResponse::with_data("Login successful", ApiUser::from(&user))))
        }
        Err(e @ (AuthError::InvalidCredentials | AuthError::AccountLocked)) => {
            state.metrics.inc_logins_failed();
            info!(%ip, reason = %e, "API login failed");
            Err(AppError::from(e))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn me(Extension(ApiCaller(user)): Extension<ApiCaller>) -> Json<ApiUser> {
    Json(ApiUser::from(&user))
}
