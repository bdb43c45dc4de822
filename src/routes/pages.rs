use axum::{extract::State, response::Html, response::Response};
use serde_json::json;

use super::{found, DEFAULT_LANDING};
use crate::error::AppResult;
use crate::middleware::Context;
use crate::state::AppState;
use crate::views::page;

pub async fn root() -> Response {
    found(DEFAULT_LANDING)
}

pub async fn dashboard(State(state): State<AppState>, ctx: Context) -> AppResult<Html<String>> {
    let data = page(&ctx, "Dashboard", json!({})).await;
    state.views.render("dashboard", &data)
}
