//! HTTP route handlers and the router that wires them into the pipeline.
//!
//! - `auth`: login, logout, SSO, impersonation and forced password reset
//! - `pages`: dashboard and the root redirect
//! - `settings`: account settings and voluntary password change
//! - `users`: administrative account management
//! - `api`: API-key authenticated JSON endpoints
//! - `health`: liveness, readiness, version and metrics

use axum::{
    extract::DefaultBodyLimit,
    http::{header, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use url::Url;

use crate::middleware::{self, guard, rate_limit, Guard, ADMIN_GUARDS, PIPELINE};
use crate::state::AppState;

pub mod api;
pub mod auth;
pub mod health;
pub mod pages;
pub mod settings;
pub mod users;

/// Default landing page after a successful login.
pub const DEFAULT_LANDING: &str = "/dashboard";

/// `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Reduces a user-supplied `next` value to its path, so a redirect can never
/// leave this host.
pub fn next_path(next: Option<&str>) -> String {
    next.map(str::trim)
        .filter(|n| !n.is_empty())
        .and_then(|n| Url::parse("http://localhost/").and_then(|base| base.join(n)).ok())
        .map(|u| u.path().to_string())
        .filter(|p| p.starts_with('/') && !p.starts_with("//"))
        .unwrap_or_else(|| DEFAULT_LANDING.to_string())
}

/// Builds the full application: routes, guards and the global pipeline.
pub fn router(state: AppState) -> Router {
    let limited = |method_router: MethodRouter<AppState>| {
        method_router.route_layer(from_fn_with_state(state.clone(), rate_limit::limit))
    };

    let public = Router::new()
        .route("/login", get(auth::login_page).merge(limited(post(auth::login))))
        .route("/sso", limited(get(auth::sso)))
        .route("/api/login", limited(post(api::api_login)))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/version", get(health::version));

    let browser = Router::new()
        .route("/", get(pages::root))
        .route("/logout", get(auth::logout))
        .route("/reset_password", get(auth::reset_password_page).post(auth::reset_password))
        .route("/dashboard", get(pages::dashboard))
        .route("/settings", get(settings::settings_page).post(settings::change_password));
    let browser = guard(browser, &state, &[Guard::RequireLogin]);

    let admin = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/{username}/unlock", post(users::unlock))
        .route("/users/{username}/lock", post(users::lock))
        .route("/users/{username}/require_reset", post(users::require_reset))
        .route("/impersonate", post(auth::impersonate))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus));
    let admin = guard(admin, &state, ADMIN_GUARDS);

    let api = guard(Router::new().route("/api/me", get(api::me)), &state, &[Guard::RequireApiKey]);

    let app = Router::new()
        .merge(public)
        .merge(browser)
        .merge(admin)
        .merge(api)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes));

    middleware::compose(app, &state, PIPELINE)
}
