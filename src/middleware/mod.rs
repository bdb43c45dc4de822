//! The secured request pipeline.
//!
//! Global stages are listed in [`PIPELINE`] from outermost to innermost and
//! folded onto the router by [`compose`]. Route groups then add their own
//! ordered [`Guard`] list with [`guard`]. A stage that produces a response
//! itself (CSRF rejection, login redirect, ...) ends the request there; inner
//! stages and the handler never run.

use axum::{body::Body, http::Request, middleware::from_fn, middleware::from_fn_with_state, Router};
use tower_http::{
    compression::CompressionLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub mod auth;
pub mod context;
pub mod csrf;
pub mod proxy;
pub mod rate_limit;
pub mod security_headers;

pub use context::{Context, CurrentUser};
pub use csrf::CsrfKey;
pub use proxy::ClientIp;
pub use rate_limit::EndpointRateLimiter;

use crate::state::AppState;
use crate::types::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Resolves the client address (honouring proxy headers when trusted).
    ProxyHeaders,
    /// One span and one log line per request.
    AccessLog,
    Compression,
    /// Anti-forgery check for state-changing methods.
    Csrf,
    /// Session and user resolution; persists the session afterwards.
    Context,
    SecurityHeaders,
}

/// Global stage order, outermost first.
pub const PIPELINE: &[Stage] = &[
    Stage::ProxyHeaders,
    Stage::AccessLog,
    Stage::Compression,
    Stage::Csrf,
    Stage::Context,
    Stage::SecurityHeaders,
];

/// Per-route authorization, applied inside the global stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    RequireLogin,
    RequirePermission(Permission),
    RequireApiKey,
}

/// Guards for admin-only browser routes.
pub const ADMIN_GUARDS: &[Guard] = &[Guard::RequireLogin, Guard::RequirePermission(Permission::ModifySystem)];

fn access_log_span(req: &Request<Body>) -> tracing::Span {
    let client_ip = req.extensions().get::<ClientIp>().map(|ip| ip.to_string()).unwrap_or_default();
    tracing::info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri().path(),
        client_ip = %client_ip,
    )
}

fn apply_stage(router: Router, state: &AppState, stage: Stage) -> Router {
    match stage {
        Stage::ProxyHeaders => {
            router.layer(from_fn_with_state(state.config.clone(), proxy::normalize_proxy_headers))
        }
        Stage::AccessLog => router.layer(
            TraceLayer::new_for_http()
                .make_span_with(access_log_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        ),
        Stage::Compression => router.layer(CompressionLayer::new()),
        Stage::Csrf => router.layer(from_fn_with_state(state.clone(), csrf::protect)),
        Stage::Context => router.layer(from_fn_with_state(state.clone(), context::inject)),
        Stage::SecurityHeaders => router.layer(from_fn_with_state(
            state.config.clone(),
            security_headers::security_headers_middleware,
        )),
    }
}

/// Wraps `router` in `stages` so that `stages[0]` is outermost.
pub fn compose(router: Router, state: &AppState, stages: &[Stage]) -> Router {
    stages.iter().rev().fold(router, |router, stage| apply_stage(router, state, *stage))
}

/// Applies `guards` to every route currently in `router`, `guards[0]` outermost.
pub fn guard(router: Router<AppState>, state: &AppState, guards: &[Guard]) -> Router<AppState> {
    guards.iter().rev().fold(router, |router, g| match *g {
        Guard::RequireLogin => router.route_layer(from_fn(auth::require_login)),
        Guard::RequirePermission(p) => router.route_layer(from_fn_with_state(p, auth::require_permission)),
        Guard::RequireApiKey => router.route_layer(from_fn_with_state(state.clone(), auth::require_api_key)),
    })
}
