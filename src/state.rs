use std::sync::Arc;

use crate::auth::{AuthPolicy, Authenticator};
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::{CsrfKey, EndpointRateLimiter};
use crate::store::{SessionStore, SqliteStore, UserStore};
use crate::views::Views;

/// Route patterns that sit behind the login rate limiter.
pub const RATE_LIMITED_ENDPOINTS: &[&str] = &["/login", "/sso", "/api/login"];

/// The shared application state.
///
/// Everything a handler or middleware needs is reachable from here; there is no
/// process-global store handle.
#[derive(Clone)]
pub struct AppState {
    /// Connection pool, used directly only by the readiness probe.
    pub db: sqlx::SqlitePool,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<AppConfig>,
    /// `session.ttl_secs` as a duration, checked once at startup.
    pub session_ttl: chrono::Duration,
    pub metrics: Metrics,
    /// Fixed-window limits for the sensitive endpoints.
    pub rate_limiter: EndpointRateLimiter,
    pub csrf: CsrfKey,
    pub auth: Authenticator,
    pub views: Views,
}

impl AppState {
    /// State backed by a single [`SqliteStore`] for both users and sessions.
    pub fn new(store: SqliteStore, config: AppConfig, csrf: CsrfKey) -> anyhow::Result<Self> {
        let db = store.pool().clone();
        let store = Arc::new(store);
        Self::with_stores(db, store.clone(), store, config, csrf)
    }

    /// State with explicitly injected stores.
    pub fn with_stores(
        db: sqlx::SqlitePool,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        config: AppConfig,
        csrf: CsrfKey,
    ) -> anyhow::Result<Self> {
        let session_ttl = config
            .session
            .ttl()
            .ok_or_else(|| anyhow::anyhow!("session.ttl_secs out of range: {}", config.session.ttl_secs))?;
        let metrics = Metrics::new();
        let rl = &config.rate_limit;
        let rate_limiter = EndpointRateLimiter::new().with_limits(
            RATE_LIMITED_ENDPOINTS
                .iter()
                .map(|endpoint| (*endpoint, rl.login_max_attempts, rl.login_window_secs))
                .collect(),
        );
        let auth = Authenticator::new(users.clone(), AuthPolicy::from(&config.auth), metrics.clone());

        Ok(Self {
            db,
            users,
            sessions,
            config: Arc::new(config),
            session_ttl,
            metrics,
            rate_limiter,
            csrf,
            auth,
            views: Views::new()?,
        })
    }
}
