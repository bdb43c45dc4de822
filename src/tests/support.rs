//! Shared fixtures: a router over a temporary SQLite database and a small
//! cookie-carrying client.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::middleware::CsrfKey;
use crate::routes;
use crate::state::AppState;
use crate::store::{SessionStore, SqliteStore, UserStore};
use crate::types::{Role, User};

pub const TEST_CSRF_KEY: &[u8] = b"test-csrf-key-0123456789abcdef-0123";

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.bcrypt_cost = 4;
    cfg.auth.min_password_length = 8;
    // Most tests log in more often than the production limit allows.
    cfg.rate_limit.login_max_attempts = 1000;
    cfg
}

/// Fresh schema in a temporary directory. Keep the `TempDir` alive.
pub async fn test_pool() -> (sqlx::SqlitePool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("torwache-test.db").display());
    let pool = crate::db::connect(&url, 4).await.unwrap();
    crate::db::init_db(&pool).await.unwrap();
    (pool, dir)
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: SqliteStore,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = test_config();
        adjust(&mut cfg);
        let (pool, dir) = test_pool().await;
        let store = SqliteStore::new(pool, cfg.session.ttl().unwrap());
        let state = AppState::new(store.clone(), cfg, CsrfKey::new(TEST_CSRF_KEY).unwrap()).unwrap();
        let app = routes::router(state.clone());
        Self { app, state, store, _dir: dir }
    }

    /// Same database for users, but sessions come from `sessions`.
    pub async fn with_session_store(sessions: Arc<dyn SessionStore>) -> Self {
        let cfg = test_config();
        let (pool, dir) = test_pool().await;
        let store = SqliteStore::new(pool.clone(), cfg.session.ttl().unwrap());
        let users: Arc<dyn UserStore> = Arc::new(store.clone());
        let state =
            AppState::with_stores(pool, users, sessions, cfg, CsrfKey::new(TEST_CSRF_KEY).unwrap()).unwrap();
        let app = routes::router(state.clone());
        Self { app, state, store, _dir: dir }
    }

    pub async fn add_user(&self, username: &str, password: &str, role: Role) -> User {
        self.state.auth.provision(username, password, role, false).await.unwrap()
    }

    pub async fn add_user_requiring_reset(&self, username: &str, password: &str) -> User {
        self.state.auth.provision(username, password, Role::User, true).await.unwrap()
    }

    pub async fn user(&self, username: &str) -> User {
        self.store.get_user_by_username(username).await.unwrap().unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub fn browser(&self) -> Browser<'_> {
        Browser { app: self, cookie: None }
    }
}

pub async fn body_string(res: Response<Body>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(res).await).unwrap()
}

pub fn location(res: &Response<Body>) -> String {
    res.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

/// Pulls the hidden `csrf_token` field out of a rendered form.
pub fn form_token(html: &str) -> Option<String> {
    let marker = "name=\"csrf_token\" value=\"";
    let start = html.find(marker)? + marker.len();
    let end = html[start..].find('"')? + start;
    Some(html[start..end].to_string())
}

fn encode_form(fields: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new()).extend_pairs(fields.iter().copied()).finish()
}

/// Keeps the session cookie between requests like a browser would.
pub struct Browser<'a> {
    app: &'a TestApp,
    cookie: Option<String>,
}

impl Browser<'_> {
    pub fn session_id(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_session_id(&mut self, id: &str) {
        self.cookie = Some(id.to_string());
    }

    /// Token valid for the current session.
    pub fn csrf_token(&self) -> String {
        self.app.state.csrf.token_for(self.cookie.as_deref().unwrap_or_default())
    }

    fn builder(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = &self.cookie {
            let name = &self.app.state.config.session.cookie_name;
            builder = builder.header(header::COOKIE, format!("{}={}", name, id));
        }
        builder
    }

    async fn send(&mut self, req: Request<Body>) -> Response<Body> {
        let res = self.app.send(req).await;
        let prefix = format!("{}=", self.app.state.config.session.cookie_name);
        for value in res.headers().get_all(header::SET_COOKIE) {
            if let Some(rest) = value.to_str().ok().and_then(|v| v.strip_prefix(&prefix)) {
                self.cookie = Some(rest.split(';').next().unwrap_or_default().to_string());
            }
        }
        res
    }

    pub async fn get(&mut self, uri: &str) -> Response<Body> {
        let req = self.builder("GET", uri).body(Body::empty()).unwrap();
        self.send(req).await
    }

    /// Form POST without any token.
    pub async fn post_form_raw(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response<Body> {
        let req = self
            .builder("POST", uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encode_form(fields)))
            .unwrap();
        self.send(req).await
    }

    /// Form POST carrying the session's token in the `csrf_token` field.
    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response<Body> {
        if self.cookie.is_none() {
            self.get("/login").await;
        }
        let token = self.csrf_token();
        let mut fields = fields.to_vec();
        fields.push(("csrf_token", token.as_str()));
        self.post_form_raw(uri, &fields).await
    }

    /// Empty POST with the token in the `X-CSRF-Token` header.
    pub async fn post_with_header_token(&mut self, uri: &str) -> Response<Body> {
        let req = self
            .builder("POST", uri)
            .header("X-CSRF-Token", self.csrf_token())
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Response<Body> {
        self.post_form("/login", &[("username", username), ("password", password)]).await
    }
}
