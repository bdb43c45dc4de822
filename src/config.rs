use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub cert_path: String,
    pub key_path: String,
    /// Honour `X-Forwarded-For` / `X-Real-IP` when resolving the client address.
    pub trust_proxy_headers: bool,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Upper bound for `session.ttl_secs` (ten years).
pub const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_secs: u64,
}

impl SessionConfig {
    /// Session lifetime as a `chrono` duration, `None` when out of range.
    pub fn ttl(&self) -> Option<chrono::Duration> {
        if self.ttl_secs == 0 || self.ttl_secs > MAX_SESSION_TTL_SECS {
            return None;
        }
        i64::try_from(self.ttl_secs).ok().and_then(chrono::Duration::try_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CsrfConfig {
    /// Shared key for multi-instance deployments. Empty means "load or generate".
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Consecutive failed logins before the account is locked. 0 disables lockout.
    pub max_failed_logins: u32,
    pub min_password_length: usize,
    pub bcrypt_cost: u32,
    pub initial_admin_username: String,
    pub initial_admin_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_max_attempts: u32,
    pub login_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub security: Option<SecurityConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl AppConfig {
    /// The configured CSRF key, if one was set to a non-blank value.
    pub fn csrf_key(&self) -> Option<&str> {
        self.csrf.key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn initial_admin_password(&self) -> Option<&str> {
        self.auth.initial_admin_password.as_deref().filter(|p| !p.is_empty())
    }

    /// HSTS only makes sense when we terminate TLS ourselves or it was asked for explicitly.
    pub fn hsts_enabled(&self) -> bool {
        self.server.use_tls
            || self.security.as_ref().and_then(|s| s.enable_hsts).unwrap_or(false)
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: torwache.toml (in CWD)
        .add_source(::config::File::with_name("torwache").required(false));

    if let Ok(custom_path) = std::env::var("TORWACHE_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("TORWACHE").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub(crate) fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if cfg.server.use_tls && (cfg.server.cert_path.trim().is_empty() || cfg.server.key_path.trim().is_empty())
    {
        return Err(anyhow::anyhow!("server.cert_path and server.key_path are required when use_tls is set"));
    }
    if cfg.server.max_body_bytes < 1024 {
        return Err(anyhow::anyhow!("server.max_body_bytes must be >= 1024"));
    }

    // Session
    if cfg.session.cookie_name.trim().is_empty() {
        return Err(anyhow::anyhow!("session.cookie_name must not be empty"));
    }
    if cfg.session.ttl_secs == 0 || cfg.session.ttl_secs > MAX_SESSION_TTL_SECS {
        return Err(anyhow::anyhow!(
            "session.ttl_secs must be in 1..={} (got {})",
            MAX_SESSION_TTL_SECS,
            cfg.session.ttl_secs
        ));
    }

    // CSRF: a configured key must carry enough entropy
    if let Some(key) = cfg.csrf_key() {
        if key.len() < 32 {
            return Err(anyhow::anyhow!("csrf.key must be at least 32 characters"));
        }
    }

    // Auth
    if !(4..=31).contains(&cfg.auth.bcrypt_cost) {
        return Err(anyhow::anyhow!("auth.bcrypt_cost must be in 4..=31"));
    }
    if cfg.auth.min_password_length == 0 {
        return Err(anyhow::anyhow!("auth.min_password_length must be > 0"));
    }
    if cfg.auth.initial_admin_username.trim().is_empty() {
        return Err(anyhow::anyhow!("auth.initial_admin_username must not be empty"));
    }

    // Rate limiting
    if cfg.rate_limit.login_max_attempts == 0 {
        return Err(anyhow::anyhow!("rate_limit.login_max_attempts must be > 0"));
    }
    if cfg.rate_limit.login_window_secs == 0 {
        return Err(anyhow::anyhow!("rate_limit.login_window_secs must be > 0"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
