#[cfg(test)]
mod tests {
    use crate::config::{self, AppConfig};
    use std::env;
    use std::fs;

    fn assert_invalid(mutate: impl FnOnce(&mut AppConfig), expected: &str) {
        let mut cfg = AppConfig::default();
        mutate(&mut cfg);
        let err = config::validate(&cfg).unwrap_err();
        assert!(err.to_string().contains(expected), "unexpected error: {}", err);
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3333);
        assert!(!config.server.use_tls);
        assert!(!config.server.trust_proxy_headers);
        assert_eq!(config.database.url, "sqlite://data/torwache.db");
        assert_eq!(config.session.cookie_name, "torwache");
        assert_eq!(config.auth.max_failed_logins, 5);
        assert_eq!(config.rate_limit.login_max_attempts, 5);
        assert_eq!(config.rate_limit.login_window_secs, 60);
        assert!(config.csrf_key().is_none());
        assert!(config.initial_admin_password().is_none());
        assert!(!config.hsts_enabled());
        assert!(config::validate(&config).is_ok());
    }

    #[test]
    fn test_validation_errors() {
        assert_invalid(|c| c.server.port = 0, "invalid server.port");
        assert_invalid(
            |c| {
                c.server.use_tls = true;
                c.server.cert_path = " ".into();
            },
            "server.cert_path and server.key_path are required",
        );
        assert_invalid(|c| c.server.max_body_bytes = 10, "server.max_body_bytes");
        assert_invalid(|c| c.session.cookie_name = String::new(), "session.cookie_name");
        assert_invalid(|c| c.session.ttl_secs = 0, "session.ttl_secs");
        assert_invalid(|c| c.session.ttl_secs = 9_000_000_000_000, "session.ttl_secs must be in");
        assert_invalid(|c| c.session.ttl_secs = u64::MAX, "session.ttl_secs must be in");
        assert_invalid(|c| c.csrf.key = Some("too-short".into()), "csrf.key must be at least 32");
        assert_invalid(|c| c.auth.bcrypt_cost = 3, "auth.bcrypt_cost");
        assert_invalid(|c| c.auth.min_password_length = 0, "auth.min_password_length");
        assert_invalid(|c| c.auth.initial_admin_username = "  ".into(), "auth.initial_admin_username");
        assert_invalid(|c| c.rate_limit.login_max_attempts = 0, "rate_limit.login_max_attempts");
        assert_invalid(|c| c.rate_limit.login_window_secs = 0, "rate_limit.login_window_secs");
    }

    #[test]
    fn test_session_ttl_bounds() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.session.ttl(), Some(chrono::Duration::seconds(2_592_000)));

        cfg.session.ttl_secs = config::MAX_SESSION_TTL_SECS;
        assert!(config::validate(&cfg).is_ok());
        assert!(cfg.session.ttl().is_some());

        cfg.session.ttl_secs = config::MAX_SESSION_TTL_SECS + 1;
        assert!(cfg.session.ttl().is_none());
        cfg.session.ttl_secs = u64::MAX;
        assert!(cfg.session.ttl().is_none());
    }

    #[test]
    fn test_blank_csrf_key_means_generate() {
        let mut cfg = AppConfig::default();
        cfg.csrf.key = Some("   ".into());
        assert!(cfg.csrf_key().is_none());
        assert!(config::validate(&cfg).is_ok());

        cfg.csrf.key = Some("0123456789abcdef0123456789abcdef".into());
        assert_eq!(cfg.csrf_key(), Some("0123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn test_hsts_follows_tls_or_explicit_flag() {
        let mut cfg = AppConfig::default();
        cfg.server.use_tls = true;
        assert!(cfg.hsts_enabled());

        let mut cfg = AppConfig::default();
        if let Some(security) = cfg.security.as_mut() {
            security.enable_hsts = Some(true);
        }
        assert!(cfg.hsts_enabled());
    }

    // The only test touching process environment; the others stay on AppConfig values.
    #[test]
    fn test_file_and_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.toml");
        fs::write(
            &config_path,
            "[server]\nport = 4444\nhost = \"0.0.0.0\"\n\n[auth]\nmax_failed_logins = 9\n",
        )
        .unwrap();

        env::set_var("TORWACHE_CONFIG", config_path.to_str().unwrap());
        env::set_var("TORWACHE__SERVER__PORT", "5555");
        let loaded = config::load();
        env::remove_var("TORWACHE_CONFIG");
        env::remove_var("TORWACHE__SERVER__PORT");

        let cfg = loaded.unwrap();
        // environment beats file, file beats defaults
        assert_eq!(cfg.server.port, 5555);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.auth.max_failed_logins, 9);
        assert_eq!(cfg.session.cookie_name, "torwache");
    }

    #[test]
    fn test_ensure_sqlite_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("torwache.db");
        config::ensure_sqlite_parent_dir(&format!("sqlite://{}", nested.display())).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());

        // non-sqlite URLs are left alone
        assert!(config::ensure_sqlite_parent_dir("postgres://localhost/db").is_ok());
    }
}
