use std::time::Duration;

use tokio::time;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use torwache::middleware::CsrfKey;
use torwache::state::AppState;
use torwache::store::{SessionStore, SqliteStore};
use torwache::{config, db, routes, server};

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + tägliche Datei-Rotation unter ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "torwache.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Guards am Leben halten, damit die Non-Blocking-Writer beim Beenden flushen
    let _log_guards = (stdout_guard, file_guard);

    // Konfiguration: eingebettete Defaults -> torwache.toml -> TORWACHE_CONFIG -> Umgebung
    let app_cfg = config::load()?;

    config::ensure_sqlite_parent_dir(&app_cfg.database.url)?;
    let pool = db::connect(&app_cfg.database.url, 16).await?;
    db::init_db(&pool).await?;

    let session_ttl = app_cfg
        .session
        .ttl()
        .ok_or_else(|| anyhow::anyhow!("session.ttl_secs out of range: {}", app_cfg.session.ttl_secs))?;
    let store = SqliteStore::new(pool, session_ttl);

    // Ohne CSRF-Schlüssel kein Start
    let csrf = CsrfKey::load_or_create(&store, app_cfg.csrf_key()).await?;

    let state = AppState::new(store.clone(), app_cfg.clone(), csrf)?;

    if let Some(generated) = state
        .auth
        .bootstrap_admin(&app_cfg.auth.initial_admin_username, app_cfg.initial_admin_password())
        .await?
    {
        warn!(
            username = %app_cfg.auth.initial_admin_username,
            "Initial administrator created with password {} - it must be changed at first login",
            generated
        );
    }

    // Abgelaufene Rate-Limit-Fenster regelmäßig verwerfen
    {
        let rl = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                let dropped = rl.cleanup_all().await;
                if dropped > 0 {
                    debug!("Dropped {} elapsed rate-limit windows", dropped);
                }
            }
        });
    }

    // Abgelaufene Sitzungen löschen
    {
        let sessions = store.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(SESSION_PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                match sessions.purge_expired_sessions(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => info!("Purged {} expired sessions", n),
                    Err(e) => error!("Failed to purge expired sessions: {}", e),
                }
            }
        });
    }

    let app = routes::router(state);
    server::serve(app, &app_cfg.server).await
}
