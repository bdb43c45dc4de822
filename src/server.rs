//! Listener setup: plain HTTP via `axum::serve`, or TLS via `axum-server` + rustls.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{info, warn};

use crate::config::ServerConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const SELF_SIGNED_NAMES: &[&str] = &["localhost", "127.0.0.1"];

pub fn listen_addr(cfg: &ServerConfig) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", cfg.host, cfg.port, e))
}

/// Serves `app` until a shutdown signal arrives.
pub async fn serve(app: Router, cfg: &ServerConfig) -> anyhow::Result<()> {
    let addr = listen_addr(cfg)?;
    if cfg.use_tls {
        serve_https(app, addr, Path::new(&cfg.cert_path), Path::new(&cfg.key_path)).await
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Torwache listening on http://{}", listener.local_addr()?);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn serve_https(app: Router, addr: SocketAddr, cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    if ensure_tls_files(cert_path, key_path)? {
        warn!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "No TLS certificate found, generated a self-signed one"
        );
    }
    validate_tls_files(cert_path, key_path)?;
    let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {}", e))?;
    info!(cert_path = %cert_path.display(), key_path = %key_path.display(), "TLS certificates loaded");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!("Torwache listening on https://{}", addr);
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

/// Writes a self-signed certificate and key when neither file exists yet.
///
/// Returns `true` when a pair was generated. A pair where only one side is
/// present is left alone and rejected by [`validate_tls_files`].
pub fn ensure_tls_files(cert_path: &Path, key_path: &Path) -> anyhow::Result<bool> {
    if cert_path.exists() || key_path.exists() {
        return Ok(false);
    }
    let names: Vec<String> = SELF_SIGNED_NAMES.iter().map(|n| n.to_string()).collect();
    let generated = rcgen::generate_simple_self_signed(names)
        .map_err(|e| anyhow::anyhow!("Failed to generate self-signed certificate: {}", e))?;

    for path in [cert_path, key_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(cert_path, generated.cert.pem())
        .map_err(|e| anyhow::anyhow!("Cannot write certificate {}: {}", cert_path.display(), e))?;
    std::fs::write(key_path, generated.key_pair.serialize_pem())
        .map_err(|e| anyhow::anyhow!("Cannot write private key {}: {}", key_path.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(true)
}

/// TLS files must exist, be regular files and be non-empty.
pub fn validate_tls_files(cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    let validate_file = |path: &Path, file_type: &str| -> anyhow::Result<()> {
        if !path.exists() {
            return Err(anyhow::anyhow!("{} file does not exist: {}", file_type, path.display()));
        }
        if !path.is_file() {
            return Err(anyhow::anyhow!("{} path is not a file: {}", file_type, path.display()));
        }
        let metadata = std::fs::metadata(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {} file {}: {}", file_type, path.display(), e))?;
        if metadata.len() == 0 {
            return Err(anyhow::anyhow!("{} file is empty: {}", file_type, path.display()));
        }
        Ok(())
    };

    validate_file(cert_path, "Certificate")?;
    validate_file(key_path, "Private key")?;
    Ok(())
}

pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
