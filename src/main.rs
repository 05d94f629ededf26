//! FTP bridge server binary.
//!
//! Exposes a small HTTP/JSON API (login, list, upload, download, delete)
//! and forwards every operation to an FTP server over explicit TLS. Each
//! request opens its own backend session and closes it before responding.

mod app;
mod auth;
mod background;
mod body;
mod config;
mod credentials;
mod error;
mod files;
mod ftp;
mod guard;
mod http;
mod logging;
mod logs;
mod multipart;
mod sanitize;
mod session;
mod staging;
mod tls;
mod upload;
mod version;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::app::{AppState, build_router};
use crate::background::spawn_background_tasks;
use crate::config::{Args, TransferConfig};
use crate::credentials::CredentialCache;
use crate::ftp::FtpSessionFactory;
use crate::guard::{AbuseGuard, GuardConfig};
use crate::session::StorageClient;

shadow!(build);

/// Starts the bridge and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let staging_dir = PathBuf::from(&args.staging_dir);
    tokio::fs::create_dir_all(&staging_dir).await?;

    let tls_config = tls::relaxed_client_config().map_err(std::io::Error::other)?;
    let ftp_timeout = Duration::from_secs(args.ftp_timeout_secs);
    let factory = FtpSessionFactory::new(
        args.ftp_host.clone(),
        args.ftp_port,
        ftp_timeout,
        Arc::new(tls_config),
    );

    let guard = Arc::new(AbuseGuard::new(GuardConfig {
        window: Duration::from_secs(args.rate_limit_window_secs),
        max_requests: args.rate_limit_max,
        max_connections: args.max_connections_per_ip,
    }));
    let state = AppState {
        guard: guard.clone(),
        credentials: Arc::new(CredentialCache::new()),
        storage: Arc::new(StorageClient::new(Arc::new(factory), ftp_timeout)),
        transfer: Arc::new(TransferConfig {
            max_upload_size: args.upload_max_size,
            staging_dir: staging_dir.clone(),
        }),
    };
    let app = build_router(state);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", addr);
    info!(
        ftp_host = %args.ftp_host,
        ftp_port = args.ftp_port,
        "forwarding to FTP backend over explicit TLS"
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(guard, staging_dir);
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
