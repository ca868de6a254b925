//! wterm-server: web terminal server.
//!
//! Serves the multiplexed WebSocket protocol (shell and filesystem sessions
//! over one socket), one-shot file transfers and the profile listing.

mod api;
mod backend;
mod config;
mod dispatcher;
mod fs_router;
mod session;
mod transfer;
mod transport;

use api::AppState;
use clap::Parser;
use config::ServerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use transfer::TransferRegistry;

/// wterm-server: web terminal server
#[derive(Parser, Debug)]
#[command(name = "wterm-server", version, about = "Web terminal server")]
struct Cli {
    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.wterm/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), cli.listen.as_deref(), cli.port) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", config.listen, config.port);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        profiles = config.profiles.len(),
        "starting wterm-server"
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "bind failed");
            std::process::exit(1);
        }
    };

    let state = AppState {
        config: Arc::new(config),
        transfers: Arc::new(TransferRegistry::new()),
    };
    let transfers = state.transfers.clone();

    if let Err(e) = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    let (downloads, uploads) = transfers.pending().await;
    if downloads + uploads > 0 {
        info!(downloads, uploads, "unclaimed transfers dropped");
    }
    info!("wterm-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("received shutdown signal");
}
