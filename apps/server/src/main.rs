//! Camproxy Server - standalone headless camera live-view proxy.
//!
//! Proxies a single cloud camera's livestream into a plain HTTP fragmented-MP4
//! endpoint and a JSON WebSocket control channel, without the vendor mobile
//! app or its push infrastructure.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use camproxy_core::driver::NullDriverClient;
use camproxy_core::{bootstrap_services, start_server, DriverClient};
use tokio::signal;

use crate::config::ServerConfig;

/// Camproxy Server - headless cloud-camera-to-HTTP live-view proxy.
#[derive(Parser, Debug)]
#[command(name = "camproxy-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CAMPROXY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "CAMPROXY_BIND_PORT")]
    port: Option<u16>,

    /// Host to advertise in stream/WebSocket URLs (overrides config file).
    #[arg(short = 'a', long, env = "CAMPROXY_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// Data directory for persistent state (config, snapshots, picture hashes).
    #[arg(short = 'd', long, env = "CAMPROXY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Camproxy Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(host) = args.advertise_host {
        config.advertise_host = host;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    log::info!(
        "Configuration: bind_port={}, advertise_host={}, data_dir={}",
        config.bind_port,
        config.advertise_host,
        config.data_dir.display()
    );

    let core_config = config.to_core_config();

    // The vendor cloud driver SDK is an external collaborator out of core
    // scope; until a real implementation is wired in here, the server runs
    // against a placeholder that serves `/health` but rejects connect/stream
    // requests.
    let driver: Arc<dyn DriverClient> = Arc::new(NullDriverClient);

    if let (Some(username), Some(password), Some(country), Some(language)) = (
        core_config.whitelisted.username.clone(),
        core_config.whitelisted.password.clone(),
        core_config.whitelisted.country.clone(),
        core_config.whitelisted.language.clone(),
    ) {
        if let Err(e) = driver.connect(&username, &password, &country, &language).await {
            log::warn!("driver connect at startup failed: {e}");
        }
    } else {
        log::info!("no driver credentials configured yet; waiting for POST /config");
    }

    let services = bootstrap_services(core_config, driver);
    log::info!("Services bootstrapped successfully");

    let app_state = services.into_app_state();
    let shutdown_state = app_state.clone();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    let closed = shutdown_state.ws_manager.close_all();
    log::info!("Closed {closed} WebSocket connection(s)");
    shutdown_state.hub.reset();
    shutdown_state.encoder.stop().await;
    let _ = shutdown_state.driver.disconnect().await;

    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
