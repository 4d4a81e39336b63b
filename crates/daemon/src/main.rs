//! hookbus Daemon
//!
//! Hosts the blackboard and the event broker that drivers and engines share.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod server;
mod state;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "hookbusd")]
#[command(about = "hookbus daemon - blackboard and event broker for test engines")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HOOKBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Socket path
    #[arg(long, env = "HOOKBUS_SOCKET")]
    socket: Option<PathBuf>,

    /// Broker version to announce (below 3 serves line listings)
    #[arg(long)]
    broker_version: Option<u32>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(hookbus_common::default_config_path);
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(socket) = cli.socket {
        config.socket_path = Some(socket);
    }
    if let Some(version) = cli.broker_version {
        config.broker_version = version;
    }

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    if cli.write_config {
        config.save(&config_path)?;
        info!("Configuration written to {}", config_path.display());
        return Ok(());
    }

    info!("hookbus daemon v{}", hookbus_common::VERSION);

    tokio::fs::create_dir_all(&config.store_path).await?;

    let state = state::BusState::new(&config);
    let socket_path = state.config().socket_path();
    info!("Broker version {}", state.broker_version());

    let server_path = socket_path.clone();
    let server_handle = tokio::spawn(async move { server::serve(&server_path, state).await });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("Bus server error: {}", e),
                Err(e) => tracing::error!("Bus server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    info!("Daemon shutdown complete");
    Ok(())
}
