//! hookbus CLI - Main Entry Point
//!
//! Dispatches steps to automation engines and inspects a running bus.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hookbus_cli::client::Session;
use hookbus_cli::commands::{config, dispatch, engines, event, record, status_codes};
use hookbus_cli::output::{self, print_error, print_message};
use hookbus_dispatch::DriverConfig;

/// hookbus CLI - driver for the test engine bus
#[derive(Parser)]
#[command(name = "hookbus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Driver configuration file [default: ~/.hookbus/driver.toml]
    #[arg(short, long, global = true, env = "HOOKBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Daemon socket (overrides the config file)
    #[arg(long, global = true, env = "HOOKBUS_SOCKET")]
    socket: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch one step to an engine, falling back through candidates
    Dispatch(dispatch::DispatchArgs),

    /// Discover engines on the bus
    Engines(engines::EnginesArgs),

    /// Inspect and drive events
    #[command(subcommand)]
    Event(event::EventCommands),

    /// Inspect records on the blackboard
    #[command(subcommand)]
    Record(record::RecordCommands),

    /// List the status codes engines report
    StatusCodes,

    /// Driver configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(hookbus_common::default_driver_config_path);
    let mut driver_config = DriverConfig::load(&config_path)?;
    if let Some(socket) = cli.socket {
        driver_config.socket_path = socket;
    }
    let session = Session::new(driver_config);

    match cli.command {
        Commands::Dispatch(args) => dispatch::execute(args, &session, cli.format).await?,
        Commands::Engines(args) => engines::execute(args, &session, cli.format).await?,
        Commands::Event(cmd) => event::execute(cmd, &session, cli.format).await?,
        Commands::Record(cmd) => record::execute(cmd, &session, cli.format).await?,
        Commands::StatusCodes => status_codes::execute(cli.format),
        Commands::Config(cmd) => config::execute(cmd, &session.config, &config_path, cli.format)?,
        Commands::Status => match session.connect().await {
            Ok(client) => {
                print_message(
                    &format!(
                        "hookbusd is running at {} (broker version {})",
                        session.socket_path().display(),
                        client.broker_version()
                    ),
                    cli.format,
                );
            }
            Err(e) => {
                print_error(&format!("{:#}", e));
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
