//! Config Commands

use anyhow::Result;
use clap::Subcommand;
use hookbus_dispatch::DriverConfig;
use std::path::Path;

use crate::output::{print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective driver configuration
    Show,

    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(cmd: ConfigCommands, config: &DriverConfig, path: &Path, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(config)?),
            OutputFormat::Table | OutputFormat::Plain => print!("{}", toml::to_string_pretty(config)?),
        },
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.save(path)?;
            print_success(&format!("Configuration written to {}", path.display()));
        }
    }
    Ok(())
}
