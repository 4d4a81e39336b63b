//! Bus connection for CLI commands

use anyhow::{Context, Result};
use hookbus_common::{BusClient, EngineRegistry};
use hookbus_dispatch::DriverConfig;
use std::path::Path;

/// Connection settings shared by every command
#[derive(Debug, Clone)]
pub struct Session {
    pub config: DriverConfig,
}

impl Session {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Open a fresh connection to the daemon.
    pub async fn connect(&self) -> Result<BusClient> {
        let path = self.socket_path().to_string_lossy().to_string();
        BusClient::open(path.clone())
            .await
            .with_context(|| format!("cannot reach hookbusd at {} (is it running?)", path))
    }

    /// Registry matching the daemon's listing format unless configured otherwise.
    pub fn registry(&self, client: &BusClient) -> EngineRegistry {
        EngineRegistry::for_broker_version(
            self.config.broker_version.unwrap_or_else(|| client.broker_version()),
        )
    }
}
