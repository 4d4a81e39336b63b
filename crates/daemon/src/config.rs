//! Daemon configuration

use hookbus_common::registry::STRUCTURED_LISTING_VERSION;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Bus socket; defaults to `bus.sock` in the store directory
    pub socket_path: Option<PathBuf>,

    /// Broker version announced to clients. Below 3 the event listing is
    /// served in the older line format.
    pub broker_version: u32,

    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: hookbus_common::default_store_path(),
            socket_path: None,
            broker_version: STRUCTURED_LISTING_VERSION,
            log_json: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the bus socket path
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| self.store_path.join("bus.sock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_defaults_into_store() {
        let config = DaemonConfig {
            store_path: PathBuf::from("/var/lib/hookbus"),
            ..Default::default()
        };
        assert_eq!(config.socket_path(), PathBuf::from("/var/lib/hookbus/bus.sock"));
        assert_eq!(config.broker_version, 3);
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("daemon.toml");
        assert_eq!(DaemonConfig::load(&path).unwrap().broker_version, 3);

        let config = DaemonConfig {
            store_path: dir.path().to_path_buf(),
            socket_path: Some(dir.path().join("custom.sock")),
            broker_version: 2,
            log_json: true,
        };
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.broker_version, 2);
        assert_eq!(loaded.socket_path(), dir.path().join("custom.sock"));
        assert!(loaded.log_json);
    }
}
