//! Driver configuration

use hookbus_common::{Error, WaitTimeout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for the driver side of the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Bus daemon socket
    pub socket_path: PathBuf,

    /// Shared record root (e.g. `SAFS/HOOK/`). Unset keeps each record under
    /// its engine prefix.
    pub trd_root: Option<String>,

    /// Per-wait bound in seconds; negative waits forever, zero only polls
    pub timeout_secs: i64,

    /// Engines tried in order; empty means discover them
    pub preferred_engines: Vec<String>,

    /// Force a listing format instead of the one the daemon announces
    pub broker_version: Option<u32>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            socket_path: hookbus_common::default_socket_path(),
            trd_root: None,
            timeout_secs: 300,
            preferred_engines: Vec::new(),
            broker_version: None,
        }
    }
}

impl DriverConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> hookbus_common::Result<()> {
        if matches!(self.trd_root.as_deref(), Some("")) {
            return Err(Error::InvalidConfig("trd_root must not be empty".to_string()));
        }
        if self.preferred_engines.iter().any(|e| e.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "preferred_engines contains an empty prefix".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> WaitTimeout {
        WaitTimeout::from_secs(self.timeout_secs)
    }
}
