//! hookbus Common Library
//!
//! Record model, blackboard and event abstractions, the record codec and
//! engine discovery shared by the hookbus driver, daemon and CLI.

pub mod blackboard;
pub mod bus;
pub mod client;
pub mod codec;
pub mod error;
pub mod event;
pub mod registry;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use blackboard::{Blackboard, MemoryBlackboard};
pub use bus::{Bus, MemoryBus};
pub use client::BusClient;
pub use error::{Error, Result};
pub use event::{EventBroker, EventChannel, MemoryEvents, WaitTimeout};
pub use registry::{DiscoveredEngines, EngineRegistry, ListingFormat};
pub use types::*;

/// hookbus version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default state directory
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".hookbus")
}

/// Default socket path for the bus daemon
pub fn default_socket_path() -> std::path::PathBuf {
    default_store_path().join("bus.sock")
}

/// Default daemon configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Default driver configuration file path, read by the CLI
pub fn default_driver_config_path() -> std::path::PathBuf {
    default_store_path().join("driver.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_and_driver_configs_are_separate_files() {
        assert_ne!(default_config_path(), default_driver_config_path());
        assert_eq!(default_driver_config_path().parent(), Some(default_store_path().as_path()));
    }
}
