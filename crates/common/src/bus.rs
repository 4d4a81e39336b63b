//! The host automation bus as one handle
//!
//! Dispatch needs the blackboard and the events together, discovery needs the
//! broker listing. [`Bus`] bundles the three so a single `Arc<dyn Bus>` can be
//! handed to everything in a driver session.

use crate::blackboard::{Blackboard, MemoryBlackboard};
use crate::event::{EventBroker, EventChannel, MemoryEvents, WaitTimeout};
use crate::registry::{ListingFormat, STRUCTURED_LISTING_VERSION};
use crate::Result;
use async_trait::async_trait;

/// Blackboard, event channel and broker listing of one deployment.
pub trait Bus: Blackboard + EventChannel + EventBroker {
    /// Version of the broker wire protocol, which fixes the listing format.
    fn broker_version(&self) -> u32;

    fn as_blackboard(&self) -> &dyn Blackboard;

    fn as_events(&self) -> &dyn EventChannel;

    fn as_broker(&self) -> &dyn EventBroker;
}

impl Bus for crate::client::BusClient {
    fn broker_version(&self) -> u32 {
        crate::client::BusClient::broker_version(self)
    }

    fn as_blackboard(&self) -> &dyn Blackboard {
        self
    }

    fn as_events(&self) -> &dyn EventChannel {
        self
    }

    fn as_broker(&self) -> &dyn EventBroker {
        self
    }
}

/// Whole bus held in process memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    pub blackboard: MemoryBlackboard,
    pub events: MemoryEvents,
    version: u32,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(STRUCTURED_LISTING_VERSION)
    }
}

impl MemoryBus {
    pub fn new(version: u32) -> Self {
        Self {
            blackboard: MemoryBlackboard::new(),
            events: MemoryEvents::new(),
            version,
        }
    }

    pub fn listing_format(&self) -> ListingFormat {
        ListingFormat::for_broker_version(self.version)
    }

    /// Take the whole bus offline (or back online).
    pub fn set_offline(&self, offline: bool) {
        self.blackboard.set_offline(offline);
        self.events.set_offline(offline);
    }
}

impl Bus for MemoryBus {
    fn broker_version(&self) -> u32 {
        self.version
    }

    fn as_blackboard(&self) -> &dyn Blackboard {
        &self.blackboard
    }

    fn as_events(&self) -> &dyn EventChannel {
        &self.events
    }

    fn as_broker(&self) -> &dyn EventBroker {
        self
    }
}

#[async_trait]
impl Blackboard for MemoryBus {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.blackboard.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.blackboard.get(key).await
    }
}

#[async_trait]
impl EventChannel for MemoryBus {
    async fn post(&self, name: &str) -> Result<()> {
        self.events.post(name).await
    }

    async fn pulse(&self, name: &str) -> Result<()> {
        self.events.pulse(name).await
    }

    async fn wait(&self, name: &str, timeout: WaitTimeout) -> Result<()> {
        self.events.wait(name, timeout).await
    }

    async fn reset(&self, name: &str) -> Result<()> {
        self.events.reset(name).await
    }
}

#[async_trait]
impl EventBroker for MemoryBus {
    async fn list_events(&self) -> Result<String> {
        self.events.ensure_online()?;
        Ok(self.events.listing(self.listing_format()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EngineRegistry;

    #[tokio::test]
    async fn test_listing_follows_version() {
        for version in [2, 3] {
            let bus = MemoryBus::new(version);
            bus.post("SAFS/Eng1Ready").await.unwrap();
            bus.post("SAFS/Eng2Running").await.unwrap();
            bus.post("SAFS/Eng2Shutdown").await.unwrap();

            let registry = EngineRegistry::for_broker_version(bus.broker_version());
            let found = registry.discover(bus.as_broker()).await.unwrap();
            assert_eq!(found.prefixes(), vec!["SAFS/Eng1"], "version {}", version);
        }
    }

    #[tokio::test]
    async fn test_offline_bus() {
        let bus = MemoryBus::default();
        bus.set_offline(true);
        assert!(bus.post("E").await.is_err());
        assert!(bus.get("k").await.is_err());
    }
}
