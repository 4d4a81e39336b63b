//! Blackboard access
//!
//! The blackboard is a flat, deployment-wide string store. Callers namespace
//! their keys themselves (`<prefix><field>`); nothing here interprets them.

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Typed read/write access to the shared key/value store.
#[async_trait]
pub trait Blackboard: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read `key`. A key that was never set yields [`Error::MissingKey`],
    /// which is distinct from a stored empty string.
    async fn get(&self, key: &str) -> Result<String>;
}

#[async_trait]
impl<T: Blackboard + ?Sized> Blackboard for Arc<T> {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<String> {
        (**self).get(key).await
    }
}

/// In-process blackboard, cheap to clone and share between tasks.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlackboard {
    values: Arc<RwLock<HashMap<String, String>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryBlackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a key. Returns the previous value, if any.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }

    /// Snapshot of all keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .values
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Make every subsequent call fail with `BrokerUnavailable` until
    /// reconnected. Lets callers exercise the unreachable-bus path.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnavailable("blackboard is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Blackboard for MemoryBlackboard {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_online()?;
        trace!("blackboard set {} = {:?}", key, value);
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.ensure_online()?;
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }
}
