//! Per-engine session locks
//!
//! At most one dispatch cycle may be in flight for a given record root.
//! Cycles against different roots proceed independently.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Held for the duration of one cycle; dropping it lets the next one start.
pub type SessionGuard = OwnedMutexGuard<()>;

#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until no other cycle holds `key`, then hold it.
    pub async fn acquire(&self, key: &str) -> SessionGuard {
        let lock = self.lock_for(key);
        if lock.try_lock().is_err() {
            trace!("Session {} busy, queueing", key);
        }
        lock.lock_owned().await
    }

    /// Hold `key` only if it is free right now.
    pub fn try_acquire(&self, key: &str) -> Option<SessionGuard> {
        self.lock_for(key).try_lock_owned().ok()
    }

    pub fn is_busy(&self, key: &str) -> bool {
        match self.locks.get(key) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }
}
