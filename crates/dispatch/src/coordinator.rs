//! Driver side of the dispatch cycle
//!
//! One cycle hands a single [`TestRecord`] to one engine and reads the
//! result back:
//!
//! ```text
//! WaitReady -> Publish -> SignalDispatch -> WaitResults -> Consume -> SignalDone -> Idle
//! ```
//!
//! The record is only ever read or written while the event protocol says
//! the other side is not touching it, so no blackboard locking is needed.

use crate::config::DriverConfig;
use crate::session::SessionLocks;
use hookbus_common::{
    codec, Bus, CyclePhase, EngineIdentity, Error, EventSuffix, Result, TestRecord, WaitTimeout,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs dispatch cycles against any number of engines on one bus.
#[derive(Clone)]
pub struct DispatchCoordinator {
    bus: Arc<dyn Bus>,
    sessions: SessionLocks,
    trd_root: Option<String>,
    timeout: WaitTimeout,
}

impl DispatchCoordinator {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            sessions: SessionLocks::new(),
            trd_root: None,
            timeout: WaitTimeout::default(),
        }
    }

    pub fn from_config(bus: Arc<dyn Bus>, config: &DriverConfig) -> Self {
        let mut coordinator = Self::new(bus).with_timeout(config.timeout());
        coordinator.trd_root = config.trd_root.clone();
        coordinator
    }

    pub fn with_timeout(mut self, timeout: WaitTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep every record under one shared root instead of the engine prefix.
    pub fn with_trd_root(mut self, root: impl Into<String>) -> Self {
        self.trd_root = Some(root.into());
        self
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn timeout(&self) -> WaitTimeout {
        self.timeout
    }

    /// Blackboard root the record for `prefix` is written under.
    pub fn record_root(&self, prefix: &str) -> String {
        self.trd_root.clone().unwrap_or_else(|| prefix.to_string())
    }

    /// Whether a cycle is currently running for `prefix`.
    pub fn is_busy(&self, prefix: &str) -> bool {
        self.sessions.is_busy(&self.record_root(prefix))
    }

    /// One cycle with the configured timeout.
    pub async fn dispatch(&self, prefix: &str, record: &TestRecord) -> Result<TestRecord> {
        self.dispatch_with_timeout(prefix, record, self.timeout).await
    }

    /// One cycle against `prefix`. `timeout` bounds each of the two waits
    /// separately.
    pub async fn dispatch_with_timeout(
        &self,
        prefix: &str,
        record: &TestRecord,
        timeout: WaitTimeout,
    ) -> Result<TestRecord> {
        let root = self.record_root(prefix);
        let _session = self.sessions.acquire(&root).await;
        let engine = EngineIdentity::new(prefix);

        let result = self.run_cycle(&engine, &root, record, timeout).await;
        debug!(engine = %engine, phase = %CyclePhase::Idle, ok = result.is_ok(), "Cycle finished");
        result
    }

    async fn run_cycle(
        &self,
        engine: &EngineIdentity,
        root: &str,
        record: &TestRecord,
        timeout: WaitTimeout,
    ) -> Result<TestRecord> {
        let events = self.bus.as_events();
        let blackboard = self.bus.as_blackboard();

        debug!(engine = %engine, phase = %CyclePhase::WaitReady, "Waiting for engine");
        if events.is_posted(&engine.event(EventSuffix::Shutdown)).await? {
            return Err(Error::EngineShutdown(engine.prefix().to_string()));
        }
        if let Err(e) = events.wait(&engine.event(EventSuffix::Ready), timeout).await {
            warn!("Engine {} never became ready: {}", engine, e);
            self.release(engine).await;
            return Err(e);
        }

        debug!(engine = %engine, phase = %CyclePhase::Publish, root = root, line = record.line_number, "Publishing record");
        codec::encode(&record.fresh(), root, blackboard).await?;
        // Leftovers from an earlier cycle that failed part way
        events.reset(&engine.event(EventSuffix::Results)).await?;
        events.reset(&engine.event(EventSuffix::Done)).await?;

        debug!(engine = %engine, phase = %CyclePhase::SignalDispatch, "Signalling dispatch");
        events.post(&engine.event(EventSuffix::Dispatch)).await?;

        debug!(engine = %engine, phase = %CyclePhase::WaitResults, "Waiting for results");
        if let Err(e) = events.wait(&engine.event(EventSuffix::Results), timeout).await {
            warn!("Engine {} gave no results: {}", engine, e);
            self.release(engine).await;
            return Err(e);
        }

        debug!(engine = %engine, phase = %CyclePhase::Consume, "Reading results");
        let decoded = match codec::decode(root, blackboard).await {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Engine {} left an unreadable record: {}", engine, e);
                self.release(engine).await;
                return Err(e);
            }
        };
        events.reset(&engine.event(EventSuffix::Dispatch)).await?;

        debug!(engine = %engine, phase = %CyclePhase::SignalDone, status = %decoded.status_code, "Releasing engine");
        events.post(&engine.event(EventSuffix::Done)).await?;

        Ok(decoded)
    }

    /// Withdraw any dispatch and post Done after a failed cycle.
    /// Errors are logged only; the caller already has the cycle's error.
    async fn release(&self, engine: &EngineIdentity) {
        let events = self.bus.as_events();
        debug!(engine = %engine, phase = %CyclePhase::SignalDone, "Releasing engine after failure");
        if let Err(e) = events.reset(&engine.event(EventSuffix::Dispatch)).await {
            debug!("Could not reset {}: {}", engine.event(EventSuffix::Dispatch), e);
        }
        if let Err(e) = events.post(&engine.event(EventSuffix::Done)).await {
            debug!("Could not post {}: {}", engine.event(EventSuffix::Done), e);
        }
    }
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("broker_version", &self.bus.broker_version())
            .field("trd_root", &self.trd_root)
            .field("timeout", &self.timeout)
            .finish()
    }
}
