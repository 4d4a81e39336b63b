//! In-process engine emulator
//!
//! [`LoopbackEngine`] plays the engine side of the event protocol on any
//! [`Bus`], so driver code can be exercised without a real automation
//! engine attached.

use hookbus_common::codec::{self, KEY_STATUSCODE};
use hookbus_common::{
    event::reset_hook_events, Bus, EngineIdentity, Error, EventSuffix, Result, StatusCode,
    WaitTimeout,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How the emulated engine answers each dispatched record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Write this status code back
    Respond(StatusCode),
    /// Take the record and never post Results
    Hang,
    /// Post Results with a non-numeric status code
    Corrupt,
}

#[derive(Clone)]
pub struct LoopbackEngine {
    bus: Arc<dyn Bus>,
    engine: EngineIdentity,
    root: String,
    behavior: Behavior,
    delay: Duration,
    done_timeout: WaitTimeout,
}

impl LoopbackEngine {
    /// An engine at `prefix` that passes every step.
    pub fn new(bus: Arc<dyn Bus>, prefix: impl Into<String>) -> Self {
        let engine = EngineIdentity::new(prefix);
        Self {
            bus,
            root: engine.prefix().to_string(),
            engine,
            behavior: Behavior::Respond(StatusCode::NO_SCRIPT_FAILURE),
            delay: Duration::ZERO,
            done_timeout: WaitTimeout::After(Duration::from_secs(12)),
        }
    }

    /// Read and write records under a shared root.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn responding(mut self, status: StatusCode) -> Self {
        self.behavior = Behavior::Respond(status);
        self
    }

    /// Answer `NOT_EXECUTED` to everything.
    pub fn declining(self) -> Self {
        self.responding(StatusCode::NOT_EXECUTED)
    }

    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    pub fn corrupting(mut self) -> Self {
        self.behavior = Behavior::Corrupt;
        self
    }

    /// Time spent "executing" each step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn spawn(self) -> LoopbackHandle {
        let cycles = Arc::new(AtomicUsize::new(0));
        let bus = self.bus.clone();
        let engine = self.engine.clone();
        let counter = cycles.clone();
        let task = tokio::spawn(async move {
            let prefix = self.engine.clone();
            let result = self.serve(counter).await;
            if let Err(e) = &result {
                warn!("Loopback engine {} stopped: {}", prefix, e);
            }
            result
        });
        LoopbackHandle {
            bus,
            engine,
            cycles,
            task,
        }
    }

    async fn serve(self, cycles: Arc<AtomicUsize>) -> Result<()> {
        let events = self.bus.as_events();
        let blackboard = self.bus.as_blackboard();
        let event = |suffix: EventSuffix| self.engine.event(suffix);

        events.post(&event(EventSuffix::Ready)).await?;
        loop {
            events.wait(&event(EventSuffix::Dispatch), WaitTimeout::Indefinite).await?;
            events.reset(&event(EventSuffix::Ready)).await?;
            events.post(&event(EventSuffix::Running)).await?;
            let cycle = cycles.fetch_add(1, Ordering::SeqCst) + 1;

            let mut record = codec::decode(&self.root, blackboard).await?;
            debug!("{} cycle {}: {:?}", self.engine, cycle, record.input_record);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match &self.behavior {
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::Corrupt => {
                    let key = format!("{}{}", self.root, KEY_STATUSCODE);
                    blackboard.set(&key, "abc").await?;
                }
                Behavior::Respond(status) => {
                    record.status_code = *status;
                    record.status_info = format!("{} by {}", status, self.engine);
                    codec::encode(&record, &self.root, blackboard).await?;
                }
            }

            events.reset(&event(EventSuffix::Running)).await?;
            events.post(&event(EventSuffix::Results)).await?;

            match events.wait(&event(EventSuffix::Done), self.done_timeout).await {
                Ok(()) => {}
                Err(Error::Timeout { .. }) => debug!("{} never saw Done", self.engine),
                Err(e) => return Err(e),
            }
            events.reset(&event(EventSuffix::Done)).await?;
            events.reset(&event(EventSuffix::Results)).await?;
            events.post(&event(EventSuffix::Ready)).await?;
        }
    }
}

/// Running [`LoopbackEngine`]. Dropping it stops the engine.
pub struct LoopbackHandle {
    bus: Arc<dyn Bus>,
    engine: EngineIdentity,
    cycles: Arc<AtomicUsize>,
    task: JoinHandle<Result<()>>,
}

impl LoopbackHandle {
    pub fn prefix(&self) -> &str {
        self.engine.prefix()
    }

    /// Records this engine has picked up so far.
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Stop serving and announce Shutdown the way a terminating engine does.
    pub async fn shutdown(self) -> Result<()> {
        self.task.abort();
        reset_hook_events(self.bus.as_events(), self.engine.prefix()).await?;
        self.bus.as_events().post(&self.engine.event(EventSuffix::Shutdown)).await
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
