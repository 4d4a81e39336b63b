//! Named events
//!
//! Events are binary signals used purely for synchronisation: they carry no
//! payload. A posted event stays posted until reset; a pulse wakes whoever is
//! waiting right now and leaves the event reset.

use crate::registry::ListingFormat;
use crate::types::{EventRecord, EventState, EventSuffix};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Bound on a single [`EventChannel::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Block until posted.
    Indefinite,
    /// Check once and return immediately.
    Poll,
    After(Duration),
}

impl WaitTimeout {
    /// Negative seconds wait forever, zero polls.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => WaitTimeout::Indefinite,
            0 => WaitTimeout::Poll,
            s => WaitTimeout::After(Duration::from_secs(s as u64)),
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => WaitTimeout::Indefinite,
            0 => WaitTimeout::Poll,
            m => WaitTimeout::After(Duration::from_millis(m as u64)),
        }
    }

    /// Milliseconds for the wire, `None` meaning no bound.
    pub fn as_millis(self) -> Option<u64> {
        match self {
            WaitTimeout::Indefinite => None,
            WaitTimeout::Poll => Some(0),
            WaitTimeout::After(d) => Some(d.as_millis() as u64),
        }
    }

    pub fn from_wire(millis: Option<u64>) -> Self {
        match millis {
            None => WaitTimeout::Indefinite,
            Some(0) => WaitTimeout::Poll,
            Some(m) => WaitTimeout::After(Duration::from_millis(m)),
        }
    }
}

impl Default for WaitTimeout {
    fn default() -> Self {
        WaitTimeout::After(Duration::from_secs(300))
    }
}

/// Post/pulse, wait-with-timeout, reset on named events.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Latch the event and wake every current waiter.
    async fn post(&self, name: &str) -> Result<()>;

    /// Wake every current waiter without latching.
    async fn pulse(&self, name: &str) -> Result<()>;

    /// Block until the event is posted or `timeout` expires
    /// ([`Error::Timeout`]).
    async fn wait(&self, name: &str, timeout: WaitTimeout) -> Result<()>;

    /// Clear a latched post.
    async fn reset(&self, name: &str) -> Result<()>;

    /// Whether the event is currently posted.
    async fn is_posted(&self, name: &str) -> Result<bool> {
        match self.wait(name, WaitTimeout::Poll).await {
            Ok(()) => Ok(true),
            Err(Error::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// The broker's "list all events" query.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Raw listing in the broker's wire format.
    async fn list_events(&self) -> Result<String>;
}

#[async_trait]
impl<T: EventChannel + ?Sized> EventChannel for Arc<T> {
    async fn post(&self, name: &str) -> Result<()> {
        (**self).post(name).await
    }

    async fn pulse(&self, name: &str) -> Result<()> {
        (**self).pulse(name).await
    }

    async fn wait(&self, name: &str, timeout: WaitTimeout) -> Result<()> {
        (**self).wait(name, timeout).await
    }

    async fn reset(&self, name: &str) -> Result<()> {
        (**self).reset(name).await
    }
}

#[async_trait]
impl<T: EventBroker + ?Sized> EventBroker for Arc<T> {
    async fn list_events(&self) -> Result<String> {
        (**self).list_events().await
    }
}

/// Reset every hook event (Ready, Dispatch, Running, Results, Done,
/// Shutdown) of one engine. An engine shutting down posts Shutdown after this.
pub async fn reset_hook_events(events: &dyn EventChannel, prefix: &str) -> Result<()> {
    debug!("Resetting all hook events for {}", prefix);
    for suffix in EventSuffix::HOOK_EVENTS {
        events.reset(&suffix.event_name(prefix)).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct Signal {
    posted: bool,
    pulses: u64,
}

#[derive(Debug)]
struct EventSlot {
    signal: watch::Sender<Signal>,
    waiters: AtomicU32,
}

impl EventSlot {
    fn new() -> Self {
        let (signal, _) = watch::channel(Signal::default());
        Self {
            signal,
            waiters: AtomicU32::new(0),
        }
    }
}

struct WaiterGuard<'a>(&'a AtomicU32);

impl<'a> WaiterGuard<'a> {
    fn enter(count: &'a AtomicU32) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process event table. Events spring into existence, reset, on first use.
#[derive(Debug, Clone, Default)]
pub struct MemoryEvents {
    slots: Arc<Mutex<HashMap<String, Arc<EventSlot>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Arc<EventSlot> {
        self.slots
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(EventSlot::new()))
            .clone()
    }

    pub(crate) fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnavailable("event service is offline".to_string()));
        }
        Ok(())
    }

    /// See [`crate::blackboard::MemoryBlackboard::set_offline`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Current state of every known event, sorted by name.
    pub fn records(&self) -> Vec<EventRecord> {
        let slots = self.slots.lock();
        let mut records: Vec<EventRecord> = slots
            .iter()
            .map(|(name, slot)| {
                let state = if slot.signal.borrow().posted {
                    EventState::Posted
                } else {
                    EventState::Reset
                };
                EventRecord::new(name.clone(), state, slot.waiters.load(Ordering::SeqCst))
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Render [`Self::records`] the way a broker of the given format would.
    pub fn listing(&self, format: ListingFormat) -> String {
        format.render(&self.records())
    }
}

#[async_trait]
impl EventChannel for MemoryEvents {
    async fn post(&self, name: &str) -> Result<()> {
        self.ensure_online()?;
        trace!("post {}", name);
        self.slot(name).signal.send_modify(|s| s.posted = true);
        Ok(())
    }

    async fn pulse(&self, name: &str) -> Result<()> {
        self.ensure_online()?;
        trace!("pulse {}", name);
        self.slot(name).signal.send_modify(|s| {
            s.posted = false;
            s.pulses += 1;
        });
        Ok(())
    }

    async fn wait(&self, name: &str, timeout: WaitTimeout) -> Result<()> {
        self.ensure_online()?;
        let slot = self.slot(name);
        let mut rx = slot.signal.subscribe();
        let seen = *rx.borrow_and_update();
        if seen.posted {
            return Ok(());
        }

        let started = Instant::now();
        let timed_out = |started: Instant| Error::Timeout {
            event: name.to_string(),
            waited_ms: started.elapsed().as_millis() as u64,
        };
        if timeout == WaitTimeout::Poll {
            return Err(timed_out(started));
        }

        let _waiting = WaiterGuard::enter(&slot.waiters);
        let woken = rx.wait_for(|s| s.posted || s.pulses > seen.pulses);

        let result = match timeout {
            WaitTimeout::Poll | WaitTimeout::Indefinite => woken.await.map(|_| ()),
            WaitTimeout::After(limit) => match tokio::time::timeout(limit, woken).await {
                Ok(r) => r.map(|_| ()),
                Err(_) => return Err(timed_out(started)),
            },
        };

        result.map_err(|_| Error::BrokerUnavailable(format!("event {} was dropped", name)))
    }

    async fn reset(&self, name: &str) -> Result<()> {
        self.ensure_online()?;
        trace!("reset {}", name);
        self.slot(name).signal.send_modify(|s| s.posted = false);
        Ok(())
    }
}
