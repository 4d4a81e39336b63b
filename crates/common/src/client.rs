//! Bus client
//!
//! Async access to a `hookbusd` bus over its Unix socket. Requests carry an
//! id and are answered as they complete, so one client can be shared by any
//! number of concurrent dispatch sessions: a blocking `wait` on one engine
//! does not hold up traffic for another.

use crate::blackboard::Blackboard;
use crate::event::{EventBroker, EventChannel, WaitTimeout};
use crate::registry::ListingFormat;
use crate::wire::{BusCommand, BusGreeting, BusRequest, BusResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Requests awaiting their response, by id
#[derive(Default)]
struct Inflight {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<BusResponse>>,
}

type Pending = Arc<Mutex<Inflight>>;

/// Fail every outstanding request and refuse new ones.
fn shut(pending: &Pending) {
    let mut inflight = pending.lock();
    inflight.closed = true;
    inflight.waiters.clear();
}

/// Removes its request from the pending table when the caller is done with
/// it, including when the caller gives up before the response arrives.
struct Ticket {
    pending: Pending,
    id: u64,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.pending.lock().waiters.remove(&self.id);
    }
}

/// One open socket, served by a writer task and a response router.
struct Connection {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Pending,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        shut(&self.pending);
    }
}

/// Client for a bus hosted by `hookbusd`
pub struct BusClient {
    socket_path: String,
    connection: Mutex<Option<Connection>>,
    version: AtomicU32,
    next_id: AtomicU64,
}

impl BusClient {
    /// Create a new bus client (does not connect)
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connection: Mutex::new(None),
            version: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect and read the server greeting
    pub async fn connect(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::BrokerUnavailable(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let (read_half, write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let line = lines.next_line().await?.ok_or_else(|| {
            Error::BrokerUnavailable(format!("{} closed before greeting", self.socket_path))
        })?;
        trace!("Bus greeting: {}", line.trim());

        let greeting: BusGreeting = serde_json::from_str(&line)
            .map_err(|e| Error::Protocol(format!("Invalid greeting: {}", e)))?;
        self.version.store(greeting.hookbus.version, Ordering::SeqCst);

        let pending = Pending::default();
        let (outgoing, requests) = mpsc::unbounded_channel();
        let connection = Connection {
            outgoing,
            pending: pending.clone(),
            reader: tokio::spawn(route_responses(lines, pending.clone())),
            writer: tokio::spawn(write_requests(write_half, requests, pending)),
        };
        *self.connection.lock() = Some(connection);

        debug!(
            "Connected to bus at {} (broker version {})",
            self.socket_path, greeting.hookbus.version
        );
        Ok(())
    }

    /// Connect to a running bus in one step
    pub async fn open(socket_path: impl Into<String>) -> Result<Self> {
        let client = Self::new(socket_path);
        client.connect().await?;
        Ok(client)
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().as_ref().map_or(false, Connection::is_open)
    }

    /// Broker version announced in the greeting, 0 before connecting
    pub fn broker_version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Listing format implied by the broker version
    pub fn listing_format(&self) -> ListingFormat {
        ListingFormat::for_broker_version(self.broker_version())
    }

    /// Execute one bus command
    pub async fn execute(&self, command: BusCommand) -> Result<Value> {
        let name = command.name();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = BusRequest::new(id, command).to_json()?;
        let (tx, rx) = oneshot::channel();

        let _ticket = {
            let guard = self.connection.lock();
            let connection = guard
                .as_ref()
                .ok_or_else(|| Error::BrokerUnavailable("Not connected".to_string()))?;

            {
                let mut inflight = connection.pending.lock();
                if inflight.closed {
                    return Err(Error::BrokerUnavailable(format!(
                        "Bus connection closed before {}",
                        name
                    )));
                }
                inflight.waiters.insert(id, tx);
            }
            let ticket = Ticket {
                pending: connection.pending.clone(),
                id,
            };

            trace!("Bus command: {}", line);
            connection.outgoing.send(line).map_err(|_| {
                Error::BrokerUnavailable(format!("Bus connection closed before {}", name))
            })?;
            ticket
        };

        let response = rx.await.map_err(|_| {
            Error::BrokerUnavailable(format!("Bus closed the connection during {}", name))
        })?;
        response.into_result()
    }

    async fn execute_void(&self, command: BusCommand) -> Result<()> {
        self.execute(command).await.map(|_| ())
    }

    /// Close the connection. Requests still in flight fail with
    /// `BrokerUnavailable`.
    pub async fn close(&self) {
        let closed = self.connection.lock().take();
        drop(closed);
    }
}

async fn write_requests(
    mut writer: OwnedWriteHalf,
    mut requests: mpsc::UnboundedReceiver<String>,
    pending: Pending,
) {
    while let Some(line) = requests.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            debug!("Bus write failed: {}", e);
            break;
        }
    }
    shut(&pending);
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn route_responses(mut lines: Lines<BufReader<OwnedReadHalf>>, pending: Pending) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Bus closed the connection");
                break;
            }
            Err(e) => {
                debug!("Bus read failed: {}", e);
                break;
            }
        };
        trace!("Bus response: {}", line.trim());

        let response: BusResponse = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                debug!("Ignoring invalid response {:?}: {}", line.trim(), e);
                continue;
            }
        };

        let waiter = response.id.and_then(|id| pending.lock().waiters.remove(&id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Dropping response to abandoned request {:?}", response.id),
        }
    }
    shut(&pending);
}

#[async_trait]
impl Blackboard for BusClient {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.execute_void(BusCommand::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<String> {
        match self.execute(BusCommand::Get { key: key.to_string() }).await? {
            Value::String(s) => Ok(s),
            other => Err(Error::Protocol(format!("get {} returned {}", key, other))),
        }
    }
}

#[async_trait]
impl EventChannel for BusClient {
    async fn post(&self, name: &str) -> Result<()> {
        self.execute_void(BusCommand::Post { name: name.to_string() }).await
    }

    async fn pulse(&self, name: &str) -> Result<()> {
        self.execute_void(BusCommand::Pulse { name: name.to_string() }).await
    }

    async fn wait(&self, name: &str, timeout: WaitTimeout) -> Result<()> {
        self.execute_void(BusCommand::Wait {
            name: name.to_string(),
            timeout_ms: timeout.as_millis(),
        })
        .await
    }

    async fn reset(&self, name: &str) -> Result<()> {
        self.execute_void(BusCommand::Reset { name: name.to_string() }).await
    }
}

#[async_trait]
impl EventBroker for BusClient {
    async fn list_events(&self) -> Result<String> {
        match self.execute(BusCommand::ListEvents).await? {
            Value::String(s) => Ok(s),
            other => Err(Error::Protocol(format!("list-events returned {}", other))),
        }
    }
}

/// Connect to a bus whose socket may not exist yet
pub async fn wait_for_bus(socket_path: &Path, timeout_secs: u64) -> Result<BusClient> {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::BrokerUnavailable(format!(
                "no bus at {} after {}s",
                socket_path.display(),
                timeout_secs
            )));
        }

        if socket_path.exists() {
            let client = BusClient::new(socket_path.to_string_lossy().to_string());
            match client.connect().await {
                Ok(_) => return Ok(client),
                Err(e) => {
                    trace!("Bus not ready: {}", e);
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
