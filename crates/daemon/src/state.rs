//! State held by the daemon

use crate::config::DaemonConfig;
use dashmap::DashMap;
use hookbus_common::wire::BusCommand;
use hookbus_common::{
    Blackboard, Bus, EventBroker, EventChannel, MemoryBus, Result, WaitTimeout,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Bus contents shared by every connection, plus connection bookkeeping.
#[derive(Clone)]
pub struct BusState {
    config: DaemonConfig,
    bus: MemoryBus,
    /// Open client connections (not persisted)
    connections: Arc<DashMap<Uuid, Connection>>,
}

/// An open client connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub connected_at: i64,
    pub commands: u64,
}

impl BusState {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            config: config.clone(),
            bus: MemoryBus::new(config.broker_version),
            connections: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn open_connection(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                connected_at: chrono::Utc::now().timestamp(),
                commands: 0,
            },
        );
        id
    }

    pub fn close_connection(&self, id: &Uuid) -> Option<Connection> {
        self.connections.remove(id).map(|(_, c)| c)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run one client command against the bus.
    pub async fn execute(&self, connection: &Uuid, command: BusCommand) -> Result<Value> {
        if let Some(mut conn) = self.connections.get_mut(connection) {
            conn.commands += 1;
        }
        debug!(connection = %connection, command = command.name(), "Executing");

        match command {
            BusCommand::Set { key, value } => {
                self.bus.set(&key, &value).await?;
                Ok(Value::Null)
            }
            BusCommand::Get { key } => Ok(Value::String(self.bus.get(&key).await?)),
            BusCommand::Post { name } => {
                self.bus.post(&name).await?;
                Ok(Value::Null)
            }
            BusCommand::Pulse { name } => {
                self.bus.pulse(&name).await?;
                Ok(Value::Null)
            }
            BusCommand::Reset { name } => {
                self.bus.reset(&name).await?;
                Ok(Value::Null)
            }
            BusCommand::Wait { name, timeout_ms } => {
                self.bus.wait(&name, WaitTimeout::from_wire(timeout_ms)).await?;
                Ok(Value::Null)
            }
            BusCommand::ListEvents => Ok(Value::String(self.bus.list_events().await?)),
        }
    }

    pub fn broker_version(&self) -> u32 {
        self.bus.broker_version()
    }
}
