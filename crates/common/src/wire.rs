//! Bus wire protocol
//!
//! Newline-delimited JSON over a Unix socket. The server greets each
//! connection with its broker version, then answers one response line per
//! request line. Requests carrying an `id` may be in flight together and are
//! answered as they complete, echoing the `id`:
//!
//! ```text
//! S: {"hookbus": {"version": 3}}
//! C: {"execute": "wait", "arguments": {"name": "SAFS/Eng1Ready", "timeout_ms": 5000}, "id": 1}
//! C: {"execute": "get", "arguments": {"key": "SAFS/Eng1statuscode"}, "id": 2}
//! S: {"error": {"class": "MissingKey", "desc": "SAFS/Eng1statuscode"}, "id": 2}
//! S: {"return": null, "id": 1}
//! ```

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "execute", content = "arguments", rename_all = "kebab-case")]
pub enum BusCommand {
    Set { key: String, value: String },
    Get { key: String },
    Post { name: String },
    Pulse { name: String },
    Reset { name: String },
    Wait {
        name: String,
        /// Absent means wait indefinitely
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    ListEvents,
}

impl BusCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BusCommand::Set { .. } => "set",
            BusCommand::Get { .. } => "get",
            BusCommand::Post { .. } => "post",
            BusCommand::Pulse { .. } => "pulse",
            BusCommand::Reset { .. } => "reset",
            BusCommand::Wait { .. } => "wait",
            BusCommand::ListEvents => "list-events",
        }
    }
}

/// A request line: a command plus the optional id its response will echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRequest {
    pub id: Option<u64>,
    pub command: BusCommand,
}

impl BusRequest {
    pub fn new(id: u64, command: BusCommand) -> Self {
        Self {
            id: Some(id),
            command,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(&self.command)?;
        if let (Some(id), Value::Object(map)) = (self.id, &mut value) {
            map.insert("id".to_string(), Value::from(id));
        }
        serde_json::to_string(&value)
    }

    /// Parse one request line. When the command is unreadable the id is
    /// still returned if present, so the error can be answered in kind.
    pub fn parse(line: &str) -> std::result::Result<Self, (Option<u64>, String)> {
        let mut value: Value = serde_json::from_str(line).map_err(|e| (None, e.to_string()))?;
        let id = value
            .as_object_mut()
            .and_then(|map| map.remove("id"))
            .and_then(|id| id.as_u64());
        let command = serde_json::from_value(value).map_err(|e| (id, e.to_string()))?;
        Ok(Self { id, command })
    }
}

/// A response line: exactly one of `return` or `error` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusResponse {
    #[serde(rename = "return", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BusError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl BusResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn err(error: &Error) -> Self {
        Self {
            error: Some(BusError::from_error(error)),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: Option<u64>) -> Self {
        self.id = id;
        self
    }

    /// Unwrap into the returned value or the transported error.
    pub fn into_result(self) -> crate::Result<Value> {
        match self.error {
            Some(error) => Err(error.into_error()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusError {
    pub class: String,
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_ms: Option<u64>,
}

impl BusError {
    pub fn from_error(error: &Error) -> Self {
        let (class, desc, waited_ms) = match error {
            Error::MissingKey(key) => ("MissingKey", key.clone(), None),
            Error::Timeout { event, waited_ms } => ("Timeout", event.clone(), Some(*waited_ms)),
            Error::BrokerUnavailable(msg) => ("Unavailable", msg.clone(), None),
            other => ("GenericError", other.to_string(), None),
        };
        Self {
            class: class.to_string(),
            desc,
            waited_ms,
        }
    }

    pub fn into_error(self) -> Error {
        match self.class.as_str() {
            "MissingKey" => Error::MissingKey(self.desc),
            "Timeout" => Error::Timeout {
                event: self.desc,
                waited_ms: self.waited_ms.unwrap_or(0),
            },
            "Unavailable" => Error::BrokerUnavailable(self.desc),
            _ => Error::Protocol(format!("{}: {}", self.class, self.desc)),
        }
    }
}

/// First line sent by the server on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusGreeting {
    pub hookbus: BusVersionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusVersionInfo {
    pub version: u32,
}

impl BusGreeting {
    pub fn new(version: u32) -> Self {
        Self {
            hookbus: BusVersionInfo { version },
        }
    }
}
