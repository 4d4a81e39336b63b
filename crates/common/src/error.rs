//! Error types for hookbus

use crate::types::EngineDiagnostic;
use thiserror::Error;

/// Result type alias using hookbus Error
pub type Result<T> = std::result::Result<T, Error>;

/// hookbus error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {waited_ms}ms waiting for event {event}")]
    Timeout { event: String, waited_ms: u64 },

    #[error("Malformed field {key}: {value:?} is not an integer")]
    MalformedField { key: String, value: String },

    #[error("Blackboard key not found: {0}")]
    MissingKey(String),

    #[error("Bus unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Engine {0} has posted Shutdown")]
    EngineShutdown(String),

    #[error("Bus protocol error: {0}")]
    Protocol(String),

    #[error("No engine could be reached ({} attempted)", attempted.len())]
    NoEngineReachable {
        attempted: Vec<String>,
        diagnostics: Vec<EngineDiagnostic>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Errors that end the attempt on one engine but leave the fallback
    /// chain free to try the next candidate.
    pub fn is_engine_local(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::MalformedField { .. }
                | Error::MissingKey(_)
                | Error::EngineShutdown(_)
        )
    }

    /// Short, stable name of the error kind for diagnostics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "Io",
            Error::Serialization(_) => "Serialization",
            Error::Timeout { .. } => "Timeout",
            Error::MalformedField { .. } => "MalformedField",
            Error::MissingKey(_) => "MissingKey",
            Error::BrokerUnavailable(_) => "BrokerUnavailable",
            Error::EngineShutdown(_) => "EngineShutdown",
            Error::Protocol(_) => "Protocol",
            Error::NoEngineReachable { .. } => "NoEngineReachable",
            Error::InvalidConfig(_) => "InvalidConfig",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_local_classification() {
        let timeout = Error::Timeout {
            event: "SAFS/Eng1Results".to_string(),
            waited_ms: 1000,
        };
        assert!(timeout.is_engine_local());
        assert!(Error::MalformedField {
            key: "k".to_string(),
            value: "abc".to_string()
        }
        .is_engine_local());
        assert!(!Error::BrokerUnavailable("gone".to_string()).is_engine_local());
        assert_eq!(timeout.kind(), "Timeout");
    }

    #[test]
    fn test_display() {
        let err = Error::MalformedField {
            key: "SAFS/HOOK/statuscode".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed field SAFS/HOOK/statuscode: \"abc\" is not an integer"
        );
    }
}
