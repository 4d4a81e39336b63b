//! Engine fallback
//!
//! A step is offered to candidate engines one at a time until one of them
//! actually handles it. An engine that answers `NOT_EXECUTED`, or that fails
//! on its own (timeout, unreadable record, shutting down), passes the step
//! on; anything else ends the chain.

use crate::coordinator::DispatchCoordinator;
use hookbus_common::{
    EngineDiagnostic, EngineRegistry, Error, Result, StatusCode, StepVerdict, TestRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Appended to `status_info` while further candidates remain.
pub const MORE_ENGINES: &str = "MORE_ENGINES";

/// Which engines to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// These prefixes, in this order
    Explicit(Vec<String>),
    /// Every engine currently discoverable on the bus, in prefix order
    Discover,
}

impl Candidates {
    /// Preferred engines from configuration; none means discovery.
    pub fn from_preferences(preferred: &[String]) -> Self {
        if preferred.is_empty() {
            Candidates::Discover
        } else {
            Candidates::Explicit(preferred.to_vec())
        }
    }
}

/// Result of a fallback run that obtained at least one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Last record obtained
    pub record: TestRecord,
    /// Engine that produced `record`
    pub engine: String,
    /// Cycles attempted, failed ones included
    pub cycles: usize,
    pub diagnostics: Vec<EngineDiagnostic>,
}

impl DispatchOutcome {
    pub fn status_code(&self) -> StatusCode {
        self.record.status_code
    }

    pub fn verdict(&self) -> StepVerdict {
        self.record.status_code.verdict()
    }

    /// Whether any engine took the step.
    pub fn handled(&self) -> bool {
        !self.record.status_code.advances_fallback()
    }
}

/// Tries candidates through one coordinator.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    coordinator: DispatchCoordinator,
    registry: EngineRegistry,
}

impl FallbackPolicy {
    pub fn new(coordinator: DispatchCoordinator) -> Self {
        let registry = EngineRegistry::for_broker_version(coordinator.bus().broker_version());
        Self {
            coordinator,
            registry,
        }
    }

    pub fn with_registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn coordinator(&self) -> &DispatchCoordinator {
        &self.coordinator
    }

    async fn resolve(&self, candidates: Candidates) -> Result<Vec<String>> {
        match candidates {
            Candidates::Explicit(prefixes) => Ok(prefixes),
            Candidates::Discover => {
                let found = self.registry.discover(self.coordinator.bus().as_broker()).await?;
                debug!("Discovered {} engine(s): {:?}", found.len(), found.prefixes());
                Ok(found.prefixes())
            }
        }
    }

    /// Offer `template` to each candidate in turn.
    pub async fn run(&self, candidates: Candidates, template: &TestRecord) -> Result<DispatchOutcome> {
        let prefixes = self.resolve(candidates).await?;
        let mut diagnostics = Vec::new();
        let mut last: Option<(String, TestRecord)> = None;
        let mut cycles = 0;

        for (index, prefix) in prefixes.iter().enumerate() {
            let mut record = template.fresh();
            if index + 1 < prefixes.len() {
                record.status_info = tag_more_engines(&record.status_info);
            }

            cycles += 1;
            match self.coordinator.dispatch(prefix, &record).await {
                Ok(result) => {
                    let status = result.status_code;
                    last = Some((prefix.clone(), result));
                    if !status.advances_fallback() {
                        info!("Engine {} handled line {} with {}", prefix, template.line_number, status);
                        break;
                    }
                    debug!("Engine {} did not execute line {}", prefix, template.line_number);
                }
                Err(e) if e.is_engine_local() => {
                    warn!("Skipping engine {}: {}", prefix, e);
                    diagnostics.push(EngineDiagnostic::new(prefix.clone(), &e));
                }
                Err(e) => return Err(e),
            }
        }

        match last {
            Some((engine, record)) => Ok(DispatchOutcome {
                record,
                engine,
                cycles,
                diagnostics,
            }),
            None => Err(Error::NoEngineReachable {
                attempted: prefixes,
                diagnostics,
            }),
        }
    }
}

fn tag_more_engines(status_info: &str) -> String {
    if status_info.ends_with(MORE_ENGINES) {
        status_info.to_string()
    } else {
        format!("{} {}", status_info, MORE_ENGINES)
    }
}
