//! Engine discovery
//!
//! Engines announce themselves only through their events. Discovery asks the
//! broker for its complete event listing, splits each event name into an
//! engine prefix and a protocol suffix, and keeps the prefixes whose Ready or
//! Running event is posted and whose Shutdown event is not.
//!
//! Brokers render the listing in one of two wire formats:
//!
//! ```text
//! line (version < 3)                      structured (version >= 3)
//! SAFS/RobotJDispatch: Reset - 1 waiter(s) [{"name": "SAFS/RobotJDispatch",
//! SAFS/RobotJReady: Posted                   "state": "Reset", "waiters": 1}, ...]
//! ```
//!
//! Both yield the same [`EventRecord`] sequence and therefore the same
//! discovered set.

use crate::event::EventBroker;
use crate::types::{EngineIdentity, EventRecord, EventState, EventSuffix};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// First broker version that answers the listing query with structured records.
pub const STRUCTURED_LISTING_VERSION: u32 = 3;

/// Wire format of the broker's event listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingFormat {
    /// One `"<name>: <state> - <N> waiter(s)"` line per event
    Line,
    /// JSON list of `{name, state, waiters}` maps
    Structured,
}

impl ListingFormat {
    pub fn for_broker_version(version: u32) -> Self {
        if version < STRUCTURED_LISTING_VERSION {
            ListingFormat::Line
        } else {
            ListingFormat::Structured
        }
    }

    /// Parse a raw listing. Entries that cannot be understood are skipped.
    pub fn parse(self, listing: &str) -> Result<Vec<EventRecord>> {
        match self {
            ListingFormat::Line => Ok(parse_lines(listing)),
            ListingFormat::Structured => parse_structured(listing),
        }
    }

    pub fn render(self, records: &[EventRecord]) -> String {
        match self {
            ListingFormat::Line => records
                .iter()
                .map(|r| format!("{}: {} - {} waiter(s)", r.name, r.state, r.waiters))
                .collect::<Vec<_>>()
                .join("\n"),
            ListingFormat::Structured => {
                let list: Vec<Value> = records
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "name": r.name,
                            "state": r.state.to_string(),
                            "waiters": r.waiters,
                        })
                    })
                    .collect();
                Value::Array(list).to_string()
            }
        }
    }
}

fn parse_lines(listing: &str) -> Vec<EventRecord> {
    let mut records = Vec::new();

    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((name, rest)) = line.split_once(':') else {
            debug!("Skipping unrecognized event line {:?}", line);
            continue;
        };
        let name = name.trim();
        let (state, waiters) = match rest.split_once('-') {
            Some((state, waiters)) => (state, Some(waiters)),
            None => (rest, None),
        };

        let Some(state) = EventState::parse(state) else {
            debug!("Skipping event line with unknown state {:?}", line);
            continue;
        };
        if name.is_empty() {
            debug!("Skipping event line without a name {:?}", line);
            continue;
        }

        let waiters = waiters
            .and_then(|w| w.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        records.push(EventRecord::new(name, state, waiters));
    }

    records
}

fn parse_structured(listing: &str) -> Result<Vec<EventRecord>> {
    let root: Value = serde_json::from_str(listing)?;
    let Value::Array(entries) = root else {
        return Err(Error::Protocol(format!(
            "structured event listing is not a list: {}",
            listing.chars().take(80).collect::<String>()
        )));
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let map = match entry {
            Value::Object(map) => map,
            other => {
                debug!("Skipping non-map event entry {}", other);
                continue;
            }
        };
        // Broker versions disagree on key case
        let fields: BTreeMap<String, Value> = map
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        let name = fields.get("name").and_then(Value::as_str).map(str::trim);
        let state = fields
            .get("state")
            .and_then(Value::as_str)
            .and_then(EventState::parse);
        let (Some(name), Some(state)) = (name, state) else {
            debug!("Skipping incomplete event entry {:?}", fields);
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let waiters = match fields.get("waiters") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };

        records.push(EventRecord::new(name, state, waiters));
    }

    Ok(records)
}

/// Result of one discovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEngines {
    reachable: BTreeSet<EngineIdentity>,
    excluded: BTreeSet<EngineIdentity>,
}

impl DiscoveredEngines {
    pub fn contains(&self, prefix: &str) -> bool {
        self.reachable.contains(&EngineIdentity::new(prefix))
    }

    pub fn is_excluded(&self, prefix: &str) -> bool {
        self.excluded.contains(&EngineIdentity::new(prefix))
    }

    /// Reachable engines in stable (lexicographic) order.
    pub fn iter(&self) -> impl Iterator<Item = &EngineIdentity> {
        self.reachable.iter()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.reachable.iter().map(|e| e.prefix().to_string()).collect()
    }

    /// Engines whose Shutdown event was posted.
    pub fn excluded(&self) -> impl Iterator<Item = &EngineIdentity> {
        self.excluded.iter()
    }

    pub fn len(&self) -> usize {
        self.reachable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reachable.is_empty()
    }

    /// Every classified prefix mapped to whether it is reachable.
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.excluded
            .iter()
            .map(|e| (e.prefix().to_string(), false))
            .chain(self.reachable.iter().map(|e| (e.prefix().to_string(), true)))
            .collect()
    }
}

/// Derive the reachable engine set from a parsed listing.
///
/// A posted Ready or Running classifies its prefix as reachable; once
/// classified, later liveness records for that prefix are ignored. A posted
/// Shutdown excludes the prefix for the rest of the scan and withdraws it
/// from the reachable set, whichever order the records arrive in.
pub fn classify(records: &[EventRecord]) -> DiscoveredEngines {
    let mut found = DiscoveredEngines::default();

    for record in records {
        let Some((engine, suffix)) = record.split_engine() else {
            debug!("Ignoring event {} with no engine suffix", record.name);
            continue;
        };
        if found.excluded.contains(&engine) || !record.is_posted() {
            continue;
        }

        if suffix == EventSuffix::Shutdown {
            debug!("Engine {} has posted Shutdown", engine);
            found.reachable.remove(&engine);
            found.excluded.insert(engine);
        } else if suffix.signals_liveness() && !found.reachable.contains(&engine) {
            debug!("Engine {} is alive ({} posted)", engine, suffix);
            found.reachable.insert(engine);
        }
    }

    found
}

/// Records whose name mentions `service`, e.g. all events of one engine.
pub fn events_for<'a>(records: &'a [EventRecord], service: &str) -> Vec<&'a EventRecord> {
    records.iter().filter(|r| r.name.contains(service)).collect()
}

/// True when `prefix` has every hook event listed, Shutdown posted and all
/// others reset: a cleanly stopped engine.
pub fn is_only_shutdown_posted(records: &[EventRecord], prefix: &str) -> bool {
    EventSuffix::HOOK_EVENTS.iter().all(|suffix| {
        let name = suffix.event_name(prefix);
        match records.iter().find(|r| r.name == name) {
            Some(r) => r.is_posted() == (*suffix == EventSuffix::Shutdown),
            None => false,
        }
    })
}

/// Discovery front end bound to one broker wire format.
#[derive(Debug, Clone, Copy)]
pub struct EngineRegistry {
    format: ListingFormat,
}

impl EngineRegistry {
    pub fn new(format: ListingFormat) -> Self {
        Self { format }
    }

    pub fn for_broker_version(version: u32) -> Self {
        Self::new(ListingFormat::for_broker_version(version))
    }

    pub fn format(&self) -> ListingFormat {
        self.format
    }

    pub fn parse(&self, listing: &str) -> Result<Vec<EventRecord>> {
        self.format.parse(listing)
    }

    pub fn scan(&self, listing: &str) -> Result<DiscoveredEngines> {
        Ok(classify(&self.parse(listing)?))
    }

    /// Query the broker and scan its listing.
    pub async fn discover(&self, broker: &dyn EventBroker) -> Result<DiscoveredEngines> {
        let listing = broker.list_events().await?;
        let engines = self.scan(&listing)?;
        debug!("Discovered {} reachable engine(s)", engines.len());
        Ok(engines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_LISTING: &str = "\
SAFS/RobotJDispatch: Reset - 1 waiter(s)
SAFS/RobotJDone: Reset - 0 waiter(s)
SAFS/RobotJReady: Posted
SAFS/RobotJResults: Reset - 0 waiter(s)
SAFS/RobotJRunning: Reset - 0 waiter(s)
SAFS/RobotJShutdown: Reset - 0 waiter(s)
SAFS/DROIDDispatch: Reset - 0 waiter(s)
SAFS/DROIDReady: Reset - 0 waiter(s)
SAFS/DROIDShutdown: Posted - 0 waiter(s)
SAFS/TIDRunning: Posted - 0 waiter(s)";

    const STRUCTURED_LISTING: &str = r#"[
        {"Name": "SAFS/RobotJDispatch", "State": "Reset", "Waiters": 1},
        {"Name": "SAFS/RobotJDone", "State": "Reset", "Waiters": 0},
        {"Name": "SAFS/RobotJReady", "State": "Posted", "Waiters": "0"},
        {"Name": "SAFS/RobotJResults", "State": "Reset", "Waiters": 0},
        {"Name": "SAFS/RobotJRunning", "State": "Reset", "Waiters": 0},
        {"Name": "SAFS/RobotJShutdown", "State": "Reset", "Waiters": 0},
        {"name": "SAFS/DROIDDispatch", "state": "Reset", "waiters": 0},
        {"name": "SAFS/DROIDReady", "state": "Reset", "waiters": 0},
        {"name": "SAFS/DROIDShutdown", "state": "Posted", "waiters": 0},
        {"name": "SAFS/TIDRunning", "state": "posted", "waiters": 0}
    ]"#;

    fn line_scan(lines: &[&str]) -> DiscoveredEngines {
        EngineRegistry::new(ListingFormat::Line)
            .scan(&lines.join("\n"))
            .unwrap()
    }

    #[test]
    fn test_parse_line_format() {
        let records = ListingFormat::Line.parse(LINE_LISTING).unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(
            records[0],
            EventRecord::new("SAFS/RobotJDispatch", EventState::Reset, 1)
        );
        assert_eq!(
            records[2],
            EventRecord::new("SAFS/RobotJReady", EventState::Posted, 0)
        );
    }

    #[test]
    fn test_format_equivalence() {
        let line = EngineRegistry::new(ListingFormat::Line).scan(LINE_LISTING).unwrap();
        let structured = EngineRegistry::new(ListingFormat::Structured)
            .scan(STRUCTURED_LISTING)
            .unwrap();
        assert_eq!(line, structured);
        assert_eq!(line.prefixes(), vec!["SAFS/RobotJ", "SAFS/TID"]);
        assert!(line.is_excluded("SAFS/DROID"));
    }

    #[test]
    fn test_render_then_scan_matches_in_both_formats() {
        let records = ListingFormat::Line.parse(LINE_LISTING).unwrap();
        for format in [ListingFormat::Line, ListingFormat::Structured] {
            let rendered = format.render(&records);
            assert_eq!(format.parse(&rendered).unwrap(), records);
        }
    }

    #[test]
    fn test_shutdown_scenario() {
        let found = line_scan(&["Eng1Ready: Posted", "Eng1Shutdown: Posted", "Eng2Running: Posted"]);
        assert_eq!(found.prefixes(), vec!["Eng2"]);
        assert!(!found.contains("Eng1"));
    }

    #[test]
    fn test_shutdown_dominates_in_either_order() {
        let before = line_scan(&["Eng1Shutdown: Posted", "Eng1Ready: Posted"]);
        let after = line_scan(&["Eng1Ready: Posted", "Eng1Shutdown: Posted"]);
        assert!(before.is_empty());
        assert!(after.is_empty());
        assert_eq!(before.to_map().get("Eng1"), Some(&false));
    }

    #[test]
    fn test_first_classification_wins() {
        let found = line_scan(&["Eng1Ready: Posted", "Eng1Ready: Reset"]);
        assert!(found.contains("Eng1"));

        // Running posted after a reset Ready still classifies the engine
        let busy = line_scan(&["Eng1Ready: Reset - 0 waiter(s)", "Eng1Running: Posted"]);
        assert!(busy.contains("Eng1"));
    }

    #[test]
    fn test_unrecognized_lines_are_skipped() {
        let found = line_scan(&[
            "garbage without separator",
            "STAF/Config/Something: Posted",
            "Eng1Ready: Confused - 0 waiter(s)",
            "",
            "Ready: Posted",
            "Eng2Ready: Posted",
        ]);
        assert_eq!(found.prefixes(), vec!["Eng2"]);
    }

    #[test]
    fn test_structured_skips_bad_entries() {
        let listing = r#"[42, {"name": "E1Ready"}, {"NAME": "E2Running", "STATE": "Posted"}]"#;
        let found = EngineRegistry::for_broker_version(3).scan(listing).unwrap();
        assert_eq!(found.prefixes(), vec!["E2"]);
    }

    #[test]
    fn test_structured_rejects_non_list() {
        let registry = EngineRegistry::new(ListingFormat::Structured);
        assert!(matches!(registry.scan(r#"{"name": "x"}"#), Err(Error::Protocol(_))));
        assert!(matches!(registry.scan("not json"), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_oversized_waiter_count_reads_as_zero() {
        let line = ListingFormat::Line
            .parse("E1Ready: Posted - 4294967296 waiter(s)")
            .unwrap();
        let structured = ListingFormat::Structured
            .parse(r#"[{"name": "E1Ready", "state": "Posted", "waiters": 4294967296}]"#)
            .unwrap();
        assert_eq!(line, structured);
        assert_eq!(structured[0].waiters, 0);
    }

    #[test]
    fn test_format_for_version() {
        assert_eq!(ListingFormat::for_broker_version(2), ListingFormat::Line);
        assert_eq!(ListingFormat::for_broker_version(3), ListingFormat::Structured);
    }

    #[test]
    fn test_events_for_and_clean_shutdown() {
        let records = ListingFormat::Line.parse(LINE_LISTING).unwrap();
        assert_eq!(events_for(&records, "SAFS/RobotJ").len(), 6);
        assert!(!is_only_shutdown_posted(&records, "SAFS/RobotJ"));
        // DROID lacks Running/Results/Done entries
        assert!(!is_only_shutdown_posted(&records, "SAFS/DROID"));

        let stopped: Vec<EventRecord> = EventSuffix::HOOK_EVENTS
            .iter()
            .map(|s| {
                let state = if *s == EventSuffix::Shutdown {
                    EventState::Posted
                } else {
                    EventState::Reset
                };
                EventRecord::new(s.event_name("E1"), state, 0)
            })
            .collect();
        assert!(is_only_shutdown_posted(&stopped, "E1"));
    }
}
