//! Core types for hookbus

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Engine outcome code carried in a [`TestRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SCRIPT_WARNING: StatusCode = StatusCode(-2);
    pub const NO_SCRIPT_FAILURE: StatusCode = StatusCode(-1);
    pub const GENERAL_SCRIPT_FAILURE: StatusCode = StatusCode(0);
    pub const INVALID_FILE_IO: StatusCode = StatusCode(2);
    /// No engine has accepted responsibility for the record yet.
    pub const NOT_EXECUTED: StatusCode = StatusCode(4);
    pub const EXIT_TABLE_COMMAND: StatusCode = StatusCode(8);
    pub const IGNORE_RETURN_CODE: StatusCode = StatusCode(16);
    pub const NO_RECORD_TYPE_FIELD: StatusCode = StatusCode(32);
    pub const UNRECOGNIZED_RECORD_TYPE: StatusCode = StatusCode(64);
    pub const WRONG_NUM_FIELDS: StatusCode = StatusCode(128);
    pub const BRANCH_TO_BLOCKID: StatusCode = StatusCode(256);

    /// Symbolic name, if the code is one of the known constants.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SCRIPT_WARNING => "SCRIPT_WARNING",
            Self::NO_SCRIPT_FAILURE => "NO_SCRIPT_FAILURE",
            Self::GENERAL_SCRIPT_FAILURE => "GENERAL_SCRIPT_FAILURE",
            Self::INVALID_FILE_IO => "INVALID_FILE_IO",
            Self::NOT_EXECUTED => "NOT_EXECUTED",
            Self::EXIT_TABLE_COMMAND => "EXIT_TABLE_COMMAND",
            Self::IGNORE_RETURN_CODE => "IGNORE_RETURN_CODE",
            Self::NO_RECORD_TYPE_FIELD => "NO_RECORD_TYPE_FIELD",
            Self::UNRECOGNIZED_RECORD_TYPE => "UNRECOGNIZED_RECORD_TYPE",
            Self::WRONG_NUM_FIELDS => "WRONG_NUM_FIELDS",
            Self::BRANCH_TO_BLOCKID => "BRANCH_TO_BLOCKID",
            _ => return None,
        };
        Some(name)
    }

    /// How a driver should treat this code when deciding whether to stop.
    pub fn verdict(self) -> StepVerdict {
        match self {
            Self::NOT_EXECUTED => StepVerdict::NotExecuted,
            Self::NO_SCRIPT_FAILURE => StepVerdict::Passed,
            Self::SCRIPT_WARNING => StepVerdict::Warning,
            Self::GENERAL_SCRIPT_FAILURE | Self::INVALID_FILE_IO => StepVerdict::Failed,
            Self::EXIT_TABLE_COMMAND | Self::BRANCH_TO_BLOCKID => StepVerdict::ControlFlow,
            Self::IGNORE_RETURN_CODE => StepVerdict::Neutral,
            Self::NO_RECORD_TYPE_FIELD | Self::UNRECOGNIZED_RECORD_TYPE | Self::WRONG_NUM_FIELDS => {
                StepVerdict::MalformedInput
            }
            _ => StepVerdict::Unknown,
        }
    }

    /// Only `NOT_EXECUTED` lets the fallback chain move on.
    pub fn advances_fallback(self) -> bool {
        self == Self::NOT_EXECUTED
    }

    /// Every known code, in ascending order.
    pub fn all() -> [StatusCode; 11] {
        [
            Self::SCRIPT_WARNING,
            Self::NO_SCRIPT_FAILURE,
            Self::GENERAL_SCRIPT_FAILURE,
            Self::INVALID_FILE_IO,
            Self::NOT_EXECUTED,
            Self::EXIT_TABLE_COMMAND,
            Self::IGNORE_RETURN_CODE,
            Self::NO_RECORD_TYPE_FIELD,
            Self::UNRECOGNIZED_RECORD_TYPE,
            Self::WRONG_NUM_FIELDS,
            Self::BRANCH_TO_BLOCKID,
        ]
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::NOT_EXECUTED
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Driver-facing interpretation of a [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepVerdict {
    NotExecuted,
    Passed,
    Warning,
    Failed,
    ControlFlow,
    Neutral,
    MalformedInput,
    Unknown,
}

impl StepVerdict {
    pub fn is_success(self) -> bool {
        matches!(self, StepVerdict::Passed | StepVerdict::Warning)
    }
}

impl fmt::Display for StepVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepVerdict::NotExecuted => write!(f, "not executed"),
            StepVerdict::Passed => write!(f, "passed"),
            StepVerdict::Warning => write!(f, "passed with warning"),
            StepVerdict::Failed => write!(f, "failed"),
            StepVerdict::ControlFlow => write!(f, "control flow"),
            StepVerdict::Neutral => write!(f, "ignored"),
            StepVerdict::MalformedInput => write!(f, "malformed input"),
            StepVerdict::Unknown => write!(f, "unknown"),
        }
    }
}

/// Table level a step belongs to. Parsed case-insensitively; levels outside
/// the well-known three are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TestLevel {
    Cycle,
    Suite,
    Step,
    Other(String),
}

impl Default for TestLevel {
    fn default() -> Self {
        Self::Step
    }
}

impl FromStr for TestLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let level = if s.eq_ignore_ascii_case("CYCLE") {
            TestLevel::Cycle
        } else if s.eq_ignore_ascii_case("SUITE") {
            TestLevel::Suite
        } else if s.eq_ignore_ascii_case("STEP") {
            TestLevel::Step
        } else {
            TestLevel::Other(s.to_string())
        };
        Ok(level)
    }
}

impl From<String> for TestLevel {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(level) => level,
            Err(never) => match never {},
        }
    }
}

impl From<TestLevel> for String {
    fn from(level: TestLevel) -> Self {
        level.to_string()
    }
}

impl fmt::Display for TestLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestLevel::Cycle => write!(f, "CYCLE"),
            TestLevel::Suite => write!(f, "SUITE"),
            TestLevel::Step => write!(f, "STEP"),
            TestLevel::Other(s) => write!(f, "{}", s),
        }
    }
}

/// The unit of work exchanged between driver and engine each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Originating script or table, for audit only
    pub source_id: String,
    /// 1-based position within the source
    pub line_number: i64,
    /// Raw step text; empty means no-op
    pub input_record: String,
    pub separator: String,
    pub test_level: TestLevel,
    /// Lookup table the engine resolves symbolic names against
    pub app_map_id: String,
    pub status_code: StatusCode,
    /// Logging channel for ancillary output
    pub facility: String,
    /// Free-form detail accompanying the status code
    pub status_info: String,
}

impl Default for TestRecord {
    fn default() -> Self {
        Self {
            source_id: String::new(),
            line_number: 1,
            input_record: String::new(),
            separator: ",".to_string(),
            test_level: TestLevel::Step,
            app_map_id: String::new(),
            status_code: StatusCode::NOT_EXECUTED,
            facility: String::new(),
            status_info: String::new(),
        }
    }
}

impl TestRecord {
    pub fn new(input_record: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            input_record: input_record.into(),
            separator: separator.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>, line_number: i64) -> Self {
        self.source_id = source_id.into();
        self.line_number = line_number;
        self
    }

    pub fn with_test_level(mut self, level: TestLevel) -> Self {
        self.test_level = level;
        self
    }

    pub fn with_app_map(mut self, app_map_id: impl Into<String>) -> Self {
        self.app_map_id = app_map_id.into();
        self
    }

    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = facility.into();
        self
    }

    /// Copy of this record ready to be dispatched: same inputs, status reset.
    pub fn fresh(&self) -> Self {
        Self {
            status_code: StatusCode::NOT_EXECUTED,
            ..self.clone()
        }
    }

    /// Input fields split on the record separator.
    pub fn fields(&self) -> Vec<&str> {
        if self.separator.is_empty() {
            return vec![self.input_record.as_str()];
        }
        self.input_record.split(self.separator.as_str()).collect()
    }

    pub fn is_noop(&self) -> bool {
        self.input_record.is_empty()
    }
}

/// Protocol event suffixes appended to an engine prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSuffix {
    Start,
    Ready,
    Dispatch,
    Running,
    Results,
    Done,
    Shutdown,
}

impl EventSuffix {
    /// Order in which suffixes are tried when splitting a listed event name.
    pub const DISCOVERY_ORDER: [EventSuffix; 6] = [
        EventSuffix::Dispatch,
        EventSuffix::Done,
        EventSuffix::Ready,
        EventSuffix::Results,
        EventSuffix::Running,
        EventSuffix::Shutdown,
    ];

    /// Events reset when an engine's hook state is cleared.
    pub const HOOK_EVENTS: [EventSuffix; 6] = [
        EventSuffix::Ready,
        EventSuffix::Dispatch,
        EventSuffix::Running,
        EventSuffix::Results,
        EventSuffix::Done,
        EventSuffix::Shutdown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventSuffix::Start => "Start",
            EventSuffix::Ready => "Ready",
            EventSuffix::Dispatch => "Dispatch",
            EventSuffix::Running => "Running",
            EventSuffix::Results => "Results",
            EventSuffix::Done => "Done",
            EventSuffix::Shutdown => "Shutdown",
        }
    }

    /// Full event name for an engine prefix, e.g. `SAFS/Eng1` + `Ready`.
    pub fn event_name(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.as_str())
    }

    /// Whether a posted event of this kind shows the engine is alive.
    pub fn signals_liveness(self) -> bool {
        matches!(self, EventSuffix::Ready | EventSuffix::Running)
    }
}

impl fmt::Display for EventSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event state as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    Posted,
    Reset,
}

impl EventState {
    /// Case-insensitive parse of a broker state word.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("posted") {
            Some(EventState::Posted)
        } else if s.eq_ignore_ascii_case("reset") {
            Some(EventState::Reset)
        } else {
            None
        }
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventState::Posted => write!(f, "Posted"),
            EventState::Reset => write!(f, "Reset"),
        }
    }
}

/// One entry of a broker event listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    pub state: EventState,
    pub waiters: u32,
}

impl EventRecord {
    pub fn new(name: impl Into<String>, state: EventState, waiters: u32) -> Self {
        Self {
            name: name.into(),
            state,
            waiters,
        }
    }

    pub fn is_posted(&self) -> bool {
        self.state == EventState::Posted
    }

    /// Split the name into engine prefix and protocol suffix, trying
    /// suffixes in [`EventSuffix::DISCOVERY_ORDER`]. The suffix must follow
    /// at least one prefix character.
    pub fn split_engine(&self) -> Option<(EngineIdentity, EventSuffix)> {
        EventSuffix::DISCOVERY_ORDER.iter().find_map(|suffix| {
            match self.name.find(suffix.as_str()) {
                Some(idx) if idx > 0 => {
                    Some((EngineIdentity::new(&self.name[..idx]), *suffix))
                }
                _ => None,
            }
        })
    }
}

/// An engine, identified by the prefix shared by all its event names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineIdentity(String);

impl EngineIdentity {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn prefix(&self) -> &str {
        &self.0
    }

    pub fn into_prefix(self) -> String {
        self.0
    }

    pub fn event(&self, suffix: EventSuffix) -> String {
        suffix.event_name(&self.0)
    }
}

impl fmt::Display for EngineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// States of one driver-side dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    WaitReady,
    Publish,
    SignalDispatch,
    WaitResults,
    Consume,
    SignalDone,
    Idle,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::WaitReady => write!(f, "wait_ready"),
            CyclePhase::Publish => write!(f, "publish"),
            CyclePhase::SignalDispatch => write!(f, "signal_dispatch"),
            CyclePhase::WaitResults => write!(f, "wait_results"),
            CyclePhase::Consume => write!(f, "consume"),
            CyclePhase::SignalDone => write!(f, "signal_done"),
            CyclePhase::Idle => write!(f, "idle"),
        }
    }
}

/// A hard failure on one engine, recorded while the fallback chain moves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDiagnostic {
    pub engine: String,
    pub kind: String,
    pub message: String,
    pub at: i64,
}

impl EngineDiagnostic {
    pub fn new(engine: impl Into<String>, error: &crate::Error) -> Self {
        Self {
            engine: engine.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_verdicts() {
        assert_eq!(StatusCode::NOT_EXECUTED.verdict(), StepVerdict::NotExecuted);
        assert_eq!(StatusCode::NO_SCRIPT_FAILURE.verdict(), StepVerdict::Passed);
        assert_eq!(StatusCode::SCRIPT_WARNING.verdict(), StepVerdict::Warning);
        assert_eq!(StatusCode::INVALID_FILE_IO.verdict(), StepVerdict::Failed);
        assert_eq!(StatusCode::WRONG_NUM_FIELDS.verdict(), StepVerdict::MalformedInput);
        assert_eq!(StatusCode(99).verdict(), StepVerdict::Unknown);
        assert!(StatusCode::NOT_EXECUTED.advances_fallback());
        assert!(!StatusCode::GENERAL_SCRIPT_FAILURE.advances_fallback());
        assert_eq!(StatusCode::NOT_EXECUTED.to_string(), "NOT_EXECUTED (4)");
        assert_eq!(StatusCode(99).to_string(), "99");
    }

    #[test]
    fn test_test_level_case_insensitive() {
        assert_eq!("step".parse::<TestLevel>().unwrap(), TestLevel::Step);
        assert_eq!("Suite".parse::<TestLevel>().unwrap(), TestLevel::Suite);
        assert_eq!(
            "block".parse::<TestLevel>().unwrap(),
            TestLevel::Other("block".to_string())
        );
        assert_eq!(TestLevel::Cycle.to_string(), "CYCLE");
    }

    #[test]
    fn test_record_fields_and_fresh() {
        let mut rec = TestRecord::new("C,Click,LoginWindow", ",");
        assert_eq!(rec.fields(), vec!["C", "Click", "LoginWindow"]);
        rec.status_code = StatusCode::NO_SCRIPT_FAILURE;
        let fresh = rec.fresh();
        assert_eq!(fresh.status_code, StatusCode::NOT_EXECUTED);
        assert_eq!(fresh.input_record, rec.input_record);
    }

    #[test]
    fn test_split_engine() {
        let rec = EventRecord::new("SAFS/RobotJReady", EventState::Posted, 0);
        let (engine, suffix) = rec.split_engine().unwrap();
        assert_eq!(engine.prefix(), "SAFS/RobotJ");
        assert_eq!(suffix, EventSuffix::Ready);

        // A suffix at position zero has no prefix and does not count
        let bare = EventRecord::new("Ready", EventState::Posted, 0);
        assert!(bare.split_engine().is_none());

        let unrelated = EventRecord::new("STAF/Something", EventState::Posted, 0);
        assert!(unrelated.split_engine().is_none());
    }

    #[test]
    fn test_split_engine_search_order() {
        // Dispatch is tried before Ready, so the split happens at Dispatch
        let rec = EventRecord::new("ReadyEngDispatch", EventState::Reset, 1);
        let (engine, suffix) = rec.split_engine().unwrap();
        assert_eq!(engine.prefix(), "ReadyEng");
        assert_eq!(suffix, EventSuffix::Dispatch);
    }
}
