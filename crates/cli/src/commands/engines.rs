//! Engine Discovery Command

use anyhow::Result;
use clap::Args;
use hookbus_common::registry::is_only_shutdown_posted;
use hookbus_common::{EventBroker, EventRecord, EventSuffix};
use serde::Serialize;

use crate::client::Session;
use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct EnginesArgs {
    /// Include engines that have posted Shutdown
    #[arg(short, long)]
    pub all: bool,
}

/// Engine display wrapper for serialization
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EngineDisplay {
    pub prefix: String,
    pub state: String,
    /// Protocol events of this engine currently posted
    pub posted: Vec<String>,
}

impl TableDisplay for EngineDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Prefix", "State", "Posted"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.prefix.clone(), self.state.clone(), self.posted.join(", ")]
    }
}

fn posted_suffixes(records: &[EventRecord], prefix: &str) -> Vec<String> {
    EventSuffix::HOOK_EVENTS
        .iter()
        .filter(|suffix| {
            let name = suffix.event_name(prefix);
            records.iter().any(|r| r.name == name && r.is_posted())
        })
        .map(|suffix| suffix.as_str().to_string())
        .collect()
}

/// Rows for a scanned listing, reachable engines first.
pub fn engine_rows(records: &[EventRecord], include_excluded: bool) -> Vec<EngineDisplay> {
    let engines = hookbus_common::registry::classify(records);

    let mut rows: Vec<EngineDisplay> = engines
        .iter()
        .map(|engine| EngineDisplay {
            prefix: engine.prefix().to_string(),
            state: "reachable".to_string(),
            posted: posted_suffixes(records, engine.prefix()),
        })
        .collect();

    if include_excluded {
        rows.extend(engines.excluded().map(|engine| {
            let state = if is_only_shutdown_posted(records, engine.prefix()) {
                "shutdown"
            } else {
                "shutting down"
            };
            EngineDisplay {
                prefix: engine.prefix().to_string(),
                state: state.to_string(),
                posted: posted_suffixes(records, engine.prefix()),
            }
        }));
    }
    rows
}

pub async fn execute(args: EnginesArgs, session: &Session, format: OutputFormat) -> Result<()> {
    let client = session.connect().await?;
    let registry = session.registry(&client);

    let listing = client.list_events().await?;
    let records = registry.parse(&listing)?;
    print_list(&engine_rows(&records, args.all), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookbus_common::EventState;

    #[test]
    fn test_engine_rows() {
        let records = vec![
            EventRecord::new("SAFS/TIDReady", EventState::Posted, 1),
            EventRecord::new("SAFS/TIDDispatch", EventState::Reset, 0),
            EventRecord::new("SAFS/DROIDShutdown", EventState::Posted, 0),
            EventRecord::new("SAFS/DROIDReady", EventState::Reset, 0),
            EventRecord::new("SAFS/DROIDDispatch", EventState::Reset, 0),
            EventRecord::new("SAFS/DROIDRunning", EventState::Reset, 0),
            EventRecord::new("SAFS/DROIDResults", EventState::Reset, 0),
            EventRecord::new("SAFS/DROIDDone", EventState::Reset, 0),
            EventRecord::new("SAFS/RobotJRunning", EventState::Posted, 0),
            EventRecord::new("SAFS/RobotJShutdown", EventState::Posted, 0),
        ];

        let rows = engine_rows(&records, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].prefix, "SAFS/TID");
        assert_eq!(rows[0].posted, vec!["Ready"]);

        let all = engine_rows(&records, true);
        let states: Vec<(&str, &str)> = all
            .iter()
            .map(|r| (r.prefix.as_str(), r.state.as_str()))
            .collect();
        assert_eq!(
            states,
            vec![
                ("SAFS/TID", "reachable"),
                ("SAFS/DROID", "shutdown"),
                ("SAFS/RobotJ", "shutting down"),
            ]
        );
    }
}
