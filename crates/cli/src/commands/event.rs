//! Event Commands

use anyhow::Result;
use clap::Subcommand;
use hookbus_common::event::reset_hook_events;
use hookbus_common::registry::events_for;
use hookbus_common::{EngineIdentity, EventBroker, EventChannel, EventRecord, EventSuffix, WaitTimeout};
use serde::Serialize;

use crate::client::Session;
use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum EventCommands {
    /// List events known to the broker
    List {
        /// Only events whose name contains this text
        #[arg(long)]
        filter: Option<String>,

        /// Print the broker listing exactly as received
        #[arg(long)]
        raw: bool,
    },

    /// Post (latch) an event
    Post { name: String },

    /// Wake current waiters without latching
    Pulse { name: String },

    /// Reset a posted event
    Reset { name: String },

    /// Wait for an event to be posted
    Wait {
        name: String,

        /// Seconds to wait; negative waits forever, zero polls
        #[arg(short, long, default_value = "30", allow_hyphen_values = true)]
        timeout: i64,
    },

    /// Reset every hook event of one engine
    ResetEngine { prefix: String },

    /// Announce that an engine is shutting down
    Shutdown { prefix: String },
}

/// Event display wrapper for serialization
#[derive(Serialize)]
pub struct EventDisplay {
    pub name: String,
    pub state: String,
    pub waiters: u32,
}

impl From<&EventRecord> for EventDisplay {
    fn from(record: &EventRecord) -> Self {
        Self {
            name: record.name.clone(),
            state: record.state.to_string(),
            waiters: record.waiters,
        }
    }
}

impl TableDisplay for EventDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "State", "Waiters"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.state.clone(), self.waiters.to_string()]
    }
}

pub async fn execute(cmd: EventCommands, session: &Session, format: OutputFormat) -> Result<()> {
    let client = session.connect().await?;

    match cmd {
        EventCommands::List { filter, raw } => {
            let listing = client.list_events().await?;
            if raw {
                println!("{}", listing);
                return Ok(());
            }
            let records = session.registry(&client).parse(&listing)?;
            let selected = events_for(&records, filter.as_deref().unwrap_or(""));
            let displays: Vec<EventDisplay> = selected.into_iter().map(EventDisplay::from).collect();
            print_list(&displays, format);
        }

        EventCommands::Post { name } => {
            client.post(&name).await?;
            print_success(&format!("Posted {}", name));
        }

        EventCommands::Pulse { name } => {
            client.pulse(&name).await?;
            print_success(&format!("Pulsed {}", name));
        }

        EventCommands::Reset { name } => {
            client.reset(&name).await?;
            print_success(&format!("Reset {}", name));
        }

        EventCommands::Wait { name, timeout } => {
            client.wait(&name, WaitTimeout::from_secs(timeout)).await?;
            print_success(&format!("{} is posted", name));
        }

        EventCommands::ResetEngine { prefix } => {
            reset_hook_events(&client, &prefix).await?;
            print_success(&format!("Reset hook events of {}", prefix));
        }

        EventCommands::Shutdown { prefix } => {
            reset_hook_events(&client, &prefix).await?;
            let engine = EngineIdentity::new(prefix);
            client.post(&engine.event(EventSuffix::Shutdown)).await?;
            print_success(&format!("Posted {}", engine.event(EventSuffix::Shutdown)));
        }
    }

    Ok(())
}
