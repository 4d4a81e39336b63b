//! Record Commands

use anyhow::Result;
use clap::Subcommand;
use hookbus_common::{codec, TestRecord};
use serde::Serialize;

use crate::client::Session;
use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Show the record currently stored under a root
    Show {
        /// Record root, i.e. the engine prefix or a shared root like SAFS/HOOK/
        root: String,
    },

    /// Show only the status code stored under a root
    Status { root: String },
}

/// Record display wrapper for serialization
#[derive(Serialize)]
pub struct RecordDisplay {
    pub root: String,
    #[serde(flatten)]
    pub record: TestRecord,
}

impl TableDisplay for RecordDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Root", "Source", "Line", "Level", "Record", "Status", "Info"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.root.clone(),
            self.record.source_id.clone(),
            self.record.line_number.to_string(),
            self.record.test_level.to_string(),
            self.record.input_record.clone(),
            self.record.status_code.to_string(),
            self.record.status_info.clone(),
        ]
    }
}

pub async fn execute(cmd: RecordCommands, session: &Session, format: OutputFormat) -> Result<()> {
    let client = session.connect().await?;

    match cmd {
        RecordCommands::Show { root } => {
            let record = codec::decode(&root, &client).await?;
            print_item(&RecordDisplay { root, record }, format);
        }
        RecordCommands::Status { root } => {
            let status = codec::decode_status(&root, &client).await?;
            println!("{}", status);
        }
    }

    Ok(())
}
