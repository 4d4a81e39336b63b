//! Dispatch Command

use anyhow::Result;
use clap::Args;
use hookbus_common::{Error, TestLevel, TestRecord, WaitTimeout};
use hookbus_dispatch::{Candidates, DispatchCoordinator, DispatchOutcome, FallbackPolicy};
use serde::Serialize;
use std::sync::Arc;

use crate::client::Session;
use crate::output::{print_item, print_list, print_warning, verdict_label, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct DispatchArgs {
    /// Raw step text, e.g. "T,LoginWindow,OKButton,Click"
    pub record: String,

    /// Field separator of the step text
    #[arg(long, default_value = ",")]
    pub separator: String,

    /// Engine prefix to try, in order; repeat for a fallback chain
    #[arg(short, long = "engine")]
    pub engines: Vec<String>,

    /// Shared record root (e.g. SAFS/HOOK/)
    #[arg(long)]
    pub trd_root: Option<String>,

    /// Per-wait timeout in seconds; negative waits forever
    #[arg(short, long, allow_hyphen_values = true)]
    pub timeout: Option<i64>,

    /// Source script or table the step came from
    #[arg(long, default_value = "")]
    pub source: String,

    /// Line number within the source
    #[arg(long, default_value = "1")]
    pub line: i64,

    /// Test level: CYCLE, SUITE or STEP
    #[arg(long, default_value = "STEP")]
    pub test_level: String,

    /// App map the engine resolves names against
    #[arg(long, default_value = "")]
    pub app_map: String,

    /// Logging facility
    #[arg(long, default_value = "")]
    pub facility: String,
}

impl DispatchArgs {
    fn record(&self) -> TestRecord {
        TestRecord::new(&self.record, &self.separator)
            .with_source(&self.source, self.line)
            .with_test_level(TestLevel::from(self.test_level.clone()))
            .with_app_map(&self.app_map)
            .with_facility(&self.facility)
    }
}

/// Outcome display wrapper for serialization
#[derive(Serialize)]
pub struct OutcomeDisplay {
    pub engine: String,
    pub status_code: i32,
    pub status: String,
    pub verdict: String,
    pub status_info: String,
    pub cycles: usize,
    #[serde(skip)]
    verdict_label: String,
}

impl From<&DispatchOutcome> for OutcomeDisplay {
    fn from(outcome: &DispatchOutcome) -> Self {
        let code = outcome.status_code();
        Self {
            engine: outcome.engine.clone(),
            status_code: code.0,
            status: code.name().unwrap_or("UNKNOWN").to_string(),
            verdict: format!("{:?}", outcome.verdict()),
            status_info: outcome.record.status_info.clone(),
            cycles: outcome.cycles,
            verdict_label: verdict_label(outcome.verdict()),
        }
    }
}

impl TableDisplay for OutcomeDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Engine", "Code", "Status", "Verdict", "Info", "Cycles"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.engine.clone(),
            self.status_code.to_string(),
            self.status.clone(),
            self.verdict_label.clone(),
            self.status_info.clone(),
            self.cycles.to_string(),
        ]
    }
}

/// Engine failure display wrapper
#[derive(Serialize)]
pub struct DiagnosticDisplay {
    pub engine: String,
    pub kind: String,
    pub message: String,
    pub at: String,
}

impl From<&hookbus_common::EngineDiagnostic> for DiagnosticDisplay {
    fn from(d: &hookbus_common::EngineDiagnostic) -> Self {
        Self {
            engine: d.engine.clone(),
            kind: d.kind.clone(),
            message: d.message.clone(),
            at: chrono::DateTime::from_timestamp_millis(d.at)
                .map(|dt| dt.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_default(),
        }
    }
}

impl TableDisplay for DiagnosticDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Engine", "Error", "Message", "At"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.engine.clone(),
            self.kind.clone(),
            self.message.clone(),
            self.at.clone(),
        ]
    }
}

pub async fn execute(args: DispatchArgs, session: &Session, format: OutputFormat) -> Result<()> {
    let client = session.connect().await?;
    let registry = session.registry(&client);

    let mut config = session.config.clone();
    if let Some(root) = &args.trd_root {
        config.trd_root = Some(root.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    config.validate()?;

    let candidates = if args.engines.is_empty() {
        Candidates::from_preferences(&config.preferred_engines)
    } else {
        Candidates::Explicit(args.engines.clone())
    };

    let coordinator = DispatchCoordinator::from_config(Arc::new(client), &config);
    if coordinator.timeout() == WaitTimeout::Indefinite {
        print_warning("No timeout set; a silent engine will block forever");
    }
    let policy = FallbackPolicy::new(coordinator).with_registry(registry);

    match policy.run(candidates, &args.record()).await {
        Ok(outcome) => {
            print_item(&OutcomeDisplay::from(&outcome), format);
            if !outcome.diagnostics.is_empty() {
                let diagnostics: Vec<DiagnosticDisplay> =
                    outcome.diagnostics.iter().map(DiagnosticDisplay::from).collect();
                print_list(&diagnostics, format);
            }
            Ok(())
        }
        Err(Error::NoEngineReachable {
            attempted,
            diagnostics,
        }) => {
            let diagnostics: Vec<DiagnosticDisplay> =
                diagnostics.iter().map(DiagnosticDisplay::from).collect();
            if !diagnostics.is_empty() {
                print_list(&diagnostics, format);
            }
            if attempted.is_empty() {
                anyhow::bail!("no engine is currently reachable on the bus");
            }
            anyhow::bail!("none of {} engine(s) could be reached: {}", attempted.len(), attempted.join(", "))
        }
        Err(e) => Err(e.into()),
    }
}
