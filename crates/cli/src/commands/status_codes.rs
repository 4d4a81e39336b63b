//! Status Code Reference

use hookbus_common::StatusCode;
use serde::Serialize;

use crate::output::{print_list, verdict_label, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct StatusCodeDisplay {
    pub code: i32,
    pub name: String,
    pub verdict: String,
    pub advances_fallback: bool,
}

impl From<StatusCode> for StatusCodeDisplay {
    fn from(code: StatusCode) -> Self {
        Self {
            code: code.0,
            name: code.name().unwrap_or("UNKNOWN").to_string(),
            verdict: format!("{:?}", code.verdict()),
            advances_fallback: code.advances_fallback(),
        }
    }
}

impl TableDisplay for StatusCodeDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Code", "Name", "Verdict", "Tries Next Engine"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.code.to_string(),
            self.name.clone(),
            verdict_label(StatusCode(self.code).verdict()),
            if self.advances_fallback { "yes" } else { "no" }.to_string(),
        ]
    }
}

pub fn execute(format: OutputFormat) {
    let displays: Vec<StatusCodeDisplay> =
        StatusCode::all().into_iter().map(StatusCodeDisplay::from).collect();
    print_list(&displays, format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_executed_moves_on() {
        let movers: Vec<i32> = StatusCode::all()
            .into_iter()
            .map(StatusCodeDisplay::from)
            .filter(|d| d.advances_fallback)
            .map(|d| d.code)
            .collect();
        assert_eq!(movers, vec![4]);
    }
}
