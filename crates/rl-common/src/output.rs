//! Output formats for command payloads.
//!
//! Payloads go to stdout in the chosen format; diagnostics always go to
//! stderr, so `--format json` output can be piped straight into `jq`.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON envelope `{schema_version, command, generated_at, result}`
    #[default]
    Json,

    /// Markdown report for tickets and compliance reviews
    Md,

    /// One line, suited to cron mail
    Summary,

    /// Nothing on stdout; the exit code is the answer
    Exitcode,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Md => "md",
            OutputFormat::Summary => "summary",
            OutputFormat::Exitcode => "exitcode",
        }
    }

    /// Formats read by programs rather than people. Logs default to JSONL
    /// alongside these.
    pub fn is_machine(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_cli_values() {
        for format in OutputFormat::value_variants() {
            let parsed = OutputFormat::from_str(format.as_str(), false).unwrap();
            assert_eq!(parsed, *format);
            assert_eq!(
                serde_json::to_string(format).unwrap(),
                format!("\"{}\"", format)
            );
        }
    }
}
