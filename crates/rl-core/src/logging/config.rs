//! Resolves the log level, format and filter for a process.
//!
//! Precedence, lowest first: built-in defaults, `RUST_LOG`, `RL_LOG`,
//! `RL_LOG_FORMAT`, then `-v`/`-q` and the format implied by `--format json`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;

/// Where log lines are meant to be read: a terminal or a log shipper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line on stderr.
    Jsonl,
}

impl LogFormat {
    const ALIASES: &'static [(&'static str, LogFormat)] = &[
        ("human", LogFormat::Human),
        ("console", LogFormat::Human),
        ("pretty", LogFormat::Human),
        ("jsonl", LogFormat::Jsonl),
        ("json", LogFormat::Jsonl),
        ("structured", LogFormat::Jsonl),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        }
    }
}

/// Severity threshold. Ordered from noisiest to silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    const ALIASES: &'static [(&'static str, LogLevel)] = &[
        ("trace", LogLevel::Trace),
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("warning", LogLevel::Warn),
        ("error", LogLevel::Error),
        ("off", LogLevel::Off),
        ("none", LogLevel::Off),
        ("quiet", LogLevel::Off),
    ];

    /// `-v` raises verbosity past the `info` default, `-q` lowers it.
    /// Verbose wins when both are given.
    pub fn from_verbosity(verbose: u8, quiet: u8) -> Self {
        match (verbose, quiet) {
            (0, 0) => LogLevel::Info,
            (0, 1) => LogLevel::Warn,
            (0, 2) => LogLevel::Error,
            (0, _) => LogLevel::Off,
            (1, _) => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], what: &str, raw: &str) -> Result<T, String> {
    let wanted = raw.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, value)| *value)
        .ok_or_else(|| format!("unknown log {what}: {raw}"))
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::ALIASES, "format", s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::ALIASES, "level", s)
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        level.filter()
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Human output only; JSONL lines always carry `ts`.
    pub timestamps: bool,
    /// Raw `RL_LOG` / `RUST_LOG` directive, used verbatim as the filter.
    pub directive: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
            directive: None,
        }
    }
}

impl LogConfig {
    /// Create config from the process environment and CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_env_with(cli_level, cli_format, |key| std::env::var(key).ok())
    }

    /// Same as [`LogConfig::from_env`] with an injectable environment.
    ///
    /// `RL_LOG` takes precedence over `RUST_LOG`; an explicit CLI level
    /// overrides both.
    pub fn from_env_with<F>(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig::default();

        if let Some(val) = env("RL_LOG").or_else(|| env("RUST_LOG")) {
            match val.parse::<LogLevel>() {
                Ok(level) => config.level = level,
                Err(_) => config.directive = Some(val),
            }
        }

        if let Some(format) = env("RL_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            config.format = format;
        }

        if let Some(level) = cli_level {
            config.level = level;
            config.directive = None;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }

        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Filter directive handed to `EnvFilter`.
    pub fn filter_directive(&self) -> String {
        self.directive
            .clone()
            .unwrap_or_else(|| self.level.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn format_aliases_parse() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn level_aliases_parse() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("quiet".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert_eq!("loud".parse::<LogLevel>().unwrap_err(), "unknown log level: loud");
        assert!(LogLevel::Trace < LogLevel::Off);
    }

    #[test]
    fn verbose_and_quiet_counts() {
        assert_eq!(LogLevel::from_verbosity(0, 0), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1, 0), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(3, 0), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(0, 1), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(0, 5), LogLevel::Off);
    }

    #[test]
    fn rl_log_shadows_rust_log() {
        let config = LogConfig::from_env_with(
            None,
            None,
            env(&[("RL_LOG", "debug"), ("RUST_LOG", "error"), ("RL_LOG_FORMAT", "jsonl")]),
        );
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert_eq!(config.filter_directive(), "debug");
    }

    #[test]
    fn module_directive_survives_until_cli_level() {
        let config = LogConfig::from_env_with(None, None, env(&[("RUST_LOG", "rl_core=trace")]));
        assert_eq!(config.filter_directive(), "rl_core=trace");

        let overridden =
            LogConfig::from_env_with(Some(LogLevel::Warn), None, env(&[("RUST_LOG", "rl_core=trace")]));
        assert_eq!(overridden.filter_directive(), "warn");
    }
}
