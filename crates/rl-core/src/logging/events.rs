//! Structured event definitions for logging.
//!
//! Every event carries the run correlation ids (`run_id`, `host_id`) and the
//! engine stage it was emitted from. Events about one schedule also carry
//! `schedule_id` and `entity`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup, configuration and policy loading.
    Init,
    /// Schedule creation and activity tracking.
    Intake,
    /// Selecting due schedules.
    Scan,
    /// Warning dispatch.
    Warn,
    /// Legal hold, auto-delete and approval gates.
    Gate,
    /// Collaborator hook calls.
    Execute,
    /// Audit log writes and verification.
    Audit,
    /// Final status commit.
    Commit,
    /// Run summary.
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Intake => "intake",
            Stage::Scan => "scan",
            Stage::Warn => "warn",
            Stage::Gate => "gate",
            Stage::Execute => "execute",
            Stage::Audit => "audit",
            Stage::Commit => "commit",
            Stage::Report => "report",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Stage::Init),
            "intake" => Ok(Stage::Intake),
            "scan" => Ok(Stage::Scan),
            "warn" => Ok(Stage::Warn),
            "gate" => Ok(Stage::Gate),
            "execute" => Ok(Stage::Execute),
            "audit" => Ok(Stage::Audit),
            "commit" => Ok(Stage::Commit),
            "report" => Ok(Stage::Report),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";
    pub const RUN_INTERRUPTED: &str = "run.interrupted";
    pub const RUN_ABORTED: &str = "run.aborted";

    // Scan
    pub const SCAN_SELECTED: &str = "scan.selected";

    // Warnings
    pub const WARN_DISPATCHED: &str = "warn.dispatched";
    pub const WARN_FAILED: &str = "warn.failed";

    // Gates
    pub const GATE_HOLD_SKIPPED: &str = "gate.hold_skipped";
    pub const GATE_AUTO_DELETE_DISABLED: &str = "gate.auto_delete_disabled";
    pub const GATE_APPROVAL_PENDING: &str = "gate.approval_pending";
    pub const GATE_CLAIM_LOST: &str = "gate.claim_lost";

    // Execution
    pub const DELETE_EXECUTED: &str = "delete.executed";
    pub const ANONYMIZE_EXECUTED: &str = "anonymize.executed";
    pub const EXECUTE_FAILED: &str = "execute.failed";
    pub const EXECUTE_RECOVERED: &str = "execute.recovered";
    pub const EXECUTE_UNSETTLED: &str = "execute.unsettled";
    pub const EXECUTE_CONFIRMED: &str = "execute.confirmed";

    // Audit
    pub const AUDIT_WRITTEN: &str = "audit.written";
    pub const AUDIT_ROTATED: &str = "audit.rotated";
    pub const AUDIT_FAILED: &str = "audit.failed";

    // Holds and approvals
    pub const HOLD_APPLIED: &str = "hold.applied";
    pub const HOLD_RELEASED: &str = "hold.released";
    pub const APPROVAL_RECORDED: &str = "approval.recorded";

    // Intake
    pub const SCHEDULE_CREATED: &str = "schedule.created";
    pub const SCHEDULE_EXTENDED: &str = "schedule.extended";
    pub const SCHEDULE_REBASED: &str = "schedule.rebased";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
}

/// A structured log event for JSONL output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: Level,

    /// Event name (e.g., "run.started", "delete.executed").
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    pub message: String,

    /// Schedule the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,

    /// Entity (`type:id`) the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    /// Additional structured fields (stable keys).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEvent {
    pub fn new(level: Level, event: impl Into<String>, message: impl Into<String>) -> Self {
        LogEvent {
            ts: Utc::now(),
            level,
            event: event.into(),
            run_id: None,
            host_id: None,
            stage: None,
            message: message.into(),
            schedule_id: None,
            entity: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    /// Attach the schedule and entity this event is about.
    pub fn with_schedule(mut self, schedule_id: impl Into<String>, entity: impl Into<String>) -> Self {
        self.schedule_id = Some(schedule_id.into());
        self.entity = Some(entity.into());
        self
    }

    /// Serialize to a single JSON line.
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Correlation ids shared by every event of one invocation.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }

    pub fn event(
        &self,
        level: Level,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        let mut e = LogEvent::new(level, event, message).with_stage(stage);
        e.run_id = Some(self.run_id.clone());
        e.host_id = Some(self.host_id.clone());
        e
    }

    pub fn info(&self, event: impl Into<String>, stage: Stage, message: impl Into<String>) -> LogEvent {
        self.event(Level::Info, event, stage, message)
    }

    pub fn warn(&self, event: impl Into<String>, stage: Stage, message: impl Into<String>) -> LogEvent {
        self.event(Level::Warn, event, stage, message)
    }

    pub fn error(&self, event: impl Into<String>, stage: Stage, message: impl Into<String>) -> LogEvent {
        self.event(Level::Error, event, stage, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogContext::new("run-12345", "host-abc")
            .info(event_names::RUN_STARTED, Stage::Init, "starting retention run")
            .with_field("dry_run", true);

        let json = event.to_jsonl();
        assert!(json.contains(r#""event":"run.started""#));
        assert!(json.contains(r#""level":"info""#));
        assert!(json.contains(r#""stage":"init""#));
        assert!(json.contains(r#""run_id":"run-12345""#));
        assert!(json.contains(r#""dry_run":true"#));
        assert!(!json.contains("schedule_id"));
    }

    #[test]
    fn test_log_event_with_schedule() {
        let event = LogEvent::new(Level::Info, event_names::DELETE_EXECUTED, "deleted")
            .with_schedule("rs-0001", "patient:42");

        let json = event.to_jsonl();
        assert!(json.contains(r#""schedule_id":"rs-0001""#));
        assert!(json.contains(r#""entity":"patient:42""#));
    }

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [Stage::Init, Stage::Warn, Stage::Gate, Stage::Commit] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("infer".parse::<Stage>().is_err());
    }

    #[test]
    fn test_log_context_levels() {
        let ctx = LogContext::new("run-abc", "host-xyz");
        let event = ctx.warn(event_names::WARN_FAILED, Stage::Warn, "dispatcher down");
        assert_eq!(event.level, Level::Warn);
        assert_eq!(event.run_id.as_deref(), Some("run-abc"));
        assert_eq!(event.stage, Some(Stage::Warn));
    }
}
