//! Error types for the retention lifecycle engine.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for operators
//!
//! Expected outcomes of a pass (a schedule on legal hold, a schedule
//! waiting for manual approval) are not errors and are not represented
//! here; they are reported as schedule outcomes by the orchestrator.
//!
//! # Operator-Facing Output
//!
//! ```text
//! ✗ Execution Failure
//!   Reason: deletion hook for patient:42 timed out after 30000ms
//!   Fix: The schedule is unchanged and will be retried on the next run.
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Policy and settings errors.
    Config,
    /// Schedule lifecycle errors (conflicts, invalid transitions).
    Schedule,
    /// Collaborator hook errors (deletion, anonymization, warnings).
    Execution,
    /// Audit trail errors (write failures, verification).
    Audit,
    /// Schedule store and file I/O errors.
    Storage,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Schedule => write!(f, "schedule"),
            ErrorCategory::Execution => write!(f, "execution"),
            ErrorCategory::Audit => write!(f, "audit"),
            ErrorCategory::Storage => write!(f, "storage"),
        }
    }
}

/// Suggested actions for automation in response to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry on the next scheduled run.
    RetryNextRun,
    /// Fix the policy or settings file and re-run validation.
    FixConfig,
    /// Skip this item and continue.
    Skip,
    /// Abort the whole run.
    Abort,
    /// Manual investigation required; never auto-resolved.
    ManualInvestigation,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::RetryNextRun => write!(f, "retry_next_run"),
            SuggestedAction::FixConfig => write!(f, "fix_config"),
            SuggestedAction::Skip => write!(f, "skip"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::ManualInvestigation => write!(f, "manual_investigation"),
        }
    }
}

/// Unified error type for the retention lifecycle engine.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no retention policy for {0}")]
    PolicyNotFound(String),

    // Schedule errors (20-29)
    #[error("schedule already exists for {entity}: {existing}")]
    ScheduleConflict { entity: String, existing: String },

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("invalid transition for {schedule_id}: {from} -> {to}")]
    InvalidTransition {
        schedule_id: String,
        from: String,
        to: String,
    },

    // Execution errors (30-39)
    #[error("execution failed for {entity}: {reason}")]
    ExecutionFailure { entity: String, reason: String },

    #[error("collaborator call for {entity} timed out after {millis}ms")]
    HookTimeout { entity: String, millis: u64 },

    // Audit errors (40-49)
    #[error("audit write failed: {0}")]
    AuditWrite(String),

    #[error("verification hash mismatch for {entity}: recorded {recorded}, computed {computed}")]
    VerificationMismatch {
        entity: String,
        recorded: String,
        computed: String,
    },

    // Storage errors (50-59)
    #[error("schedule store failure: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Schedule errors
    /// - 30-39: Execution errors
    /// - 40-49: Audit errors
    /// - 50-59: Storage errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::PolicyNotFound(_) => 11,
            Error::ScheduleConflict { .. } => 20,
            Error::ScheduleNotFound(_) => 21,
            Error::InvalidTransition { .. } => 22,
            Error::ExecutionFailure { .. } => 30,
            Error::HookTimeout { .. } => 31,
            Error::AuditWrite(_) => 40,
            Error::VerificationMismatch { .. } => 41,
            Error::Storage(_) => 50,
            Error::Io(_) => 51,
            Error::Json(_) => 52,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::PolicyNotFound(_) => ErrorCategory::Config,

            Error::ScheduleConflict { .. }
            | Error::ScheduleNotFound(_)
            | Error::InvalidTransition { .. } => ErrorCategory::Schedule,

            Error::ExecutionFailure { .. } | Error::HookTimeout { .. } => {
                ErrorCategory::Execution
            }

            Error::AuditWrite(_) | Error::VerificationMismatch { .. } => ErrorCategory::Audit,

            Error::Storage(_) | Error::Io(_) | Error::Json(_) => ErrorCategory::Storage,
        }
    }

    /// Whether the failure is isolated to a single schedule.
    ///
    /// Schedule-scoped failures are counted in the run summary; everything
    /// else aborts the run.
    pub fn is_schedule_scoped(&self) -> bool {
        matches!(
            self,
            Error::PolicyNotFound(_)
                | Error::ScheduleConflict { .. }
                | Error::ScheduleNotFound(_)
                | Error::InvalidTransition { .. }
                | Error::ExecutionFailure { .. }
                | Error::HookTimeout { .. }
        )
    }

    /// Returns whether this error is potentially recoverable without
    /// operator intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => false,
            Error::PolicyNotFound(_) => false,
            Error::ScheduleConflict { .. } => false,
            Error::ScheduleNotFound(_) => false,
            Error::InvalidTransition { .. } => false,
            Error::ExecutionFailure { .. } => true,
            Error::HookTimeout { .. } => true,
            Error::AuditWrite(_) => true,
            Error::VerificationMismatch { .. } => false,
            Error::Storage(_) => true,
            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns the suggested action for automation.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) | Error::PolicyNotFound(_) => SuggestedAction::FixConfig,
            Error::ScheduleConflict { .. } => SuggestedAction::Skip,
            Error::ScheduleNotFound(_) => SuggestedAction::Skip,
            Error::InvalidTransition { .. } => SuggestedAction::Skip,
            Error::ExecutionFailure { .. } => SuggestedAction::RetryNextRun,
            Error::HookTimeout { .. } => SuggestedAction::RetryNextRun,
            Error::AuditWrite(_) => SuggestedAction::Abort,
            Error::VerificationMismatch { .. } => SuggestedAction::ManualInvestigation,
            Error::Storage(_) | Error::Io(_) => SuggestedAction::Abort,
            Error::Json(_) => SuggestedAction::ManualInvestigation,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Run 'rl-core policy check' and fix the reported file.",
            Error::PolicyNotFound(_) => {
                "Add an active policy for this category to policies.json. Other schedules are unaffected."
            }
            Error::ScheduleConflict { .. } => {
                "The existing schedule wins. Use 'rl-core schedule show' to inspect it."
            }
            Error::ScheduleNotFound(_) => "List schedules with 'rl-core schedule list'.",
            Error::InvalidTransition { .. } => {
                "The schedule is in a state that does not allow this operation (terminal schedules never change)."
            }
            Error::ExecutionFailure { .. } => {
                "The schedule is unchanged and will be retried on the next run. Check the owning collaborator."
            }
            Error::HookTimeout { .. } => {
                "A timed-out action leaves the schedule claimed until claim_ttl_secs passes, then the entity is re-checked before retrying. Consider raising hook_timeout_secs."
            }
            Error::AuditWrite(_) => {
                "The audit trail could not be written; no status was committed. Check disk space and permissions."
            }
            Error::VerificationMismatch { .. } => {
                "Recorded evidence does not match its hash. Preserve the audit directory and investigate manually."
            }
            Error::Storage(_) | Error::Io(_) => {
                "The schedule store could not be read or written. Check the data directory and retry."
            }
            Error::Json(_) => "A stored document is not valid JSON. Restore it from backup.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::PolicyNotFound(_) => "Policy Not Found",
            Error::ScheduleConflict { .. } => "Schedule Conflict",
            Error::ScheduleNotFound(_) => "Schedule Not Found",
            Error::InvalidTransition { .. } => "Invalid Transition",
            Error::ExecutionFailure { .. } => "Execution Failure",
            Error::HookTimeout { .. } => "Collaborator Timeout",
            Error::AuditWrite(_) => "Audit Write Failure",
            Error::VerificationMismatch { .. } => "Verification Mismatch",
            Error::Storage(_) => "Storage Failure",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "Serialization Error",
        }
    }

    /// Format for terminal output.
    pub fn format_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }

    /// Structured form for JSON output.
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code(),
            category: self.category(),
            message: self.to_string(),
            recoverable: self.is_recoverable(),
            suggested_action: self.suggested_action(),
        }
    }
}

/// Serializable error payload for machine consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    pub suggested_action: SuggestedAction,
}
