//! Exit codes for the rl-core CLI.
//!
//! Exit codes communicate the run outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-6: Operational outcomes (the run itself completed or stopped cleanly)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal and storage errors

use rl_common::{Error, ErrorCategory};

/// Exit codes for rl-core operations.
///
/// These codes are a stable contract for schedulers and cron wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-6)
    // ========================================================================
    /// Success: every schedule processed without failure
    Clean = 0,

    /// Partial failure: at least one schedule failed; the run completed
    PartialFail = 3,

    /// Run interrupted between schedules; the next run resumes
    Interrupted = 6,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Policy file or settings invalid or missing
    ConfigError = 11,

    /// Schedule or entity not found
    NotFound = 12,

    /// Operation not allowed in the schedule's current status
    InvalidTransition = 13,

    /// Conflicting write or duplicate schedule
    ConflictError = 14,

    /// Audit chain broken or evidence hash mismatch
    VerificationFailed = 15,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// Store or audit log could not be read or written
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Codes 0-6 describe how a run went; they are not errors.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Name used in JSON error payloads.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PartialFail => "ERR_PARTIAL",
            ExitCode::Interrupted => "ERR_INTERRUPTED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::InvalidTransition => "ERR_INVALID_TRANSITION",
            ExitCode::ConflictError => "ERR_CONFLICT",
            ExitCode::VerificationFailed => "ERR_VERIFICATION",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Exit code for an error that ended a command.
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::ScheduleNotFound(_) => ExitCode::NotFound,
            Error::InvalidTransition { .. } => ExitCode::InvalidTransition,
            Error::ScheduleConflict { .. } => ExitCode::ConflictError,
            Error::VerificationMismatch { .. } => ExitCode::VerificationFailed,
            Error::Json(_) => ExitCode::InternalError,
            other => match other.category() {
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Execution => ExitCode::PartialFail,
                ErrorCategory::Schedule => ExitCode::InvalidTransition,
                ErrorCategory::Audit | ErrorCategory::Storage => ExitCode::IoError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert!(ExitCode::Clean.is_success());
        assert!(ExitCode::PartialFail.is_operational());
        assert!(!ExitCode::PartialFail.is_success());
        assert!(ExitCode::Interrupted.is_operational());
        assert!(ExitCode::ConfigError.is_user_error());
        assert!(ExitCode::VerificationFailed.is_user_error());
        assert!(ExitCode::IoError.is_internal_error());
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (Error::PolicyNotFound("x".into()), ExitCode::ConfigError),
            (Error::ScheduleNotFound("rs-1".into()), ExitCode::NotFound),
            (
                Error::ScheduleConflict {
                    entity: "patient:1".into(),
                    existing: "rs-1".into(),
                },
                ExitCode::ConflictError,
            ),
            (
                Error::InvalidTransition {
                    schedule_id: "rs-1".into(),
                    from: "deleted".into(),
                    to: "legal_hold".into(),
                },
                ExitCode::InvalidTransition,
            ),
            (Error::AuditWrite("disk full".into()), ExitCode::IoError),
            (Error::Storage("disk full".into()), ExitCode::IoError),
        ];
        for (err, expected) in cases {
            assert_eq!(ExitCode::for_error(&err), expected, "{}", err);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::PartialFail.to_string(), "ERR_PARTIAL (3)");
    }
}
