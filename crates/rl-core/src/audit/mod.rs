//! Tamper-evident audit trail of executed terminal actions.
//!
//! Every deletion and anonymization produces exactly one entry. Each entry
//! includes a SHA-256 hash of the previous entry, creating an append-only
//! log where tampering can be detected.
//!
//! # Design
//!
//! - **Format**: JSON Lines (JSONL), one entry per line, fsynced per write
//! - **Hash chain**: each entry carries `prev_hash` and its own `entry_hash`
//! - **Idempotency**: entries carry a transition key; a key is never written
//!   twice, which is what lets a crashed run commit without re-executing
//! - **Rotation**: size based, the old file ends with a checkpoint and the
//!   new file's first entry links to it by name
//! - **Verification**: `verify_log_chain()` validates the chain across files;
//!   `audit_check()` additionally recomputes each record's evidence hash
//!
//! # File Location
//!
//! `<data_dir>/audit/audit.jsonl`; rotated files are named
//! `audit.<seq>.<YYYYMMDD-HHMMSS>.jsonl`.

mod entry;
mod verify;
mod writer;

pub use entry::{
    AuditContext, AuditEntry, AuditEventType, CheckpointDetails, TerminalActionRecord,
    AUDIT_SCHEMA_VERSION,
};
pub use verify::{
    audit_check, verify_log, verify_log_chain, AuditCheckReport, BreakType, BrokenLink,
    EvidenceMismatch, SchemaWarning, TamperedEntry, VerificationResult,
};
pub use writer::{log_files, AuditLog, GENESIS_HASH};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during audit logging operations.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize audit entry: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse audit entry at {path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("transition {0} is already recorded")]
    DuplicateTransition(String),

    #[error("hash chain verification failed: {message}")]
    Integrity { message: String },
}

impl From<AuditError> for rl_common::Error {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Integrity { message } => rl_common::Error::VerificationMismatch {
                entity: "audit log".to_string(),
                recorded: message,
                computed: "chain".to_string(),
            },
            other => rl_common::Error::AuditWrite(other.to_string()),
        }
    }
}

/// Directory name for audit logs within the data directory.
pub const AUDIT_DIR_NAME: &str = "audit";

/// Current audit log filename.
pub(crate) const AUDIT_LOG_FILENAME: &str = "audit.jsonl";

/// Audit directory for a data directory.
pub fn audit_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(AUDIT_DIR_NAME)
}

/// Idempotency key of a terminal transition.
pub fn transition_key(schedule_id: &rl_common::ScheduleId, event: AuditEventType) -> String {
    let suffix = match event {
        AuditEventType::Deletion => "deleted",
        AuditEventType::Anonymization => "anonymized",
        AuditEventType::Checkpoint => "checkpoint",
    };
    format!("{}:{}", schedule_id, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_key_format() {
        let id = rl_common::ScheduleId("rs-3f9a0c1d22be".to_string());
        assert_eq!(
            transition_key(&id, AuditEventType::Deletion),
            "rs-3f9a0c1d22be:deleted"
        );
        assert_eq!(
            transition_key(&id, AuditEventType::Anonymization),
            "rs-3f9a0c1d22be:anonymized"
        );
    }
}
