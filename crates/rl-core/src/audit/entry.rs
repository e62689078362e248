//! Audit log entry types and schema.
//!
//! Each audit entry follows a consistent schema with:
//! - Timestamp (ISO-8601 with microseconds)
//! - Event type (deletion, anonymization, checkpoint)
//! - Run context for correlation
//! - The terminal action record as structured details
//! - Hash chain fields for integrity

use chrono::{DateTime, NaiveDate, Utc};
use rl_common::{EntityRef, PolicyId, RunId, ScheduleId};
use rl_config::DeleteMode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Schema version for audit log entries.
pub const AUDIT_SCHEMA_VERSION: &str = "1.0.0";

/// Types of events recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Entity deleted by its owning collaborator.
    Deletion,
    /// Entity anonymized in place.
    Anonymization,
    /// Log rotation checkpoint.
    Checkpoint,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditEventType::Deletion => "deletion",
            AuditEventType::Anonymization => "anonymization",
            AuditEventType::Checkpoint => "checkpoint",
        };
        write!(f, "{}", s)
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Schema version for forward compatibility.
    pub schema_version: String,

    /// Timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    pub event_type: AuditEventType,

    /// Run that wrote the entry.
    pub run_id: String,

    /// Host identifier for multi-host correlation.
    pub host_id: String,

    /// Human-readable description of the event.
    pub message: String,

    /// Idempotency key of the transition (`<schedule_id>:<deleted|anonymized>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_key: Option<String>,

    /// Event-specific structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// SHA-256 hash of the previous entry (hex string).
    /// The first entry of a file uses "genesis" or `rotated:<previous file>`.
    pub prev_hash: String,

    /// SHA-256 hash of this entry (excluding this field).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
}

impl AuditEntry {
    pub fn new(
        ctx: &AuditContext,
        event_type: AuditEventType,
        message: impl Into<String>,
        prev_hash: impl Into<String>,
    ) -> Self {
        AuditEntry {
            schema_version: AUDIT_SCHEMA_VERSION.to_string(),
            ts: Utc::now(),
            event_type,
            run_id: ctx.run_id.clone(),
            host_id: ctx.host_id.clone(),
            message: message.into(),
            transition_key: None,
            details: None,
            prev_hash: prev_hash.into(),
            entry_hash: None,
        }
    }

    pub fn with_details<T: Serialize>(
        mut self,
        details: &T,
    ) -> Result<Self, serde_json::Error> {
        self.details = Some(serde_json::to_value(details)?);
        Ok(self)
    }

    pub fn with_transition_key(mut self, key: impl Into<String>) -> Self {
        self.transition_key = Some(key.into());
        self
    }

    /// Compute and set the entry hash over the JSON form with
    /// `entry_hash` cleared.
    pub fn compute_hash(&mut self) -> Result<(), serde_json::Error> {
        self.entry_hash = None;
        let json = serde_json::to_string(self)?;
        self.entry_hash = Some(sha256_hex(json.as_bytes()));
        Ok(())
    }

    /// Recompute the self-hash as stored entries are checked against it.
    pub fn recompute_hash(&self) -> String {
        let mut copy = self.clone();
        copy.entry_hash = None;
        let json = serde_json::to_string(&copy).unwrap_or_default();
        sha256_hex(json.as_bytes())
    }

    pub fn verify_hash(&self) -> bool {
        match &self.entry_hash {
            Some(stored) => *stored == self.recompute_hash(),
            None => false,
        }
    }

    /// Hash used as the next entry's `prev_hash`.
    pub fn hash(&self) -> &str {
        self.entry_hash.as_deref().unwrap_or("invalid")
    }

    /// Parse the details as a terminal action record.
    pub fn terminal_record(&self) -> Option<TerminalActionRecord> {
        match self.event_type {
            AuditEventType::Deletion | AuditEventType::Anonymization => self
                .details
                .as_ref()
                .and_then(|d| serde_json::from_value(d.clone()).ok()),
            AuditEventType::Checkpoint => None,
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Context for generating audit entries with consistent IDs.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub run_id: String,
    pub host_id: String,
}

impl AuditContext {
    pub fn new(run_id: &RunId, host_id: impl Into<String>) -> Self {
        AuditContext {
            run_id: run_id.to_string(),
            host_id: host_id.into(),
        }
    }
}

/// Evidence of one executed deletion or anonymization.
///
/// Written once and never updated. `verification_hash` is the SHA-256 of
/// `entity_snapshot` taken before the hook ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalActionRecord {
    pub schedule_id: ScheduleId,
    pub entity: EntityRef,
    pub category: String,
    pub policy_id: PolicyId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_mode: Option<DeleteMode>,

    /// Canonical JSON of the entity before the action.
    pub entity_snapshot: String,
    pub verification_hash: String,

    /// Canonical JSON returned by the anonymization hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymized_snapshot: Option<String>,

    pub executed_by: String,
    pub executed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,

    pub data_creation_date: NaiveDate,
    pub last_activity_date: NaiveDate,
    pub deletion_date: NaiveDate,
}

impl TerminalActionRecord {
    pub fn event_type(&self) -> AuditEventType {
        if self.anonymized_snapshot.is_some() {
            AuditEventType::Anonymization
        } else {
            AuditEventType::Deletion
        }
    }
}

/// Details for checkpoint events (log rotation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDetails {
    /// Entries in the file before this checkpoint.
    pub entry_count: u64,
    /// SHA-256 over the concatenated entry hashes of the file.
    pub state_hash: String,
    /// File the chain continues in, when rotating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_log_file: Option<String>,
    /// rotation, shutdown or manual
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AuditContext {
        AuditContext {
            run_id: "run-0123456789ab".to_string(),
            host_id: "host-a".to_string(),
        }
    }

    #[test]
    fn test_hash_detects_tampering() {
        let mut entry = AuditEntry::new(&ctx(), AuditEventType::Deletion, "Deleted patient:1", "genesis");
        entry.compute_hash().unwrap();
        assert_eq!(entry.hash().len(), 64);
        assert!(entry.verify_hash());

        entry.message = "Deleted patient:2".to_string();
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_missing_hash_never_verifies() {
        let entry = AuditEntry::new(&ctx(), AuditEventType::Checkpoint, "cp", "genesis");
        assert!(!entry.verify_hash());
        assert_eq!(entry.hash(), "invalid");
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(AuditEventType::Deletion.to_string(), "deletion");
        assert_eq!(AuditEventType::Anonymization.to_string(), "anonymization");
        assert_eq!(
            serde_json::to_string(&AuditEventType::Checkpoint).unwrap(),
            "\"checkpoint\""
        );
    }
}
