//! Audit log integrity verification.
//!
//! Two levels of checking:
//! - `verify_log` / `verify_log_chain`: hash chain and self-hash of every
//!   entry, across rotated files
//! - `audit_check`: the above plus recomputation of each terminal record's
//!   `verification_hash` from its stored snapshot

use super::entry::{sha256_hex, AuditEntry, AUDIT_SCHEMA_VERSION};
use super::writer::{for_each_entry, log_files, rotation_link, GENESIS_HASH};
use super::AuditError;
use rl_common::{EntityRef, ScheduleId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of hash chain verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the log passed integrity verification.
    pub is_valid: bool,

    /// Total number of entries verified.
    pub entries_verified: u64,

    /// SHA-256 over all entry hashes ("empty" for an empty log).
    pub state_hash: String,

    /// First broken link in the chain, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_link: Option<BrokenLink>,

    /// Entries with invalid self-hashes (tampered).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tampered_entries: Vec<TamperedEntry>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema_warnings: Vec<SchemaWarning>,
}

impl VerificationResult {
    fn empty() -> Self {
        VerificationResult {
            is_valid: true,
            entries_verified: 0,
            state_hash: "empty".to_string(),
            broken_link: None,
            tampered_entries: Vec::new(),
            schema_warnings: Vec::new(),
        }
    }
}

/// Information about a broken link in the hash chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokenLink {
    /// File the break was found in.
    pub file: String,

    /// Line number where the break was detected (1-indexed).
    pub line: usize,

    /// Expected hash (from previous entry).
    pub expected: String,

    /// Actual value of the entry's prev_hash field.
    pub actual: String,

    pub break_type: BreakType,
}

/// Type of hash chain break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    /// The prev_hash doesn't match the previous entry's hash.
    ChainMismatch,
    /// The first entry of a file is neither genesis nor a rotation link.
    InvalidGenesis,
    /// A rotation link names a file other than the preceding one.
    RotationMismatch,
}

/// Information about a tampered (self-hash mismatch) entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TamperedEntry {
    pub file: String,
    pub line: usize,
    pub stored_hash: String,
    pub computed_hash: String,
    pub event_type: String,
}

/// Warning about schema version differences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaWarning {
    pub file: String,
    pub line: usize,
    pub version: String,
    pub expected: String,
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Verify a single audit log file.
///
/// The first entry must link to genesis or to a rotated predecessor.
pub fn verify_log(path: &Path) -> Result<VerificationResult, AuditError> {
    verify_file(path, None)
}

/// `expected_first`: required `prev_hash` of the first entry, when known.
fn verify_file(path: &Path, expected_first: Option<&str>) -> Result<VerificationResult, AuditError> {
    if !path.exists() {
        return Ok(VerificationResult::empty());
    }

    let label = file_label(path);
    let mut entries: Vec<AuditEntry> = Vec::new();
    for_each_entry(path, |entry| entries.push(entry.clone()))?;

    let mut result = VerificationResult::empty();
    let mut prev_hash: Option<String> = None;
    let mut combined = String::new();

    for (idx, entry) in entries.iter().enumerate() {
        let line = idx + 1;

        if entry.schema_version != AUDIT_SCHEMA_VERSION {
            result.schema_warnings.push(SchemaWarning {
                file: label.clone(),
                line,
                version: entry.schema_version.clone(),
                expected: AUDIT_SCHEMA_VERSION.to_string(),
            });
        }

        if !entry.verify_hash() {
            result.tampered_entries.push(TamperedEntry {
                file: label.clone(),
                line,
                stored_hash: entry.entry_hash.clone().unwrap_or_default(),
                computed_hash: entry.recompute_hash(),
                event_type: entry.event_type.to_string(),
            });
        }

        if result.broken_link.is_none() {
            result.broken_link = match &prev_hash {
                None => check_first_link(&label, entry, expected_first),
                Some(expected) if entry.prev_hash != *expected => Some(BrokenLink {
                    file: label.clone(),
                    line,
                    expected: expected.clone(),
                    actual: entry.prev_hash.clone(),
                    break_type: BreakType::ChainMismatch,
                }),
                Some(_) => None,
            };
        }

        if let Some(hash) = &entry.entry_hash {
            combined.push_str(hash);
        }
        prev_hash = Some(entry.hash().to_string());
        result.entries_verified += 1;
    }

    if !combined.is_empty() {
        result.state_hash = sha256_hex(combined.as_bytes());
    }
    result.is_valid = result.broken_link.is_none() && result.tampered_entries.is_empty();
    Ok(result)
}

fn check_first_link(label: &str, entry: &AuditEntry, expected: Option<&str>) -> Option<BrokenLink> {
    let broken = |expected: &str, break_type| {
        Some(BrokenLink {
            file: label.to_string(),
            line: 1,
            expected: expected.to_string(),
            actual: entry.prev_hash.clone(),
            break_type,
        })
    };
    match expected {
        Some(expected) if entry.prev_hash != expected => {
            let break_type = if entry.prev_hash.starts_with("rotated:") {
                BreakType::RotationMismatch
            } else {
                BreakType::InvalidGenesis
            };
            broken(expected, break_type)
        }
        Some(_) => None,
        None if entry.prev_hash == GENESIS_HASH || entry.prev_hash.starts_with("rotated:") => None,
        None => broken(GENESIS_HASH, BreakType::InvalidGenesis),
    }
}

/// Verify rotated files and the current file as one chain.
///
/// The first file must start at genesis; each later file must start with
/// a rotation link naming the file before it.
pub fn verify_log_chain(paths: &[&Path]) -> Result<VerificationResult, AuditError> {
    if paths.is_empty() {
        return Ok(VerificationResult::empty());
    }

    let mut total = VerificationResult::empty();
    let mut combined_state = String::new();

    for (idx, path) in paths.iter().enumerate() {
        let expected_first = if idx == 0 {
            GENESIS_HASH.to_string()
        } else {
            rotation_link(paths[idx - 1])
        };
        let result = verify_file(path, Some(&expected_first))?;

        total.entries_verified += result.entries_verified;
        total.tampered_entries.extend(result.tampered_entries);
        total.schema_warnings.extend(result.schema_warnings);
        if result.entries_verified > 0 {
            combined_state.push_str(&result.state_hash);
        }
        if total.broken_link.is_none() {
            total.broken_link = result.broken_link;
        }
    }

    if !combined_state.is_empty() {
        total.state_hash = sha256_hex(combined_state.as_bytes());
    }
    total.is_valid = total.broken_link.is_none() && total.tampered_entries.is_empty();
    Ok(total)
}

/// A terminal record whose stored evidence no longer matches its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceMismatch {
    pub file: String,
    pub line: usize,
    pub schedule_id: ScheduleId,
    pub entity: EntityRef,
    pub recorded: String,
    pub computed: String,
}

impl EvidenceMismatch {
    pub fn to_error(&self) -> rl_common::Error {
        rl_common::Error::VerificationMismatch {
            entity: self.entity.to_string(),
            recorded: self.recorded.clone(),
            computed: self.computed.clone(),
        }
    }
}

/// Full audit check report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCheckReport {
    pub files: Vec<String>,
    pub chain: VerificationResult,
    pub records_checked: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<EvidenceMismatch>,
}

impl AuditCheckReport {
    pub fn is_clean(&self) -> bool {
        self.chain.is_valid && self.mismatches.is_empty()
    }
}

/// Verify the whole audit directory and recompute every evidence hash.
pub fn audit_check(dir: &Path) -> Result<AuditCheckReport, AuditError> {
    let files = log_files(dir)?;
    let refs: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
    let chain = verify_log_chain(&refs)?;

    let mut records_checked = 0u64;
    let mut mismatches = Vec::new();
    for path in &files {
        let label = file_label(path);
        let mut line = 0usize;
        for_each_entry(path, |entry| {
            line += 1;
            let Some(record) = entry.terminal_record() else {
                return;
            };
            records_checked += 1;
            let computed = sha256_hex(record.entity_snapshot.as_bytes());
            if computed != record.verification_hash {
                mismatches.push(EvidenceMismatch {
                    file: label.clone(),
                    line,
                    schedule_id: record.schedule_id,
                    entity: record.entity,
                    recorded: record.verification_hash,
                    computed,
                });
            }
        })?;
    }

    Ok(AuditCheckReport {
        files: files.iter().map(|p| file_label(p)).collect(),
        chain,
        records_checked,
        mismatches,
    })
}
