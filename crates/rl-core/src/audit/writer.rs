//! Audit log writer with hash chain and rotation support.
//!
//! The writer maintains the hash chain integrity and handles log rotation
//! with checkpoint preservation.

use super::entry::{
    sha256_hex, AuditContext, AuditEntry, AuditEventType, CheckpointDetails, TerminalActionRecord,
};
use super::{AuditError, AUDIT_LOG_FILENAME};
use crate::fsutil::{LockError, RecordLock};
use chrono::Utc;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The special hash used for the first entry in a fresh log.
pub const GENESIS_HASH: &str = "genesis";

/// The audit log writer.
///
/// Maintains the hash chain, the set of recorded transition keys, and
/// file rotation. Not shared between threads; the orchestrator owns it.
/// Writers in separate processes serialize on `audit.lock` and re-read
/// whatever the others appended before extending the chain.
#[derive(Debug)]
pub struct AuditLog {
    dir: PathBuf,
    /// Path to the current audit log file.
    path: PathBuf,
    /// Rotation threshold in bytes (0 disables rotation).
    max_bytes: u64,
    /// Hash of the last entry written (for chaining).
    last_hash: String,
    /// Entries in the current file.
    entry_count: u64,
    /// Transition keys across current and rotated files.
    transitions: HashSet<String>,
    file: Option<File>,
    /// What the files looked like after our last read or write.
    synced: DiskState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DiskState {
    files: usize,
    current_len: u64,
}

const AUDIT_LOCK_FILENAME: &str = "audit.lock";
const LOCK_ATTEMPTS: u32 = 500;
const LOCK_BACKOFF: Duration = Duration::from_millis(10);

impl AuditLog {
    /// Open the log in `dir`, creating the directory if needed, and index
    /// every transition already recorded.
    pub fn open(dir: &Path, max_bytes: u64) -> Result<Self, AuditError> {
        std::fs::create_dir_all(dir).map_err(|e| AuditError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut log = AuditLog {
            dir: dir.to_path_buf(),
            path: dir.join(AUDIT_LOG_FILENAME),
            max_bytes,
            last_hash: GENESIS_HASH.to_string(),
            entry_count: 0,
            transitions: HashSet::new(),
            file: None,
            synced: DiskState::default(),
        };
        log.reindex()?;
        Ok(log)
    }

    /// Rebuild the in-memory view (chain head, entry count, transition
    /// keys) from the files on disk.
    fn reindex(&mut self) -> Result<(), AuditError> {
        let files = log_files(&self.dir)?;

        let mut transitions = HashSet::new();
        let mut last_hash = GENESIS_HASH.to_string();
        let mut entry_count = 0u64;
        for file in &files {
            let is_current = *file == self.path;
            let mut count = 0u64;
            for_each_entry(file, |entry| {
                if let Some(key) = &entry.transition_key {
                    transitions.insert(key.clone());
                }
                if let Some(hash) = &entry.entry_hash {
                    last_hash = hash.clone();
                }
                count += 1;
            })?;
            if is_current {
                entry_count = count;
            }
        }

        // Rotated files exist but no current file yet: continue from the
        // newest rotated file.
        if !self.path.exists() {
            if let Some(newest) = files.last() {
                last_hash = rotation_link(newest);
            }
        }

        self.transitions = transitions;
        self.last_hash = last_hash;
        self.entry_count = entry_count;
        self.file = None;
        self.synced = self.disk_state(files.len())?;
        Ok(())
    }

    fn disk_state(&self, files: usize) -> Result<DiskState, AuditError> {
        let current_len = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(AuditError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        Ok(DiskState { files, current_len })
    }

    /// Take the cross-process writer lock and catch up with entries other
    /// processes appended since our last write.
    fn lock_and_sync(&mut self) -> Result<RecordLock, AuditError> {
        let lock_path = self.dir.join(AUDIT_LOCK_FILENAME);
        let guard = RecordLock::acquire(&lock_path, LOCK_ATTEMPTS, LOCK_BACKOFF).map_err(|e| {
            let source = match e {
                LockError::Busy => std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "audit log is locked by another writer",
                ),
                LockError::Io(e) => e,
            };
            AuditError::Io {
                path: lock_path.clone(),
                source,
            }
        })?;

        let files = log_files(&self.dir)?.len();
        if self.disk_state(files)? != self.synced {
            tracing::debug!(dir = %self.dir.display(), "audit log changed on disk, reindexing");
            self.reindex()?;
        }
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Whether a transition with this key has already been recorded.
    pub fn has_transition(&self, key: &str) -> bool {
        self.transitions.contains(key)
    }

    /// Like [`has_transition`](Self::has_transition), after catching up
    /// with entries other processes appended.
    pub fn refresh_transition(&mut self, key: &str) -> Result<bool, AuditError> {
        let _guard = self.lock_and_sync()?;
        Ok(self.has_transition(key))
    }

    /// Append the evidence record of one terminal action.
    ///
    /// Fails with [`AuditError::DuplicateTransition`] if `key` is already
    /// in the log. On success the entry is on disk (fsynced).
    pub fn record_terminal(
        &mut self,
        ctx: &AuditContext,
        record: &TerminalActionRecord,
        key: &str,
    ) -> Result<AuditEntry, AuditError> {
        let _guard = self.lock_and_sync()?;
        if self.has_transition(key) {
            return Err(AuditError::DuplicateTransition(key.to_string()));
        }
        if self.should_rotate()? {
            self.rotate_locked(ctx)?;
        }

        let event_type = record.event_type();
        let verb = match event_type {
            AuditEventType::Anonymization => "Anonymized",
            _ => "Deleted",
        };
        let message = format!(
            "{} {} under {} (schedule {})",
            verb, record.entity, record.policy_id, record.schedule_id
        );
        let entry = AuditEntry::new(ctx, event_type, message, &self.last_hash)
            .with_details(record)
            .map_err(|source| AuditError::Serialization { source })?
            .with_transition_key(key);

        let written = self.write_entry(entry)?;
        self.transitions.insert(key.to_string());
        Ok(written)
    }

    /// Write a checkpoint entry and return the state hash of the file.
    pub fn write_checkpoint(
        &mut self,
        ctx: &AuditContext,
        reason: &str,
    ) -> Result<String, AuditError> {
        let _guard = self.lock_and_sync()?;
        self.checkpoint(ctx, reason, None)
    }

    /// Close the current file with a checkpoint, rename it, and start a new
    /// file whose first entry links back to it.
    pub fn rotate(&mut self, ctx: &AuditContext) -> Result<PathBuf, AuditError> {
        let _guard = self.lock_and_sync()?;
        self.rotate_locked(ctx)
    }

    fn rotate_locked(&mut self, ctx: &AuditContext) -> Result<PathBuf, AuditError> {
        let seq = log_files(&self.dir)?
            .iter()
            .filter(|p| **p != self.path)
            .count()
            + 1;
        let rotated_name = format!(
            "audit.{:06}.{}.jsonl",
            seq,
            Utc::now().format("%Y%m%d-%H%M%S")
        );
        let rotated_path = self.dir.join(&rotated_name);

        self.checkpoint(ctx, "rotation", Some(rotated_name))?;
        self.file = None;

        std::fs::rename(&self.path, &rotated_path).map_err(|e| AuditError::Io {
            path: self.path.clone(),
            source: e,
        })?;

        self.last_hash = rotation_link(&rotated_path);
        self.entry_count = 0;
        self.synced = self.disk_state(log_files(&self.dir)?.len())?;

        tracing::info!(rotated = %rotated_path.display(), "audit log rotated");
        Ok(rotated_path)
    }

    fn checkpoint(
        &mut self,
        ctx: &AuditContext,
        reason: &str,
        next_log_file: Option<String>,
    ) -> Result<String, AuditError> {
        let state_hash = self.compute_state_hash()?;
        let details = CheckpointDetails {
            entry_count: self.entry_count,
            state_hash: state_hash.clone(),
            next_log_file,
            reason: reason.to_string(),
        };
        let message = format!(
            "Checkpoint: {} entries, state_hash={}",
            self.entry_count,
            &state_hash[..16]
        );
        let entry = AuditEntry::new(ctx, AuditEventType::Checkpoint, message, &self.last_hash)
            .with_details(&details)
            .map_err(|source| AuditError::Serialization { source })?;
        self.write_entry(entry)?;
        Ok(state_hash)
    }

    /// Chain, hash, append and fsync one entry.
    fn write_entry(&mut self, mut entry: AuditEntry) -> Result<AuditEntry, AuditError> {
        entry.prev_hash = self.last_hash.clone();
        entry
            .compute_hash()
            .map_err(|source| AuditError::Serialization { source })?;
        let mut line =
            serde_json::to_string(&entry).map_err(|source| AuditError::Serialization { source })?;
        line.push('\n');

        let path = self.path.clone();
        let io_err = |e| AuditError::Io {
            path: path.clone(),
            source: e,
        };
        let file = self.ensure_open()?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        let current_len = file.metadata().map_err(io_err)?.len();

        if self.synced.current_len == 0 {
            self.synced.files = log_files(&self.dir)?.len();
        }
        self.synced.current_len = current_len;
        self.last_hash = entry.hash().to_string();
        self.entry_count += 1;
        Ok(entry)
    }

    fn should_rotate(&self) -> Result<bool, AuditError> {
        if self.max_bytes == 0 || !self.path.exists() {
            return Ok(false);
        }
        let metadata = std::fs::metadata(&self.path).map_err(|e| AuditError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(metadata.len() >= self.max_bytes)
    }

    fn ensure_open(&mut self) -> Result<&mut File, AuditError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| AuditError::Io {
                    path: self.path.clone(),
                    source: e,
                })?;
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(AuditError::Io {
                path: self.path.clone(),
                source: std::io::Error::other("audit file handle unavailable"),
            }),
        }
    }

    /// SHA-256 over the concatenated entry hashes of the current file.
    fn compute_state_hash(&self) -> Result<String, AuditError> {
        let mut combined = String::new();
        if self.path.exists() {
            for_each_entry(&self.path, |entry| {
                if let Some(hash) = &entry.entry_hash {
                    combined.push_str(hash);
                }
            })?;
        }
        Ok(sha256_hex(combined.as_bytes()))
    }
}

/// `prev_hash` marker for the first entry after a rotation.
pub(crate) fn rotation_link(rotated: &Path) -> String {
    rotated
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| format!("rotated:{}", s))
        .unwrap_or_else(|| "rotated".to_string())
}

/// Audit files in chain order: rotated files by name, then the current file.
pub fn log_files(dir: &Path) -> Result<Vec<PathBuf>, AuditError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| AuditError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut rotated = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AuditError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name != AUDIT_LOG_FILENAME && name.starts_with("audit.") && name.ends_with(".jsonl") {
            rotated.push(entry.path());
        }
    }
    rotated.sort();

    let current = dir.join(AUDIT_LOG_FILENAME);
    if current.exists() {
        rotated.push(current);
    }
    Ok(rotated)
}

/// Parse every non-blank line of an audit file.
pub(crate) fn for_each_entry<F>(path: &Path, mut f: F) -> Result<(), AuditError>
where
    F: FnMut(&AuditEntry),
{
    let file = File::open(path).map_err(|e| AuditError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AuditError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| AuditError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            source: e,
        })?;
        f(&entry);
    }
    Ok(())
}
