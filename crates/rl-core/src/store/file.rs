//! File-backed schedule store.
//!
//! Layout under the data directory:
//!
//! ```text
//! schedules/
//!   rs-3f9a0c1d22be.json      schedule document
//!   rs-3f9a0c1d22be.lock      advisory flock for conditional writes
//!   by-entity/<sha256 hex>    entity index, content is the schedule id
//! ```
//!
//! The entity index file is created with `create_new`, so two processes
//! racing to create a schedule for the same entity cannot both win.

use super::{check_expected, CasOutcome, ScheduleFilter, ScheduleStore, StoreError};
use crate::fsutil::{write_atomic, LockError, RecordLock};
use crate::schedule::{RetentionSchedule, ScheduleStatus};
use rl_common::{EntityRef, ScheduleId};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_BACKOFF: Duration = Duration::from_millis(10);

/// Directory-of-documents schedule store.
#[derive(Debug, Clone)]
pub struct FileScheduleStore {
    root: PathBuf,
}

impl FileScheduleStore {
    /// Open (creating if needed) the store under `<data_dir>/schedules`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let root = data_dir.join("schedules");
        let index = root.join("by-entity");
        std::fs::create_dir_all(&index).map_err(|e| io_err(&index, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, id: &ScheduleId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn lock_path(&self, id: &ScheduleId) -> PathBuf {
        self.root.join(format!("{}.lock", id))
    }

    fn index_path(&self, entity: &EntityRef) -> PathBuf {
        let digest = Sha256::digest(entity.key().as_bytes());
        self.root.join("by-entity").join(hex::encode(digest))
    }

    fn lock(&self, id: &ScheduleId) -> Result<RecordLock, StoreError> {
        let path = self.lock_path(id);
        RecordLock::acquire(&path, LOCK_ATTEMPTS, LOCK_BACKOFF).map_err(|e| match e {
            LockError::Busy => StoreError::Locked(id.clone()),
            LockError::Io(source) => io_err(&path, source),
        })
    }

    fn read_doc(&self, path: &Path) -> Result<Option<RetentionSchedule>, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_doc(&self, schedule: &RetentionSchedule) -> Result<(), StoreError> {
        let path = self.doc_path(&schedule.id);
        let content = serde_json::to_vec_pretty(schedule).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &content).map_err(|e| io_err(&path, e))
    }

    fn read_index(&self, path: &Path) -> Result<Option<ScheduleId>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(ScheduleId(content.trim().to_string()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }

    /// Claim the entity index for `id`. Returns the existing owner when the
    /// entity already has a live schedule.
    fn claim_index(&self, entity: &EntityRef, id: &ScheduleId) -> Result<Option<ScheduleId>, StoreError> {
        let path = self.index_path(entity);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(id.as_str().as_bytes())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| io_err(&path, e))?;
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let Some(existing) = self.read_index(&path)? else {
                    // Removed between our attempt and the read; retry once.
                    return self.claim_index(entity, id);
                };
                let _guard = self.lock(&existing)?;
                if self.doc_path(&existing).exists() {
                    return Ok(Some(existing));
                }
                // Index left behind by an insert that never wrote its document.
                tracing::warn!(
                    entity = %entity,
                    orphan = %existing,
                    "replacing orphaned entity index"
                );
                write_atomic(&path, id.as_str().as_bytes()).map_err(|e| io_err(&path, e))?;
                Ok(None)
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn swap(
        &self,
        expected_status: Option<ScheduleStatus>,
        expected_revision: u64,
        mut next: RetentionSchedule,
    ) -> Result<CasOutcome, StoreError> {
        let _guard = self.lock(&next.id)?;
        let current = self
            .read_doc(&self.doc_path(&next.id))?
            .ok_or_else(|| StoreError::NotFound(next.id.clone()))?;
        if !check_expected(&current, expected_status, expected_revision) {
            return Ok(CasOutcome::Conflict(current));
        }
        next.revision = current.revision + 1;
        self.write_doc(&next)?;
        Ok(CasOutcome::Swapped(next))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ScheduleStore for FileScheduleStore {
    fn insert(&self, mut schedule: RetentionSchedule) -> Result<RetentionSchedule, StoreError> {
        // Held across index claim and document write, so a racing insert
        // that finds our index entry waits for the document instead of
        // treating it as orphaned.
        let _guard = self.lock(&schedule.id)?;
        if let Some(existing) = self.claim_index(&schedule.entity, &schedule.id)? {
            return Err(StoreError::Conflict {
                entity: schedule.entity,
                existing,
            });
        }
        schedule.revision = 1;
        self.write_doc(&schedule)?;
        Ok(schedule)
    }

    fn get(&self, id: &ScheduleId) -> Result<Option<RetentionSchedule>, StoreError> {
        self.read_doc(&self.doc_path(id))
    }

    fn get_by_entity(&self, entity: &EntityRef) -> Result<Option<RetentionSchedule>, StoreError> {
        match self.read_index(&self.index_path(entity))? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    fn update_dates(
        &self,
        expected_revision: u64,
        next: RetentionSchedule,
    ) -> Result<CasOutcome, StoreError> {
        self.swap(None, expected_revision, next)
    }

    fn compare_and_swap(
        &self,
        expected_status: ScheduleStatus,
        expected_revision: u64,
        next: RetentionSchedule,
    ) -> Result<CasOutcome, StoreError> {
        self.swap(Some(expected_status), expected_revision, next)
    }

    fn list(&self, filter: &ScheduleFilter) -> Result<Vec<RetentionSchedule>, StoreError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            let path = entry.path();
            let is_doc = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("rs-") && n.ends_with(".json"));
            if !is_doc {
                continue;
            }
            if let Some(schedule) = self.read_doc(&path)? {
                if filter.matches(&schedule) {
                    out.push(schedule);
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}
