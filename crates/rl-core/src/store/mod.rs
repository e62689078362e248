//! Schedule persistence.
//!
//! The store is the only resource shared between schedules in a run. It
//! offers per-record optimistic concurrency: every record carries a
//! `revision`, and writes state the revision (and for status transitions,
//! the status) they expect to replace. There is no store-wide lock, so runs
//! can be sharded by entity type or hash range without coordination.

mod file;
mod memory;

pub use file::FileScheduleStore;
pub use memory::MemoryScheduleStore;

use crate::schedule::{RetentionSchedule, ScheduleStatus};
use chrono::NaiveDate;
use rl_common::{EntityRef, EntityType, ScheduleId, ShardSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the schedule store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schedule already exists for {entity}: {existing}")]
    Conflict {
        entity: EntityRef,
        existing: ScheduleId,
    },

    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt schedule document {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("schedule {0} is locked by another writer")]
    Locked(ScheduleId),

    #[error("schedule store state is poisoned")]
    Poisoned,
}

impl From<StoreError> for rl_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { entity, existing } => rl_common::Error::ScheduleConflict {
                entity: entity.to_string(),
                existing: existing.to_string(),
            },
            StoreError::NotFound(id) => rl_common::Error::ScheduleNotFound(id.to_string()),
            other => rl_common::Error::Storage(other.to_string()),
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write happened; carries the stored record with its new revision.
    Swapped(RetentionSchedule),
    /// Someone else wrote first; carries the current record.
    Conflict(RetentionSchedule),
}

impl CasOutcome {
    pub fn is_swapped(&self) -> bool {
        matches!(self, CasOutcome::Swapped(_))
    }
}

/// Selection criteria for scans and listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ScheduleStatus>,
}

impl ScheduleFilter {
    pub fn matches(&self, schedule: &RetentionSchedule) -> bool {
        if let Some(category) = &self.category {
            if &schedule.category != category {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if &schedule.entity.entity_type != entity_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if schedule.status != status {
                return false;
            }
        }
        self.shard
            .map_or(true, |shard| shard.contains(&schedule.entity))
    }
}

/// `active` schedules whose warning date has arrived.
pub fn is_due_for_warning(schedule: &RetentionSchedule, today: NaiveDate) -> bool {
    schedule.status == ScheduleStatus::Active && schedule.dates.warning_date <= today
}

/// Warned, grace, claimed and held schedules past their retention window.
///
/// Held schedules are included once past their deletion date so the run can
/// report them as skipped. `active` schedules are never in this batch: a
/// warning must be recorded before deletion can be scheduled.
pub fn is_due_for_deletion(schedule: &RetentionSchedule, today: NaiveDate) -> bool {
    match schedule.status {
        ScheduleStatus::WarningSent
        | ScheduleStatus::GracePeriod
        | ScheduleStatus::ScheduledDeletion => schedule.dates.retention_end_date <= today,
        ScheduleStatus::LegalHold => schedule.dates.deletion_date <= today,
        _ => false,
    }
}

/// Persistent repository of retention schedules.
///
/// Implementations guarantee at most one schedule per `EntityRef` and
/// atomic conditional writes per record.
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule. Fails with [`StoreError::Conflict`] when the
    /// entity already has one; the existing schedule wins.
    fn insert(&self, schedule: RetentionSchedule) -> Result<RetentionSchedule, StoreError>;

    fn get(&self, id: &ScheduleId) -> Result<Option<RetentionSchedule>, StoreError>;

    fn get_by_entity(&self, entity: &EntityRef) -> Result<Option<RetentionSchedule>, StoreError>;

    /// Replace a record if its revision is still `expected_revision`.
    ///
    /// Used for date recomputation, where the status may legitimately be
    /// anything non-terminal.
    fn update_dates(
        &self,
        expected_revision: u64,
        next: RetentionSchedule,
    ) -> Result<CasOutcome, StoreError>;

    /// Replace a record if both its status and revision are unchanged.
    fn compare_and_swap(
        &self,
        expected_status: ScheduleStatus,
        expected_revision: u64,
        next: RetentionSchedule,
    ) -> Result<CasOutcome, StoreError>;

    /// Schedules matching `filter` that are due for a warning, oldest
    /// warning date first.
    fn due_for_warning(
        &self,
        today: NaiveDate,
        filter: &ScheduleFilter,
    ) -> Result<Vec<RetentionSchedule>, StoreError> {
        let mut due: Vec<_> = self
            .list(filter)?
            .into_iter()
            .filter(|s| is_due_for_warning(s, today))
            .collect();
        due.sort_by(|a, b| {
            (a.dates.warning_date, &a.id).cmp(&(b.dates.warning_date, &b.id))
        });
        Ok(due)
    }

    /// Schedules matching `filter` in the deletion batch, oldest deletion
    /// date first.
    fn due_for_deletion(
        &self,
        today: NaiveDate,
        filter: &ScheduleFilter,
    ) -> Result<Vec<RetentionSchedule>, StoreError> {
        let mut due: Vec<_> = self
            .list(filter)?
            .into_iter()
            .filter(|s| is_due_for_deletion(s, today))
            .collect();
        due.sort_by(|a, b| {
            (a.dates.deletion_date, &a.id).cmp(&(b.dates.deletion_date, &b.id))
        });
        Ok(due)
    }

    /// All schedules matching `filter`, ordered by id.
    fn list(&self, filter: &ScheduleFilter) -> Result<Vec<RetentionSchedule>, StoreError>;
}

/// Shared conditional-write check used by the backends.
pub(crate) fn check_expected(
    current: &RetentionSchedule,
    expected_status: Option<ScheduleStatus>,
    expected_revision: u64,
) -> bool {
    current.revision == expected_revision
        && expected_status.map_or(true, |status| current.status == status)
}
