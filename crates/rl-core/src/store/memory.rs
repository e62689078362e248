//! In-process schedule store.

use super::{check_expected, CasOutcome, ScheduleFilter, ScheduleStore, StoreError};
use crate::schedule::{RetentionSchedule, ScheduleStatus};
use rl_common::{EntityRef, ScheduleId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<ScheduleId, RetentionSchedule>,
    by_entity: HashMap<EntityRef, ScheduleId>,
}

/// Mutex-guarded map store. Used by tests and embedders that keep
/// schedules in their own persistence layer.
#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    inner: Mutex<Inner>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    fn swap(
        &self,
        expected_status: Option<ScheduleStatus>,
        expected_revision: u64,
        mut next: RetentionSchedule,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.lock()?;
        let current = inner
            .by_id
            .get(&next.id)
            .ok_or_else(|| StoreError::NotFound(next.id.clone()))?;
        if !check_expected(current, expected_status, expected_revision) {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        next.revision = current.revision + 1;
        inner.by_id.insert(next.id.clone(), next.clone());
        Ok(CasOutcome::Swapped(next))
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn insert(&self, mut schedule: RetentionSchedule) -> Result<RetentionSchedule, StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.by_entity.get(&schedule.entity) {
            return Err(StoreError::Conflict {
                entity: schedule.entity.clone(),
                existing: existing.clone(),
            });
        }
        schedule.revision = 1;
        inner
            .by_entity
            .insert(schedule.entity.clone(), schedule.id.clone());
        inner.by_id.insert(schedule.id.clone(), schedule.clone());
        Ok(schedule)
    }

    fn get(&self, id: &ScheduleId) -> Result<Option<RetentionSchedule>, StoreError> {
        Ok(self.lock()?.by_id.get(id).cloned())
    }

    fn get_by_entity(&self, entity: &EntityRef) -> Result<Option<RetentionSchedule>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .by_entity
            .get(entity)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
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
        let inner = self.lock()?;
        let mut out: Vec<_> = inner
            .by_id
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}
