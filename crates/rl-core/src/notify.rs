//! Warning dispatch.
//!
//! The engine only hands a warning request to a notification collaborator;
//! delivery (email, SMS) is the collaborator's concern. Failures are not
//! retried in-line: the schedule stays `active` and the next run tries again.

use crate::bounded::{call_bounded, Bounded};
use crate::schedule::RetentionSchedule;
use chrono::{DateTime, NaiveDate, Utc};
use rl_common::{EntityRef, PolicyId, ScheduleId};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("warning dispatch failed: {0}")]
    Failed(String),

    #[error("warning dispatch timed out after {0}ms")]
    Timeout(u64),

    #[error("outbox I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<NotifyError> for rl_common::Error {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Timeout(millis) => rl_common::Error::HookTimeout {
                entity: "warning dispatcher".to_string(),
                millis,
            },
            other => rl_common::Error::ExecutionFailure {
                entity: "warning dispatcher".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Outbound warning interface, implemented by the notification collaborator.
pub trait WarningDispatcher: Send + Sync {
    fn send_warning(
        &self,
        entity: &EntityRef,
        schedule: &RetentionSchedule,
    ) -> Result<(), NotifyError>;
}

/// One warning, as handed to the notification collaborator.
///
/// `request_id` is stable per schedule and warning date, so a collaborator
/// can drop duplicates sent by racing runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningRequest {
    pub request_id: String,
    pub entity: EntityRef,
    pub schedule_id: ScheduleId,
    pub category: String,
    pub policy_id: PolicyId,
    pub warning_date: NaiveDate,
    pub retention_end_date: NaiveDate,
    pub deletion_date: NaiveDate,
    pub requested_at: DateTime<Utc>,
}

impl WarningRequest {
    pub fn new(entity: &EntityRef, schedule: &RetentionSchedule, now: DateTime<Utc>) -> Self {
        WarningRequest {
            request_id: format!("{}:warning:{}", schedule.id, schedule.dates.warning_date),
            entity: entity.clone(),
            schedule_id: schedule.id.clone(),
            category: schedule.category.clone(),
            policy_id: schedule.policy_id.clone(),
            warning_date: schedule.dates.warning_date,
            retention_end_date: schedule.dates.retention_end_date,
            deletion_date: schedule.dates.deletion_date,
            requested_at: now,
        }
    }
}

/// Appends warning requests as JSON lines to `<data_dir>/outbox/warnings.jsonl`.
#[derive(Debug)]
pub struct OutboxDispatcher {
    path: PathBuf,
    // Serializes appends from this process; lines are small enough that
    // O_APPEND keeps them whole across processes.
    guard: Mutex<()>,
}

impl OutboxDispatcher {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("outbox").join("warnings.jsonl"),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All requests written so far.
    pub fn read_all(&self) -> Result<Vec<WarningRequest>, NotifyError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(NotifyError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| NotifyError::Failed(e.to_string())))
            .collect()
    }
}

impl WarningDispatcher for OutboxDispatcher {
    fn send_warning(
        &self,
        entity: &EntityRef,
        schedule: &RetentionSchedule,
    ) -> Result<(), NotifyError> {
        let request = WarningRequest::new(entity, schedule, Utc::now());
        let mut line =
            serde_json::to_string(&request).map_err(|e| NotifyError::Failed(e.to_string()))?;
        line.push('\n');

        let io_err = |source| NotifyError::Io {
            path: self.path.clone(),
            source,
        };
        let _guard = self
            .guard
            .lock()
            .map_err(|_| NotifyError::Failed("outbox lock poisoned".to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(())
    }
}

/// Call `dispatcher` on a worker thread, bounded by `timeout`.
pub fn dispatch_bounded(
    dispatcher: &Arc<dyn WarningDispatcher>,
    schedule: &RetentionSchedule,
    timeout: Duration,
) -> Result<(), NotifyError> {
    let dispatcher = Arc::clone(dispatcher);
    let schedule = schedule.clone();
    match call_bounded("warn", timeout, move || {
        dispatcher.send_warning(&schedule.entity, &schedule)
    }) {
        Bounded::Done(()) => Ok(()),
        Bounded::Failed(err) => Err(err),
        Bounded::Timeout => Err(NotifyError::Timeout(crate::bounded::millis(timeout))),
        Bounded::Lost => Err(NotifyError::Failed(
            "dispatcher worker exited without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleDates;

    fn schedule() -> RetentionSchedule {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        RetentionSchedule::new(
            "patient:42".parse().unwrap(),
            "medical_records",
            PolicyId::new("medical_records", 1),
            day(2005, 1, 1),
            day(2005, 1, 1),
            ScheduleDates {
                retention_end_date: day(2025, 1, 1),
                warning_date: day(2024, 7, 5),
                deletion_date: day(2025, 4, 1),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_outbox_appends_requests() {
        let tmp = tempfile::tempdir().unwrap();
        let outbox = OutboxDispatcher::new(tmp.path());
        let s = schedule();

        outbox.send_warning(&s.entity, &s).unwrap();
        outbox.send_warning(&s.entity, &s).unwrap();

        let requests = outbox.read_all().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].request_id, requests[1].request_id);
        assert_eq!(
            requests[0].request_id,
            format!("{}:warning:2024-07-05", s.id)
        );
        assert_eq!(requests[0].deletion_date, s.dates.deletion_date);
    }

    struct Stuck;

    impl WarningDispatcher for Stuck {
        fn send_warning(&self, _: &EntityRef, _: &RetentionSchedule) -> Result<(), NotifyError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_is_bounded() {
        let dispatcher: Arc<dyn WarningDispatcher> = Arc::new(Stuck);
        let err = dispatch_bounded(&dispatcher, &schedule(), Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, NotifyError::Timeout(_)));
    }
}
