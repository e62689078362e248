//! Legal holds and manual approvals.
//!
//! Operator operations shared by the CLI, admin tooling and scheduled runs.
//! Every change is a compare-and-swap on the schedule's status and
//! revision, retried a few times when a concurrent writer got there first.

use crate::clock::Clock;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::registry::{PolicyRegistry, RegistryError};
use crate::schedule::{RetentionSchedule, ScheduleStatus};
use crate::store::{CasOutcome, ScheduleStore, StoreError};
use chrono::{DateTime, Utc};
use rl_common::ScheduleId;
use std::sync::Arc;
use thiserror::Error;

const CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum HoldError {
    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),

    #[error("cannot {action} on {id}: schedule is {status}")]
    Terminal {
        id: ScheduleId,
        status: ScheduleStatus,
        action: &'static str,
    },

    #[error("policy {policy} of schedule {id} is exempt from legal hold")]
    Exempt { id: ScheduleId, policy: String },

    #[error("schedule {0} is not under legal hold")]
    NotHeld(ScheduleId),

    #[error("schedule {id} is being executed by another run; retry after its claim expires at {retry_after}")]
    InFlight {
        id: ScheduleId,
        retry_after: DateTime<Utc>,
    },

    #[error("schedule {0} is under legal hold")]
    Held(ScheduleId),

    #[error("schedule {0} kept changing under concurrent writers")]
    Conflict(ScheduleId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<HoldError> for rl_common::Error {
    fn from(err: HoldError) -> Self {
        let invalid = |id: ScheduleId, from: &str, to: &str| rl_common::Error::InvalidTransition {
            schedule_id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        };
        match err {
            HoldError::NotFound(id) => rl_common::Error::ScheduleNotFound(id.to_string()),
            HoldError::Terminal { id, status, action } => invalid(id, status.as_str(), action),
            HoldError::Exempt { id, .. } => invalid(id, "hold-exempt policy", "legal_hold"),
            HoldError::NotHeld(id) => invalid(id, "not held", "active"),
            HoldError::InFlight { id, retry_after } => invalid(
                id,
                &format!("scheduled_deletion (claimed; retry after {})", retry_after.to_rfc3339()),
                "legal_hold",
            ),
            HoldError::Held(id) => invalid(id, "legal_hold", "approved"),
            HoldError::Conflict(id) => rl_common::Error::Storage(format!(
                "schedule {} kept changing under concurrent writers",
                id
            )),
            HoldError::Store(e) => e.into(),
            HoldError::Registry(e) => e.into(),
        }
    }
}

/// Applies and releases legal holds and records approvals.
pub struct LegalHoldManager {
    store: Arc<dyn ScheduleStore>,
    registry: Arc<PolicyRegistry>,
    clock: Arc<dyn Clock>,
    claim_ttl: chrono::Duration,
    log: LogContext,
}

impl LegalHoldManager {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        registry: Arc<PolicyRegistry>,
        clock: Arc<dyn Clock>,
        claim_ttl: chrono::Duration,
        log: LogContext,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            claim_ttl,
            log,
        }
    }

    /// Put a schedule under legal hold.
    ///
    /// Allowed from any non-terminal status. Holding an already held
    /// schedule returns it unchanged. A schedule whose terminal action is
    /// running in another process (live claim) is rejected with
    /// [`HoldError::InFlight`] naming when the claim expires; a stale claim
    /// is dropped. A pending action stays recorded so the next run can
    /// settle it.
    pub fn apply_hold(
        &self,
        id: &ScheduleId,
        applied_by: &str,
        reason: &str,
    ) -> Result<RetentionSchedule, HoldError> {
        self.with_retry(id, |current, now| {
            if current.status.is_terminal() {
                return Err(HoldError::Terminal {
                    id: id.clone(),
                    status: current.status,
                    action: "apply legal hold",
                });
            }
            if current.is_held() {
                return Ok(None);
            }
            if current.has_live_claim(now, self.claim_ttl) {
                return Err(HoldError::InFlight {
                    id: id.clone(),
                    retry_after: current.claim_expires_at(self.claim_ttl).unwrap_or(now),
                });
            }
            let policy = self.registry.get(&current.policy_id)?;
            if policy.legal_hold_exempt {
                return Err(HoldError::Exempt {
                    id: id.clone(),
                    policy: current.policy_id.to_string(),
                });
            }

            let mut next = current.transitioned(ScheduleStatus::LegalHold, now);
            next.legal_hold_reason = Some(reason.to_string());
            next.legal_hold_applied_at = Some(now);
            next.legal_hold_applied_by = Some(applied_by.to_string());
            next.claim = None;
            Ok(Some(next))
        })
        .inspect(|held| {
            log_event!(
                self.log,
                INFO,
                event_names::HOLD_APPLIED,
                Stage::Gate,
                "legal hold applied",
                schedule_id = %held.id, entity = %held.entity, applied_by = applied_by
            );
        })
    }

    /// Lift a hold and return the schedule to `active`.
    ///
    /// Dates are not recomputed. A pending warning is sent again on the next
    /// run once the warning date has passed.
    pub fn release_hold(
        &self,
        id: &ScheduleId,
        released_by: &str,
    ) -> Result<RetentionSchedule, HoldError> {
        self.with_retry(id, |current, now| {
            if !current.is_held() {
                return Err(HoldError::NotHeld(id.clone()));
            }
            let mut next = current.transitioned(ScheduleStatus::Active, now);
            next.legal_hold_reason = None;
            next.legal_hold_applied_at = None;
            next.legal_hold_applied_by = None;
            next.warning_sent_at = None;
            Ok(Some(next))
        })
        .inspect(|released| {
            log_event!(
                self.log,
                INFO,
                event_names::HOLD_RELEASED,
                Stage::Gate,
                "legal hold released",
                schedule_id = %released.id, entity = %released.entity, released_by = released_by
            );
        })
    }

    /// Record manual approval for the terminal action.
    ///
    /// Rejected for terminal and held schedules. Approving twice keeps the
    /// first approval.
    pub fn approve(&self, id: &ScheduleId, approved_by: &str) -> Result<RetentionSchedule, HoldError> {
        self.with_retry(id, |current, now| {
            if current.status.is_terminal() {
                return Err(HoldError::Terminal {
                    id: id.clone(),
                    status: current.status,
                    action: "approve",
                });
            }
            if current.is_held() {
                return Err(HoldError::Held(id.clone()));
            }
            if current.is_approved() {
                return Ok(None);
            }
            let mut next = current.transitioned(current.status, now);
            next.approved_by = Some(approved_by.to_string());
            next.approved_at = Some(now);
            Ok(Some(next))
        })
        .inspect(|approved| {
            log_event!(
                self.log,
                INFO,
                event_names::APPROVAL_RECORDED,
                Stage::Gate,
                "terminal action approved",
                schedule_id = %approved.id, entity = %approved.entity, approved_by = approved_by
            );
        })
    }

    /// Read, decide, CAS; re-read and decide again on conflict.
    ///
    /// `decide` returns `Ok(None)` when the schedule is already in the
    /// requested state.
    fn with_retry<F>(&self, id: &ScheduleId, decide: F) -> Result<RetentionSchedule, HoldError>
    where
        F: Fn(&RetentionSchedule, chrono::DateTime<chrono::Utc>) -> Result<Option<RetentionSchedule>, HoldError>,
    {
        for _ in 0..CAS_ATTEMPTS {
            let current = self
                .store
                .get(id)?
                .ok_or_else(|| HoldError::NotFound(id.clone()))?;
            let Some(next) = decide(&current, self.clock.now())? else {
                return Ok(current);
            };
            match self
                .store
                .compare_and_swap(current.status, current.revision, next)?
            {
                CasOutcome::Swapped(stored) => return Ok(stored),
                CasOutcome::Conflict(_) => continue,
            }
        }
        Err(HoldError::Conflict(id.clone()))
    }
}
