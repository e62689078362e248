//! Entity lifecycle intake: schedule creation, activity and policy rebase.
//!
//! Collaborators report facts about their entities; this service turns
//! them into schedule writes. Dates are computed here, explicitly, and
//! nowhere else.

use crate::clock::Clock;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::registry::{PolicyRegistry, RegistryError};
use crate::schedule::{compute_dates, CalcError, RetentionSchedule, ScheduleStatus};
use crate::store::{CasOutcome, ScheduleStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rl_common::{EntityRef, ScheduleId};
use rl_config::RetentionPolicy;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

const CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("no schedule tracks {0}")]
    NotTracked(EntityRef),

    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),

    #[error("{entity} is already tracked under category {existing_category} by {existing}")]
    CategoryConflict {
        entity: EntityRef,
        existing: ScheduleId,
        existing_category: String,
    },

    #[error("cannot rebase {id}: schedule is {status}")]
    NotRebasable { id: ScheduleId, status: ScheduleStatus },

    #[error("schedule {0} is being executed; report activity again after the run")]
    InFlight(ScheduleId),

    #[error("schedule for {0} kept changing under concurrent writers")]
    Contended(EntityRef),

    #[error(transparent)]
    Calc(#[from] CalcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<IntakeError> for rl_common::Error {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::NotTracked(entity) => rl_common::Error::ScheduleNotFound(entity.to_string()),
            IntakeError::NotFound(id) => rl_common::Error::ScheduleNotFound(id.to_string()),
            IntakeError::CategoryConflict {
                entity, existing, ..
            } => rl_common::Error::ScheduleConflict {
                entity: entity.to_string(),
                existing: existing.to_string(),
            },
            IntakeError::NotRebasable { id, status } => rl_common::Error::InvalidTransition {
                schedule_id: id.to_string(),
                from: status.to_string(),
                to: "rebased".to_string(),
            },
            IntakeError::InFlight(id) => rl_common::Error::InvalidTransition {
                schedule_id: id.to_string(),
                from: ScheduleStatus::ScheduledDeletion.to_string(),
                to: "recomputed".to_string(),
            },
            IntakeError::Contended(entity) => rl_common::Error::Storage(format!(
                "schedule for {} kept changing under concurrent writers",
                entity
            )),
            IntakeError::Calc(e) => e.into(),
            IntakeError::Store(e) => e.into(),
            IntakeError::Registry(e) => e.into(),
        }
    }
}

/// What an intake call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "schedule", rename_all = "snake_case")]
pub enum IntakeOutcome {
    Created(RetentionSchedule),
    /// Dates recomputed (and the warning cycle reset where applicable).
    Updated(RetentionSchedule),
    /// Stale or redundant fact; nothing written.
    Unchanged(RetentionSchedule),
}

impl IntakeOutcome {
    pub fn schedule(&self) -> &RetentionSchedule {
        match self {
            IntakeOutcome::Created(s) | IntakeOutcome::Updated(s) | IntakeOutcome::Unchanged(s) => s,
        }
    }
}

/// Inbound entity lifecycle interface.
pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    registry: Arc<PolicyRegistry>,
    clock: Arc<dyn Clock>,
    log: LogContext,
}

impl ScheduleService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        registry: Arc<PolicyRegistry>,
        clock: Arc<dyn Clock>,
        log: LogContext,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            log,
        }
    }

    /// Start tracking an entity under the active policy for `category`.
    ///
    /// If the entity is already tracked under the same category the report
    /// is treated as activity on `creation_date`. A different category is a
    /// conflict; the existing schedule wins.
    pub fn entity_created(
        &self,
        entity: &EntityRef,
        category: &str,
        creation_date: NaiveDate,
    ) -> Result<IntakeOutcome, IntakeError> {
        let policy = self.registry.resolve(category)?;

        if let Some(existing) = self.store.get_by_entity(entity)? {
            return self.created_again(entity, category, creation_date, existing);
        }

        let dates = compute_dates(policy, creation_date)?;
        let schedule = RetentionSchedule::new(
            entity.clone(),
            category,
            policy.id(),
            creation_date,
            creation_date,
            dates,
            self.clock.now(),
        );

        match self.store.insert(schedule) {
            Ok(created) => {
                log_event!(
                    self.log,
                    INFO,
                    event_names::SCHEDULE_CREATED,
                    Stage::Intake,
                    "schedule created",
                    schedule_id = %created.id, entity = %created.entity,
                    policy_id = %created.policy_id, deletion_date = %created.dates.deletion_date
                );
                Ok(IntakeOutcome::Created(created))
            }
            // Lost an insert race; the winner's schedule is authoritative.
            Err(StoreError::Conflict { .. }) => match self.store.get_by_entity(entity)? {
                Some(existing) => self.created_again(entity, category, creation_date, existing),
                None => Err(IntakeError::Contended(entity.clone())),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn created_again(
        &self,
        entity: &EntityRef,
        category: &str,
        creation_date: NaiveDate,
        existing: RetentionSchedule,
    ) -> Result<IntakeOutcome, IntakeError> {
        if existing.category != category {
            return Err(IntakeError::CategoryConflict {
                entity: entity.clone(),
                existing: existing.id,
                existing_category: existing.category,
            });
        }
        self.entity_activity(entity, creation_date)
    }

    /// Record activity on a tracked entity and recompute its dates.
    ///
    /// Activity older than or equal to the stored activity date is ignored.
    /// Terminal schedules never change. Held schedules get new dates but
    /// stay held. Any recorded approval is dropped once the dates move. A
    /// `warning_sent` or `grace_period` schedule also goes back to `active`
    /// and loses its warning timestamp.
    pub fn entity_activity(
        &self,
        entity: &EntityRef,
        activity_date: NaiveDate,
    ) -> Result<IntakeOutcome, IntakeError> {
        for _ in 0..CAS_ATTEMPTS {
            let current = self
                .store
                .get_by_entity(entity)?
                .ok_or_else(|| IntakeError::NotTracked(entity.clone()))?;

            if current.status.is_terminal() || activity_date <= current.last_activity_date {
                return Ok(IntakeOutcome::Unchanged(current));
            }
            if current.status == ScheduleStatus::ScheduledDeletion {
                return Err(IntakeError::InFlight(current.id));
            }

            let policy = self.registry.get(&current.policy_id)?;
            let mut next = recomputed(&current, policy, activity_date, self.clock.now())?;
            if matches!(
                current.status,
                ScheduleStatus::WarningSent | ScheduleStatus::GracePeriod
            ) {
                reset_warning_cycle(&mut next);
            }

            match self.store.update_dates(current.revision, next)? {
                CasOutcome::Swapped(updated) => {
                    log_event!(
                        self.log,
                        INFO,
                        event_names::SCHEDULE_EXTENDED,
                        Stage::Intake,
                        "activity recorded, dates recomputed",
                        schedule_id = %updated.id, entity = %updated.entity,
                        status = %updated.status, deletion_date = %updated.dates.deletion_date
                    );
                    return Ok(IntakeOutcome::Updated(updated));
                }
                CasOutcome::Conflict(_) => continue,
            }
        }
        Err(IntakeError::Contended(entity.clone()))
    }

    /// Re-pin a schedule to the active policy of its category.
    ///
    /// The previous policy id is kept in `superseded_policy_id`. Dates are
    /// recomputed from the stored activity date and the warning cycle
    /// starts over. Held, claimed and terminal schedules are rejected.
    pub fn rebase_schedule(&self, id: &ScheduleId) -> Result<IntakeOutcome, IntakeError> {
        let current = self
            .store
            .get(id)?
            .ok_or_else(|| IntakeError::NotFound(id.clone()))?;
        if current.status.is_terminal()
            || current.is_held()
            || current.status == ScheduleStatus::ScheduledDeletion
        {
            return Err(IntakeError::NotRebasable {
                id: id.clone(),
                status: current.status,
            });
        }

        let policy = self.registry.resolve(&current.category)?;
        if policy.id() == current.policy_id {
            return Ok(IntakeOutcome::Unchanged(current));
        }

        let mut next = recomputed(
            &current,
            policy,
            current.last_activity_date,
            self.clock.now(),
        )?;
        next.superseded_policy_id = Some(current.policy_id.clone());
        next.policy_id = policy.id();
        reset_warning_cycle(&mut next);

        match self.store.update_dates(current.revision, next)? {
            CasOutcome::Swapped(rebased) => {
                log_event!(
                    self.log,
                    INFO,
                    event_names::SCHEDULE_REBASED,
                    Stage::Intake,
                    "schedule re-pinned to active policy",
                    schedule_id = %rebased.id, entity = %rebased.entity,
                    from_policy = %current.policy_id, to_policy = %rebased.policy_id
                );
                Ok(IntakeOutcome::Updated(rebased))
            }
            CasOutcome::Conflict(_) => Err(IntakeError::Contended(current.entity)),
        }
    }
}

fn recomputed(
    current: &RetentionSchedule,
    policy: &RetentionPolicy,
    activity_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<RetentionSchedule, CalcError> {
    let mut next = current.clone();
    next.dates = compute_dates(policy, activity_date)?;
    next.last_activity_date = activity_date;
    // An approval covers one deletion date.
    if next.dates != current.dates {
        next.approved_by = None;
        next.approved_at = None;
    }
    next.updated_at = now;
    Ok(next)
}

fn reset_warning_cycle(next: &mut RetentionSchedule) {
    next.status = ScheduleStatus::Active;
    next.warning_sent_at = None;
    next.approved_by = None;
    next.approved_at = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::contract::day;
    use crate::store::MemoryScheduleStore;
    use rl_common::PolicyId;
    use rl_config::RetentionSpan;

    fn medical(version: u32, years: u32, active: bool) -> RetentionPolicy {
        let mut p = RetentionPolicy::new("medical_records", RetentionSpan::years(years));
        p.version = version;
        p.active = active;
        p.warning_period = RetentionSpan::days(180);
        p.grace_period = RetentionSpan::days(90);
        p
    }

    fn service(policies: Vec<RetentionPolicy>) -> (Arc<MemoryScheduleStore>, ScheduleService) {
        let store = Arc::new(MemoryScheduleStore::new());
        let svc = ScheduleService::new(
            store.clone(),
            Arc::new(PolicyRegistry::new(policies).unwrap()),
            Arc::new(FixedClock::on(day(2025, 5, 1))),
            LogContext::new("run-test", "host-test"),
        );
        (store, svc)
    }

    fn patient(id: u32) -> EntityRef {
        format!("patient:{}", id).parse().unwrap()
    }

    #[test]
    fn test_created_computes_dates_from_policy() {
        let (_, svc) = service(vec![medical(1, 20, true)]);
        let outcome = svc
            .entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap();
        let IntakeOutcome::Created(s) = outcome else {
            panic!("expected Created, got {:?}", outcome);
        };
        assert_eq!(s.dates.retention_end_date, day(2025, 1, 1));
        assert_eq!(s.dates.warning_date, day(2024, 7, 5));
        assert_eq!(s.dates.deletion_date, day(2025, 4, 1));
        assert_eq!(s.status, ScheduleStatus::Active);
        assert_eq!(s.policy_id, PolicyId::new("medical_records", 1));
    }

    #[test]
    fn test_unknown_category_is_policy_not_found() {
        let (_, svc) = service(vec![medical(1, 20, true)]);
        let err = svc
            .entity_created(&patient(1), "staff_records", day(2020, 1, 1))
            .unwrap_err();
        assert_eq!(rl_common::Error::from(err).code(), 11);
    }

    #[test]
    fn test_created_twice_same_category_is_activity() {
        let (_, svc) = service(vec![medical(1, 20, true)]);
        svc.entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap();
        let again = svc
            .entity_created(&patient(1), "medical_records", day(2006, 1, 1))
            .unwrap();
        assert!(matches!(again, IntakeOutcome::Updated(_)));
        assert_eq!(again.schedule().data_creation_date, day(2005, 1, 1));
        assert_eq!(again.schedule().dates.retention_end_date, day(2026, 1, 1));
    }

    #[test]
    fn test_created_under_other_category_conflicts() {
        let mut billing = RetentionPolicy::new("billing", RetentionSpan::years(5));
        billing.version = 1;
        let (_, svc) = service(vec![medical(1, 20, true), billing]);
        svc.entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap();
        let err = svc
            .entity_created(&patient(1), "billing", day(2005, 1, 1))
            .unwrap_err();
        assert!(matches!(err, IntakeError::CategoryConflict { .. }));
        assert_eq!(rl_common::Error::from(err).code(), 20);
    }

    #[test]
    fn test_activity_resets_warning_cycle() {
        let (store, svc) = service(vec![medical(1, 20, true)]);
        let created = svc
            .entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap();
        let s = created.schedule().clone();
        let mut warned = s.transitioned(ScheduleStatus::WarningSent, Utc::now());
        warned.warning_sent_at = Some(Utc::now());
        warned.approved_by = Some("dr.costa".into());
        store
            .compare_and_swap(ScheduleStatus::Active, s.revision, warned)
            .unwrap();

        let outcome = svc.entity_activity(&patient(1), day(2010, 3, 1)).unwrap();
        let updated = outcome.schedule();
        assert_eq!(updated.status, ScheduleStatus::Active);
        assert!(updated.warning_sent_at.is_none());
        assert!(updated.approved_by.is_none());
        assert_eq!(updated.last_activity_date, day(2010, 3, 1));
        assert_eq!(updated.dates.retention_end_date, day(2030, 3, 1));
        assert!(updated.dates.is_ordered());
    }

    #[test]
    fn test_activity_drops_approval_of_active_schedule() {
        let mut policy = medical(1, 20, true);
        policy.require_manual_approval = true;
        let (store, svc) = service(vec![policy]);
        let s = svc
            .entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap()
            .schedule()
            .clone();
        let mut approved = s.transitioned(ScheduleStatus::Active, Utc::now());
        approved.approved_by = Some("dpo@clinic".into());
        approved.approved_at = Some(Utc::now());
        store
            .compare_and_swap(ScheduleStatus::Active, s.revision, approved)
            .unwrap();

        let updated = svc.entity_activity(&patient(1), day(2015, 1, 1)).unwrap();
        let updated = updated.schedule();
        assert_eq!(updated.status, ScheduleStatus::Active);
        assert_eq!(updated.dates.deletion_date, day(2035, 4, 1));
        assert!(updated.approved_by.is_none());
        assert!(updated.approved_at.is_none());
        assert!(!updated.is_approved());
    }

    #[test]
    fn test_stale_activity_is_ignored() {
        let (_, svc) = service(vec![medical(1, 20, true)]);
        svc.entity_created(&patient(1), "medical_records", day(2010, 1, 1))
            .unwrap();
        let outcome = svc.entity_activity(&patient(1), day(2009, 12, 31)).unwrap();
        assert!(matches!(outcome, IntakeOutcome::Unchanged(_)));
        assert_eq!(outcome.schedule().revision, 1);
    }

    #[test]
    fn test_activity_on_held_schedule_keeps_hold() {
        let (store, svc) = service(vec![medical(1, 20, true)]);
        let s = svc
            .entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap()
            .schedule()
            .clone();
        let mut held = s.transitioned(ScheduleStatus::LegalHold, Utc::now());
        held.legal_hold_reason = Some("litigation".into());
        store
            .compare_and_swap(ScheduleStatus::Active, s.revision, held)
            .unwrap();

        let updated = svc.entity_activity(&patient(1), day(2012, 1, 1)).unwrap();
        assert_eq!(updated.schedule().status, ScheduleStatus::LegalHold);
        assert_eq!(updated.schedule().legal_hold_reason.as_deref(), Some("litigation"));
        assert_eq!(updated.schedule().dates.retention_end_date, day(2032, 1, 1));
    }

    #[test]
    fn test_activity_on_terminal_or_unknown() {
        let (store, svc) = service(vec![medical(1, 20, true)]);
        let s = svc
            .entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap()
            .schedule()
            .clone();
        store
            .compare_and_swap(
                ScheduleStatus::Active,
                s.revision,
                s.transitioned(ScheduleStatus::Deleted, Utc::now()),
            )
            .unwrap();
        let outcome = svc.entity_activity(&patient(1), day(2020, 1, 1)).unwrap();
        assert!(matches!(outcome, IntakeOutcome::Unchanged(_)));

        assert!(matches!(
            svc.entity_activity(&patient(2), day(2020, 1, 1)),
            Err(IntakeError::NotTracked(_))
        ));
    }

    #[test]
    fn test_activity_recomputes_against_pinned_version() {
        let (store, svc) = service(vec![medical(1, 20, true)]);
        svc.entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap();

        // v2 published later: the schedule keeps computing with v1.
        let svc_v2 = ScheduleService::new(
            store.clone(),
            Arc::new(PolicyRegistry::new(vec![medical(1, 20, false), medical(2, 10, true)]).unwrap()),
            Arc::new(FixedClock::on(day(2025, 5, 1))),
            LogContext::new("run-test", "host-test"),
        );
        let updated = svc_v2.entity_activity(&patient(1), day(2006, 1, 1)).unwrap();
        assert_eq!(updated.schedule().policy_id, PolicyId::new("medical_records", 1));
        assert_eq!(updated.schedule().dates.retention_end_date, day(2026, 1, 1));

        let rebased = svc_v2.rebase_schedule(&updated.schedule().id).unwrap();
        let s = rebased.schedule();
        assert_eq!(s.policy_id, PolicyId::new("medical_records", 2));
        assert_eq!(s.superseded_policy_id, Some(PolicyId::new("medical_records", 1)));
        assert_eq!(s.dates.retention_end_date, day(2016, 1, 1));
        assert_eq!(s.status, ScheduleStatus::Active);

        let again = svc_v2.rebase_schedule(&s.id).unwrap();
        assert!(matches!(again, IntakeOutcome::Unchanged(_)));
    }

    #[test]
    fn test_rebase_rejects_held() {
        let (store, svc) = service(vec![medical(1, 20, true)]);
        let s = svc
            .entity_created(&patient(1), "medical_records", day(2005, 1, 1))
            .unwrap()
            .schedule()
            .clone();
        store
            .compare_and_swap(
                ScheduleStatus::Active,
                s.revision,
                s.transitioned(ScheduleStatus::LegalHold, Utc::now()),
            )
            .unwrap();
        assert!(matches!(
            svc.rebase_schedule(&s.id),
            Err(IntakeError::NotRebasable { .. })
        ));
    }
}
