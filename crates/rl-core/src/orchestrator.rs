//! Retention run orchestrator.
//!
//! One run is a single pass over the store:
//!
//! 1. Select the warning batch and the deletion batch (once, up front).
//! 2. Warning batch: dispatch the warning, then CAS `active → warning_sent`.
//! 3. Deletion batch: evaluate the gates, claim the schedule by CAS into
//!    `scheduled_deletion`, snapshot, execute, append the audit entry, and
//!    commit the terminal status by CAS.
//!
//! Per-schedule failures are isolated and counted. Only storage failures
//! (the store or the audit log cannot be written) abort the run.

use crate::audit::{
    transition_key, AuditContext, AuditError, AuditEventType, AuditLog, TerminalActionRecord,
};
use crate::clock::Clock;
use crate::executor::{DeletionExecutor, ExecutorError, HookError, PreActionEvidence};
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::notify::{dispatch_bounded, WarningDispatcher};
use crate::registry::PolicyRegistry;
use crate::schedule::{Claim, PendingAction, RetentionSchedule, ScheduleStatus};
use crate::store::{CasOutcome, ScheduleFilter, ScheduleStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rl_common::{EntityRef, RunId, ScheduleId};
use rl_config::{EngineSettings, RetentionPolicy, TerminalAction};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Failures that abort the whole run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("schedule store failure during {schedule_id}: {source}")]
    Store {
        schedule_id: ScheduleId,
        #[source]
        source: StoreError,
    },

    #[error("schedule scan failed: {0}")]
    Scan(#[source] StoreError),

    #[error("audit write failed for {schedule_id}; claim left for investigation: {source}")]
    Audit {
        schedule_id: ScheduleId,
        #[source]
        source: AuditError,
    },
}

impl From<OrchestratorError> for rl_common::Error {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Store { source, .. } | OrchestratorError::Scan(source) => {
                rl_common::Error::Storage(source.to_string())
            }
            OrchestratorError::Audit { source, .. } => source.into(),
        }
    }
}

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Evaluate everything, change nothing.
    pub dry_run: bool,
    /// Only process the warning batch.
    pub warning_only: bool,
    /// Override the auto-delete switches. Never bypasses holds or approval.
    pub force: bool,
    pub filter: ScheduleFilter,
    /// Evaluate as of this date instead of the clock's.
    pub today: Option<NaiveDate>,
}

/// What happened to one schedule in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Warned,
    EnteredGrace,
    Deleted,
    Anonymized,
    /// Committed a terminal action already recorded by a crashed run.
    Recovered,
    SkippedOnHold,
    DeferredForApproval,
    DeferredAutoDelete,
    /// In grace, deletion date not reached yet.
    NotYetDue,
    /// Another run changed the schedule first.
    Conflict,
    /// Another run holds a live claim.
    ClaimedElsewhere,
    WouldWarn,
    WouldEnterGrace,
    WouldDelete,
    WouldAnonymize,
    Failed(String),
}

impl ScheduleOutcome {
    fn is_advance(&self) -> bool {
        matches!(
            self,
            ScheduleOutcome::Warned
                | ScheduleOutcome::EnteredGrace
                | ScheduleOutcome::Deleted
                | ScheduleOutcome::Anonymized
                | ScheduleOutcome::Recovered
        )
    }
}

/// Per-schedule line of the run report.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResult {
    pub schedule_id: ScheduleId,
    pub entity: EntityRef,
    pub stage: Stage,
    #[serde(flatten)]
    pub outcome: ScheduleOutcome,
}

/// A schedule past its deletion date waiting for manual approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueItem {
    pub schedule_id: ScheduleId,
    pub entity: EntityRef,
    pub category: String,
    pub deletion_date: NaiveDate,
    pub days_overdue: i64,
}

/// A schedule the run could not process.
#[derive(Debug, Clone, Serialize)]
pub struct FailureItem {
    pub schedule_id: ScheduleId,
    pub entity: EntityRef,
    pub stage: Stage,
    pub code: u32,
    pub error: String,
}

/// Counters of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounts {
    pub advanced: u64,
    pub skipped_on_hold: u64,
    pub failed: u64,
    pub deferred_for_approval: u64,
    pub deferred_auto_delete: u64,
    pub conflicts: u64,
    pub warned: u64,
    pub entered_grace: u64,
    pub deleted: u64,
    pub anonymized: u64,
    pub recovered: u64,
    pub would_warn: u64,
    pub would_enter_grace: u64,
    pub would_delete: u64,
    pub would_anonymize: u64,
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub schema_version: String,
    pub run_id: RunId,
    pub today: NaiveDate,
    pub dry_run: bool,
    pub warning_only: bool,
    pub interrupted: bool,
    pub warning_batch: usize,
    pub deletion_batch: usize,
    pub counts: RunCounts,
    pub overdue: Vec<OverdueItem>,
    pub failures: Vec<FailureItem>,
    pub outcomes: Vec<ScheduleResult>,
}

impl RunSummary {
    fn new(run_id: RunId, today: NaiveDate, opts: &RunOptions) -> Self {
        RunSummary {
            schema_version: rl_common::SCHEMA_VERSION.to_string(),
            run_id,
            today,
            dry_run: opts.dry_run,
            warning_only: opts.warning_only,
            interrupted: false,
            warning_batch: 0,
            deletion_batch: 0,
            counts: RunCounts::default(),
            overdue: Vec::new(),
            failures: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Full success: nothing failed and the run was not interrupted.
    pub fn is_clean(&self) -> bool {
        self.counts.failed == 0 && !self.interrupted
    }

    fn record(&mut self, schedule: &RetentionSchedule, stage: Stage, outcome: ScheduleOutcome) {
        let c = &mut self.counts;
        if outcome.is_advance() {
            c.advanced += 1;
        }
        match &outcome {
            ScheduleOutcome::Warned => c.warned += 1,
            ScheduleOutcome::EnteredGrace => c.entered_grace += 1,
            ScheduleOutcome::Deleted => c.deleted += 1,
            ScheduleOutcome::Anonymized => c.anonymized += 1,
            ScheduleOutcome::Recovered => c.recovered += 1,
            ScheduleOutcome::SkippedOnHold => c.skipped_on_hold += 1,
            ScheduleOutcome::DeferredForApproval => {
                c.deferred_for_approval += 1;
                self.overdue.push(OverdueItem {
                    schedule_id: schedule.id.clone(),
                    entity: schedule.entity.clone(),
                    category: schedule.category.clone(),
                    deletion_date: schedule.dates.deletion_date,
                    days_overdue: schedule.days_overdue(self.today),
                });
            }
            ScheduleOutcome::DeferredAutoDelete => c.deferred_auto_delete += 1,
            ScheduleOutcome::Conflict | ScheduleOutcome::ClaimedElsewhere => c.conflicts += 1,
            ScheduleOutcome::NotYetDue => {}
            ScheduleOutcome::WouldWarn => c.would_warn += 1,
            ScheduleOutcome::WouldEnterGrace => c.would_enter_grace += 1,
            ScheduleOutcome::WouldDelete => c.would_delete += 1,
            ScheduleOutcome::WouldAnonymize => c.would_anonymize += 1,
            ScheduleOutcome::Failed(_) => c.failed += 1,
        }
        self.outcomes.push(ScheduleResult {
            schedule_id: schedule.id.clone(),
            entity: schedule.entity.clone(),
            stage,
            outcome,
        });
    }

    fn record_failure(&mut self, schedule: &RetentionSchedule, stage: Stage, error: rl_common::Error) {
        self.failures.push(FailureItem {
            schedule_id: schedule.id.clone(),
            entity: schedule.entity.clone(),
            stage,
            code: error.code(),
            error: error.to_string(),
        });
        self.record(schedule, stage, ScheduleOutcome::Failed(error.to_string()));
    }
}

/// Per-schedule processing result: an outcome, or a failure to report.
enum Step {
    Done(ScheduleOutcome),
    Failed(Stage, rl_common::Error),
}

impl From<ScheduleOutcome> for Step {
    fn from(outcome: ScheduleOutcome) -> Self {
        Step::Done(outcome)
    }
}

/// State shared by every schedule of one run.
struct RunScope<'a> {
    run_id: RunId,
    today: NaiveDate,
    now: DateTime<Utc>,
    opts: &'a RunOptions,
    log: LogContext,
    audit: AuditContext,
}

/// Periodic driver of the retention state machine.
pub struct Orchestrator {
    store: Arc<dyn ScheduleStore>,
    registry: Arc<PolicyRegistry>,
    executor: DeletionExecutor,
    dispatcher: Arc<dyn WarningDispatcher>,
    audit: AuditLog,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    host_id: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        registry: Arc<PolicyRegistry>,
        executor: DeletionExecutor,
        dispatcher: Arc<dyn WarningDispatcher>,
        audit: AuditLog,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
        host_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            dispatcher,
            audit,
            settings,
            clock,
            host_id: host_id.into(),
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Execute one pass. `cancel` is checked between schedules.
    pub fn run(
        &mut self,
        opts: &RunOptions,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, OrchestratorError> {
        let run_id = RunId::new();
        let now = self.clock.now();
        let today = opts.today.unwrap_or_else(|| self.clock.today());
        let scope = RunScope {
            log: LogContext::new(run_id.to_string(), self.host_id.clone()),
            audit: AuditContext::new(&run_id, self.host_id.clone()),
            run_id: run_id.clone(),
            today,
            now,
            opts,
        };
        let mut summary = RunSummary::new(run_id, today, opts);

        log_event!(
            scope.log,
            INFO,
            event_names::RUN_STARTED,
            Stage::Init,
            "retention run started",
            today = %today, dry_run = opts.dry_run, warning_only = opts.warning_only,
            force = opts.force
        );

        let warning_batch = self
            .store
            .due_for_warning(today, &opts.filter)
            .map_err(OrchestratorError::Scan)?;
        let deletion_batch = if opts.warning_only {
            Vec::new()
        } else {
            self.store
                .due_for_deletion(today, &opts.filter)
                .map_err(OrchestratorError::Scan)?
        };
        summary.warning_batch = warning_batch.len();
        summary.deletion_batch = deletion_batch.len();
        log_event!(
            scope.log,
            INFO,
            event_names::SCAN_SELECTED,
            Stage::Scan,
            "batches selected",
            warning_batch = warning_batch.len() as u64,
            deletion_batch = deletion_batch.len() as u64
        );

        let batches = warning_batch
            .iter()
            .map(|s| (Stage::Warn, s))
            .chain(deletion_batch.iter().map(|s| (Stage::Gate, s)));
        for (stage, schedule) in batches {
            if cancel.load(Ordering::SeqCst) {
                summary.interrupted = true;
                log_event!(
                    scope.log,
                    WARN,
                    event_names::RUN_INTERRUPTED,
                    Stage::Report,
                    "run interrupted between schedules",
                    processed = summary.outcomes.len() as u64
                );
                break;
            }
            let step = match stage {
                Stage::Warn => self.process_warning(&scope, schedule),
                _ => self.process_deletion(&scope, schedule),
            };
            match step {
                Ok(Step::Done(outcome)) => summary.record(schedule, stage, outcome),
                Ok(Step::Failed(stage, error)) => summary.record_failure(schedule, stage, error),
                Err(err) => {
                    log_event!(
                        scope.log,
                        ERROR,
                        event_names::RUN_ABORTED,
                        Stage::Report,
                        "run aborted on storage failure",
                        schedule_id = %schedule.id, error = %err
                    );
                    return Err(err);
                }
            }
        }

        log_event!(
            scope.log,
            INFO,
            event_names::RUN_FINISHED,
            Stage::Report,
            "retention run finished",
            advanced = summary.counts.advanced,
            skipped_on_hold = summary.counts.skipped_on_hold,
            failed = summary.counts.failed,
            deferred_for_approval = summary.counts.deferred_for_approval,
            interrupted = summary.interrupted
        );
        Ok(summary)
    }

    /// `active → warning_sent`. The warning goes out before the CAS; a
    /// duplicate from a racing run carries the same request id.
    fn process_warning(
        &self,
        scope: &RunScope<'_>,
        schedule: &RetentionSchedule,
    ) -> Result<Step, OrchestratorError> {
        if scope.opts.dry_run {
            return Ok(ScheduleOutcome::WouldWarn.into());
        }

        if let Err(err) =
            dispatch_bounded(&self.dispatcher, schedule, self.settings.warning_timeout())
        {
            log_event!(
                scope.log,
                WARN,
                event_names::WARN_FAILED,
                Stage::Warn,
                "warning dispatch failed; retried next run",
                schedule_id = %schedule.id, entity = %schedule.entity, error = %err
            );
            return Ok(Step::Failed(Stage::Warn, err.into()));
        }

        let mut next = schedule.transitioned(ScheduleStatus::WarningSent, scope.now);
        next.warning_sent_at = Some(scope.now);
        match self.cas(schedule, next)? {
            CasOutcome::Swapped(_) => {
                log_event!(
                    scope.log,
                    INFO,
                    event_names::WARN_DISPATCHED,
                    Stage::Warn,
                    "warning sent",
                    schedule_id = %schedule.id, entity = %schedule.entity,
                    deletion_date = %schedule.dates.deletion_date
                );
                Ok(ScheduleOutcome::Warned.into())
            }
            CasOutcome::Conflict(_) => Ok(ScheduleOutcome::Conflict.into()),
        }
    }

    fn process_deletion(
        &mut self,
        scope: &RunScope<'_>,
        schedule: &RetentionSchedule,
    ) -> Result<Step, OrchestratorError> {
        if schedule.is_held() {
            log_event!(
                scope.log,
                INFO,
                event_names::GATE_HOLD_SKIPPED,
                Stage::Gate,
                "legal hold active; skipped",
                schedule_id = %schedule.id, entity = %schedule.entity
            );
            return Ok(ScheduleOutcome::SkippedOnHold.into());
        }

        let policy = match self.registry.get(&schedule.policy_id) {
            Ok(policy) => policy.clone(),
            Err(err) => return Ok(Step::Failed(Stage::Gate, err.into())),
        };
        let due = scope.today >= schedule.dates.deletion_date;

        match schedule.status {
            ScheduleStatus::WarningSent if !due => {
                if scope.opts.dry_run {
                    return Ok(ScheduleOutcome::WouldEnterGrace.into());
                }
                let next = schedule.transitioned(ScheduleStatus::GracePeriod, scope.now);
                return Ok(match self.cas(schedule, next)? {
                    CasOutcome::Swapped(_) => ScheduleOutcome::EnteredGrace,
                    CasOutcome::Conflict(_) => ScheduleOutcome::Conflict,
                }
                .into());
            }
            ScheduleStatus::GracePeriod if !due => return Ok(ScheduleOutcome::NotYetDue.into()),
            ScheduleStatus::ScheduledDeletion
                if schedule.has_live_claim(scope.now, self.settings.claim_ttl()) =>
            {
                return Ok(ScheduleOutcome::ClaimedElsewhere.into());
            }
            _ => {}
        }

        let event = event_type(&policy);
        let key = transition_key(&schedule.id, event);

        // A stale claim whose action is already in the log: the previous run
        // crashed between the audit write and the commit.
        if schedule.status == ScheduleStatus::ScheduledDeletion && self.recorded(&schedule.id, &key)? {
            if scope.opts.dry_run {
                return Ok(would(&policy).into());
            }
            return self.commit(scope, schedule, &policy, true);
        }

        let auto_delete = policy.auto_delete_enabled && self.settings.auto_delete_enabled;
        if !auto_delete && !scope.opts.force {
            log_event!(
                scope.log,
                INFO,
                event_names::GATE_AUTO_DELETE_DISABLED,
                Stage::Gate,
                "auto-delete disabled; deferred",
                schedule_id = %schedule.id, entity = %schedule.entity
            );
            return Ok(ScheduleOutcome::DeferredAutoDelete.into());
        }
        if policy.require_manual_approval && !schedule.is_approved() {
            log_event!(
                scope.log,
                INFO,
                event_names::GATE_APPROVAL_PENDING,
                Stage::Gate,
                "overdue pending approval",
                schedule_id = %schedule.id, entity = %schedule.entity,
                days_overdue = schedule.days_overdue(scope.today)
            );
            return Ok(ScheduleOutcome::DeferredForApproval.into());
        }
        if scope.opts.dry_run {
            return Ok(would(&policy).into());
        }

        let claimed = match self.claim(scope, schedule)? {
            Some(claimed) => claimed,
            None => {
                log_event!(
                    scope.log,
                    INFO,
                    event_names::GATE_CLAIM_LOST,
                    Stage::Gate,
                    "schedule changed by another run; skipped",
                    schedule_id = %schedule.id, entity = %schedule.entity
                );
                return Ok(ScheduleOutcome::Conflict.into());
            }
        };

        // Another process may have logged the action since the batch was read.
        if self.recorded(&claimed.id, &key)? {
            return self.commit(scope, &claimed, &policy, true);
        }

        let (claimed, evidence) = match self.prepare(scope, claimed)? {
            Prepared::Ready(claimed, evidence) => (claimed, evidence),
            Prepared::Applied { claimed, pending, after } => {
                return self.settle_applied(scope, &claimed, &policy, &key, pending, after);
            }
            Prepared::Done(step) => return Ok(step),
        };

        match self.execute(scope, &claimed, &policy, &key, evidence) {
            Ok(()) => self.commit(scope, &claimed, &policy, false),
            Err(ExecuteFailure::Audit(source)) => Err(self.audit_failed(scope, &claimed, source)),
            Err(ExecuteFailure::Duplicate) => self.commit(scope, &claimed, &policy, true),
            Err(ExecuteFailure::Hook(error)) => {
                log_event!(
                    scope.log,
                    WARN,
                    event_names::EXECUTE_FAILED,
                    Stage::Execute,
                    "terminal action failed; claim released",
                    schedule_id = %claimed.id, entity = %claimed.entity, error = %error
                );
                self.release(&claimed)?;
                Ok(Step::Failed(Stage::Execute, error))
            }
            Err(ExecuteFailure::Unsettled(error)) => {
                log_event!(
                    scope.log,
                    WARN,
                    event_names::EXECUTE_UNSETTLED,
                    Stage::Execute,
                    "terminal action outcome unknown; claim kept until it goes stale",
                    schedule_id = %claimed.id, entity = %claimed.entity, error = %error
                );
                Ok(Step::Failed(Stage::Execute, error))
            }
        }
    }

    fn recorded(&mut self, id: &ScheduleId, key: &str) -> Result<bool, OrchestratorError> {
        self.audit
            .refresh_transition(key)
            .map_err(|source| OrchestratorError::Audit {
                schedule_id: id.clone(),
                source,
            })
    }

    /// CAS the schedule into `scheduled_deletion` under this run's claim.
    fn claim(
        &self,
        scope: &RunScope<'_>,
        schedule: &RetentionSchedule,
    ) -> Result<Option<RetentionSchedule>, OrchestratorError> {
        let previous_status = match (&schedule.status, &schedule.claim) {
            (ScheduleStatus::ScheduledDeletion, Some(stale)) => stale.previous_status,
            (ScheduleStatus::ScheduledDeletion, None) => ScheduleStatus::WarningSent,
            (status, _) => *status,
        };
        let mut next = schedule.transitioned(ScheduleStatus::ScheduledDeletion, scope.now);
        next.claim = Some(Claim {
            run_id: scope.run_id.clone(),
            claimed_at: scope.now,
            previous_status,
        });
        Ok(match self.cas(schedule, next)? {
            CasOutcome::Swapped(claimed) => Some(claimed),
            CasOutcome::Conflict(_) => None,
        })
    }

    /// Capture the pre-action evidence and persist it on the claimed
    /// schedule before anything irreversible happens.
    ///
    /// A schedule that already carries a pending action from an earlier run
    /// is checked against a fresh snapshot first: an entity that is gone or
    /// no longer matches the stored evidence was already acted on.
    fn prepare(
        &self,
        scope: &RunScope<'_>,
        claimed: RetentionSchedule,
    ) -> Result<Prepared, OrchestratorError> {
        let fresh = self.executor.capture(&claimed.entity);

        if let Some(pending) = claimed.pending_action.clone() {
            return Ok(match fresh {
                Ok(evidence) if evidence.verification_hash == pending.verification_hash => {
                    Prepared::Ready(claimed, evidence)
                }
                Ok(evidence) => Prepared::Applied {
                    claimed,
                    pending,
                    after: Some(evidence),
                },
                Err(ExecutorError::Hook {
                    source: HookError::NotFound(_),
                    ..
                }) => Prepared::Applied {
                    claimed,
                    pending,
                    after: None,
                },
                Err(err) => {
                    let error = rl_common::Error::from(err);
                    log_event!(
                        scope.log,
                        WARN,
                        event_names::EXECUTE_UNSETTLED,
                        Stage::Execute,
                        "cannot confirm the state of a pending action; claim kept",
                        schedule_id = %claimed.id, entity = %claimed.entity, error = %error
                    );
                    Prepared::Done(Step::Failed(Stage::Execute, error))
                }
            });
        }

        let evidence = match fresh {
            Ok(evidence) => evidence,
            Err(err) => {
                let error = rl_common::Error::from(err);
                log_event!(
                    scope.log,
                    WARN,
                    event_names::EXECUTE_FAILED,
                    Stage::Execute,
                    "snapshot failed; claim released",
                    schedule_id = %claimed.id, entity = %claimed.entity, error = %error
                );
                self.release(&claimed)?;
                return Ok(Prepared::Done(Step::Failed(Stage::Execute, error)));
            }
        };

        let mut next = claimed.transitioned(ScheduleStatus::ScheduledDeletion, scope.now);
        next.pending_action = Some(PendingAction {
            run_id: scope.run_id.clone(),
            started_at: scope.now,
            entity_snapshot: evidence.entity_snapshot.clone(),
            verification_hash: evidence.verification_hash.clone(),
        });
        Ok(match self.cas(&claimed, next)? {
            CasOutcome::Swapped(stamped) => Prepared::Ready(stamped, evidence),
            CasOutcome::Conflict(_) => Prepared::Done(ScheduleOutcome::Conflict.into()),
        })
    }

    /// Run the terminal action and append its audit entry.
    fn execute(
        &mut self,
        scope: &RunScope<'_>,
        claimed: &RetentionSchedule,
        policy: &RetentionPolicy,
        key: &str,
        evidence: PreActionEvidence,
    ) -> Result<(), ExecuteFailure> {
        let entity = &claimed.entity;
        let anonymized_snapshot = match policy.terminal_action() {
            TerminalAction::Delete => {
                let mode = self.settings.delete_mode_for(entity.entity_type.as_str());
                self.executor
                    .delete(entity, mode, &evidence.verification_hash)
                    .map_err(ExecuteFailure::from_action)?;
                log_event!(
                    scope.log,
                    INFO,
                    event_names::DELETE_EXECUTED,
                    Stage::Execute,
                    "entity deleted",
                    schedule_id = %claimed.id, entity = %entity, mode = %mode,
                    verification_hash = %evidence.verification_hash
                );
                None
            }
            TerminalAction::Anonymize => {
                let anonymized = self
                    .executor
                    .anonymize(entity, &evidence.verification_hash)
                    .map_err(ExecuteFailure::from_action)?;
                log_event!(
                    scope.log,
                    INFO,
                    event_names::ANONYMIZE_EXECUTED,
                    Stage::Execute,
                    "entity anonymized",
                    schedule_id = %claimed.id, entity = %entity,
                    verification_hash = %evidence.verification_hash
                );
                Some(anonymized)
            }
        };

        let record = self.record_for(
            claimed,
            policy,
            evidence.entity_snapshot,
            evidence.verification_hash,
            anonymized_snapshot,
        );
        self.append(scope, claimed, &record, key)
    }

    /// Log and commit an action an earlier run performed without settling.
    /// The audit entry carries the evidence captured before that action.
    fn settle_applied(
        &mut self,
        scope: &RunScope<'_>,
        claimed: &RetentionSchedule,
        policy: &RetentionPolicy,
        key: &str,
        pending: PendingAction,
        after: Option<PreActionEvidence>,
    ) -> Result<Step, OrchestratorError> {
        log_event!(
            scope.log,
            INFO,
            event_names::EXECUTE_CONFIRMED,
            Stage::Execute,
            "pending action already took effect; recording it",
            schedule_id = %claimed.id, entity = %claimed.entity,
            started_by = %pending.run_id, entity_present = after.is_some()
        );
        let anonymized_snapshot = match policy.terminal_action() {
            TerminalAction::Anonymize => after.map(|e| e.entity_snapshot),
            TerminalAction::Delete => None,
        };
        let record = self.record_for(
            claimed,
            policy,
            pending.entity_snapshot,
            pending.verification_hash,
            anonymized_snapshot,
        );
        match self.append(scope, claimed, &record, key) {
            Ok(()) | Err(ExecuteFailure::Duplicate) => self.commit(scope, claimed, policy, true),
            Err(ExecuteFailure::Audit(source)) => Err(self.audit_failed(scope, claimed, source)),
            Err(ExecuteFailure::Hook(error) | ExecuteFailure::Unsettled(error)) => {
                Ok(Step::Failed(Stage::Audit, error))
            }
        }
    }

    fn record_for(
        &self,
        claimed: &RetentionSchedule,
        policy: &RetentionPolicy,
        entity_snapshot: String,
        verification_hash: String,
        anonymized_snapshot: Option<String>,
    ) -> TerminalActionRecord {
        let delete_mode = match policy.terminal_action() {
            TerminalAction::Delete => Some(
                self.settings
                    .delete_mode_for(claimed.entity.entity_type.as_str()),
            ),
            TerminalAction::Anonymize => None,
        };
        TerminalActionRecord {
            schedule_id: claimed.id.clone(),
            entity: claimed.entity.clone(),
            category: claimed.category.clone(),
            policy_id: claimed.policy_id.clone(),
            delete_mode,
            entity_snapshot,
            verification_hash,
            anonymized_snapshot,
            executed_by: self.settings.executor_identity.clone(),
            executed_at: self.clock.now(),
            approved_by: claimed.approved_by.clone(),
            approved_at: claimed.approved_at,
            data_creation_date: claimed.data_creation_date,
            last_activity_date: claimed.last_activity_date,
            deletion_date: claimed.dates.deletion_date,
        }
    }

    fn append(
        &mut self,
        scope: &RunScope<'_>,
        claimed: &RetentionSchedule,
        record: &TerminalActionRecord,
        key: &str,
    ) -> Result<(), ExecuteFailure> {
        match self.audit.record_terminal(&scope.audit, record, key) {
            Ok(entry) => {
                log_event!(
                    scope.log,
                    INFO,
                    event_names::AUDIT_WRITTEN,
                    Stage::Audit,
                    "audit entry appended",
                    schedule_id = %claimed.id, entry_hash = entry.hash()
                );
                Ok(())
            }
            Err(AuditError::DuplicateTransition(_)) => Err(ExecuteFailure::Duplicate),
            Err(e) => Err(ExecuteFailure::Audit(e)),
        }
    }

    fn audit_failed(
        &self,
        scope: &RunScope<'_>,
        claimed: &RetentionSchedule,
        source: AuditError,
    ) -> OrchestratorError {
        log_event!(
            scope.log,
            ERROR,
            event_names::AUDIT_FAILED,
            Stage::Audit,
            "audit write failed after execution",
            schedule_id = %claimed.id, entity = %claimed.entity, error = %source
        );
        OrchestratorError::Audit {
            schedule_id: claimed.id.clone(),
            source,
        }
    }

    /// CAS `scheduled_deletion → deleted | anonymized`, dropping the claim.
    fn commit(
        &self,
        scope: &RunScope<'_>,
        claimed: &RetentionSchedule,
        policy: &RetentionPolicy,
        recovered: bool,
    ) -> Result<Step, OrchestratorError> {
        let terminal = match policy.terminal_action() {
            TerminalAction::Delete => ScheduleStatus::Deleted,
            TerminalAction::Anonymize => ScheduleStatus::Anonymized,
        };
        let mut next = claimed.transitioned(terminal, self.clock.now());
        next.claim = None;
        next.pending_action = None;

        match self.cas(claimed, next)? {
            CasOutcome::Swapped(_) if recovered => {
                log_event!(
                    scope.log,
                    INFO,
                    event_names::EXECUTE_RECOVERED,
                    Stage::Commit,
                    "committed action already recorded in the audit log",
                    schedule_id = %claimed.id, entity = %claimed.entity, status = %terminal
                );
                Ok(ScheduleOutcome::Recovered.into())
            }
            CasOutcome::Swapped(_) => Ok(match terminal {
                ScheduleStatus::Anonymized => ScheduleOutcome::Anonymized,
                _ => ScheduleOutcome::Deleted,
            }
            .into()),
            // The action is logged; a later run recovers the commit once the
            // claim goes stale.
            CasOutcome::Conflict(current) => Ok(Step::Failed(
                Stage::Commit,
                rl_common::Error::InvalidTransition {
                    schedule_id: claimed.id.to_string(),
                    from: current.status.to_string(),
                    to: terminal.to_string(),
                },
            )),
        }
    }

    /// Give the schedule back in the status it had before the claim. Only
    /// called once the hook has definitely changed nothing.
    fn release(&self, claimed: &RetentionSchedule) -> Result<(), OrchestratorError> {
        let previous = claimed
            .claim
            .as_ref()
            .map_or(ScheduleStatus::WarningSent, |c| c.previous_status);
        let mut next = claimed.transitioned(previous, self.clock.now());
        next.claim = None;
        next.pending_action = None;
        self.cas(claimed, next)?;
        Ok(())
    }

    fn cas(
        &self,
        current: &RetentionSchedule,
        next: RetentionSchedule,
    ) -> Result<CasOutcome, OrchestratorError> {
        self.store
            .compare_and_swap(current.status, current.revision, next)
            .map_err(|source| OrchestratorError::Store {
                schedule_id: current.id.clone(),
                source,
            })
    }
}

enum Prepared {
    /// Evidence is persisted; the action may run.
    Ready(RetentionSchedule, PreActionEvidence),
    /// An earlier run's action took effect but was never logged.
    Applied {
        claimed: RetentionSchedule,
        pending: PendingAction,
        after: Option<PreActionEvidence>,
    },
    Done(Step),
}

enum ExecuteFailure {
    /// The hook reported an error; the entity is unchanged.
    Hook(rl_common::Error),
    /// The hook timed out or its worker died. It may still complete.
    Unsettled(rl_common::Error),
    /// The key was recorded by another writer in the meantime.
    Duplicate,
    Audit(AuditError),
}

impl ExecuteFailure {
    fn from_action(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Timeout { .. } | ExecutorError::WorkerLost(_) => {
                ExecuteFailure::Unsettled(err.into())
            }
            other => ExecuteFailure::Hook(other.into()),
        }
    }
}

fn event_type(policy: &RetentionPolicy) -> AuditEventType {
    match policy.terminal_action() {
        TerminalAction::Delete => AuditEventType::Deletion,
        TerminalAction::Anonymize => AuditEventType::Anonymization,
    }
}

fn would(policy: &RetentionPolicy) -> ScheduleOutcome {
    match policy.terminal_action() {
        TerminalAction::Delete => ScheduleOutcome::WouldDelete,
        TerminalAction::Anonymize => ScheduleOutcome::WouldAnonymize,
    }
}
