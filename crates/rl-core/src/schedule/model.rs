//! Retention schedule record and lifecycle status.

use super::calc::ScheduleDates;
use chrono::{DateTime, NaiveDate, Utc};
use rl_common::{EntityRef, PolicyId, RunId, ScheduleId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a schedule.
///
/// ```text
/// active → warning_sent → grace_period → scheduled_deletion → deleted | anonymized
///
/// any non-terminal status → legal_hold → active (on release)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    WarningSent,
    GracePeriod,
    ScheduledDeletion,
    Deleted,
    Anonymized,
    LegalHold,
}

impl ScheduleStatus {
    pub const ALL: [ScheduleStatus; 7] = [
        ScheduleStatus::Active,
        ScheduleStatus::WarningSent,
        ScheduleStatus::GracePeriod,
        ScheduleStatus::ScheduledDeletion,
        ScheduleStatus::Deleted,
        ScheduleStatus::Anonymized,
        ScheduleStatus::LegalHold,
    ];

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScheduleStatus::Deleted | ScheduleStatus::Anonymized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::WarningSent => "warning_sent",
            ScheduleStatus::GracePeriod => "grace_period",
            ScheduleStatus::ScheduledDeletion => "scheduled_deletion",
            ScheduleStatus::Deleted => "deleted",
            ScheduleStatus::Anonymized => "anonymized",
            ScheduleStatus::LegalHold => "legal_hold",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduleStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown schedule status: {}", s))
    }
}

/// A run's claim on a schedule it is about to delete or anonymize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub run_id: RunId,
    pub claimed_at: DateTime<Utc>,
    /// Status restored if the terminal action fails.
    pub previous_status: ScheduleStatus,
}

impl Claim {
    /// A claim older than `ttl` belongs to a run that is presumed dead.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.claimed_at) >= ttl
    }
}

/// Pre-action evidence persisted before a terminal action is invoked.
///
/// Present from the moment the action may have started until its outcome
/// is settled by an audit record and commit, or by a definite hook error.
/// A run that finds one re-snapshots the entity before acting again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    /// Canonical JSON snapshot taken before the action.
    pub entity_snapshot: String,
    pub verification_hash: String,
}

/// Per-entity retention schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSchedule {
    pub schema_version: String,
    pub id: ScheduleId,
    pub entity: EntityRef,
    pub category: String,

    /// Policy version the dates were computed from.
    pub policy_id: PolicyId,

    pub data_creation_date: NaiveDate,
    pub last_activity_date: NaiveDate,

    #[serde(flatten)]
    pub dates: ScheduleDates,

    pub status: ScheduleStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_sent_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_hold_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_hold_applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_hold_applied_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,

    /// Previous policy version, set by an explicit rebase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_policy_id: Option<PolicyId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Bumped by the store on every write.
    pub revision: u64,
}

impl RetentionSchedule {
    /// A fresh `active` schedule. The store assigns the first revision.
    pub fn new(
        entity: EntityRef,
        category: &str,
        policy_id: PolicyId,
        data_creation_date: NaiveDate,
        last_activity_date: NaiveDate,
        dates: ScheduleDates,
        now: DateTime<Utc>,
    ) -> Self {
        RetentionSchedule {
            schema_version: rl_common::SCHEMA_VERSION.to_string(),
            id: ScheduleId::new(),
            entity,
            category: category.to_string(),
            policy_id,
            data_creation_date,
            last_activity_date,
            dates,
            status: ScheduleStatus::Active,
            warning_sent_at: None,
            legal_hold_reason: None,
            legal_hold_applied_at: None,
            legal_hold_applied_by: None,
            approved_by: None,
            approved_at: None,
            claim: None,
            pending_action: None,
            superseded_policy_id: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_held(&self) -> bool {
        self.status == ScheduleStatus::LegalHold
    }

    pub fn is_approved(&self) -> bool {
        self.approved_by.is_some()
    }

    /// Whether another run is executing the terminal action right now.
    /// When the current claim stops blocking other writers.
    pub fn claim_expires_at(&self, ttl: chrono::Duration) -> Option<DateTime<Utc>> {
        self.claim.as_ref().map(|c| c.claimed_at + ttl)
    }

    pub fn has_live_claim(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.status == ScheduleStatus::ScheduledDeletion
            && self.claim.as_ref().is_some_and(|c| !c.is_stale(now, ttl))
    }

    /// Whole days between the deletion date and `today` (0 when not due).
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.dates.deletion_date).num_days().max(0)
    }

    /// Copy for the next write: same record, new status and timestamp.
    pub fn transitioned(&self, status: ScheduleStatus, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RetentionSchedule {
        let day = |m, d| NaiveDate::from_ymd_opt(2025, m, d).unwrap();
        RetentionSchedule::new(
            "patient:42".parse().unwrap(),
            "medical_records",
            PolicyId::new("medical_records", 1),
            day(1, 1),
            day(1, 1),
            ScheduleDates {
                retention_end_date: day(6, 1),
                warning_date: day(5, 1),
                deletion_date: day(7, 1),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_status_strings() {
        for status in ScheduleStatus::ALL {
            assert_eq!(status.as_str().parse::<ScheduleStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("purged".parse::<ScheduleStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = ScheduleStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![ScheduleStatus::Deleted, ScheduleStatus::Anonymized]
        );
    }

    #[test]
    fn test_dates_are_flattened_in_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["retention_end_date"], "2025-06-01");
        assert_eq!(json["warning_date"], "2025-05-01");
        assert_eq!(json["deletion_date"], "2025-07-01");
        assert_eq!(json["status"], "active");
        assert!(json.get("claim").is_none());
    }

    #[test]
    fn test_claim_staleness() {
        let now = Utc::now();
        let claim = Claim {
            run_id: RunId::new(),
            claimed_at: now - chrono::Duration::minutes(90),
            previous_status: ScheduleStatus::GracePeriod,
        };
        assert!(claim.is_stale(now, chrono::Duration::hours(1)));
        assert!(!claim.is_stale(now, chrono::Duration::hours(2)));
    }

    #[test]
    fn test_days_overdue() {
        let schedule = sample();
        let day = |m, d| NaiveDate::from_ymd_opt(2025, m, d).unwrap();
        assert_eq!(schedule.days_overdue(day(6, 1)), 0);
        assert_eq!(schedule.days_overdue(day(7, 11)), 10);
    }
}
