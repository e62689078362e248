//! Schedule date computation.
//!
//! A pure function of the policy and the last activity date. It is called
//! explicitly at creation, on activity and on rebase; stored dates are never
//! re-derived at read time.

use chrono::NaiveDate;
use rl_common::PolicyId;
use rl_config::RetentionPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three derived dates of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDates {
    /// `last_activity_date + retention_period`
    pub retention_end_date: NaiveDate,
    /// `retention_end_date - warning_period`
    pub warning_date: NaiveDate,
    /// `retention_end_date + grace_period`
    pub deletion_date: NaiveDate,
}

impl ScheduleDates {
    /// `warning_date <= retention_end_date <= deletion_date`
    pub fn is_ordered(&self) -> bool {
        self.warning_date <= self.retention_end_date && self.retention_end_date <= self.deletion_date
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalcError {
    #[error("{field} for policy {policy} falls outside the supported calendar range")]
    OutOfRange {
        policy: PolicyId,
        field: &'static str,
    },
}

impl From<CalcError> for rl_common::Error {
    fn from(err: CalcError) -> Self {
        rl_common::Error::Config(err.to_string())
    }
}

/// Compute the schedule dates for `policy` given the last activity date.
pub fn compute_dates(
    policy: &RetentionPolicy,
    last_activity_date: NaiveDate,
) -> Result<ScheduleDates, CalcError> {
    let out_of_range = |field| CalcError::OutOfRange {
        policy: policy.id(),
        field,
    };

    let retention_end_date = policy
        .retention_period
        .add_to(last_activity_date)
        .ok_or_else(|| out_of_range("retention_end_date"))?;
    let warning_date = policy
        .warning_period
        .sub_from(retention_end_date)
        .ok_or_else(|| out_of_range("warning_date"))?;
    let deletion_date = policy
        .grace_period
        .add_to(retention_end_date)
        .ok_or_else(|| out_of_range("deletion_date"))?;

    Ok(ScheduleDates {
        retention_end_date,
        warning_date,
        deletion_date,
    })
}
