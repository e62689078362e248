//! Retention schedules: the per-entity record and its date arithmetic.

mod calc;
mod model;

pub use calc::{compute_dates, CalcError, ScheduleDates};
pub use model::{Claim, PendingAction, RetentionSchedule, ScheduleStatus};
