//! Calendar retention spans.
//!
//! Retention law is written in calendar units ("keep for 20 years"), so a
//! span is not a fixed number of seconds. Years and months are applied as
//! calendar steps with month-end clamping (Jan 31 + 1m = Feb 28/29); days
//! are exact.
//!
//! Textual form: one or more `<count><unit>` groups with units `y`, `m`,
//! `w` (7 days) and `d`, e.g. `20y`, `180d`, `1y6m15d`. The zero span is
//! written `0d`.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest count accepted for a single unit.
const MAX_COMPONENT: u32 = 100_000;

/// Errors from parsing a span string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpanParseError {
    #[error("empty span")]
    Empty,

    #[error("invalid span {input:?}: {reason}")]
    Invalid { input: String, reason: String },
}

/// A calendar duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RetentionSpan {
    pub years: u32,
    pub months: u32,
    pub days: u32,
}

impl RetentionSpan {
    pub const ZERO: RetentionSpan = RetentionSpan {
        years: 0,
        months: 0,
        days: 0,
    };

    pub fn years(years: u32) -> Self {
        Self {
            years,
            ..Self::ZERO
        }
    }

    pub fn months(months: u32) -> Self {
        Self {
            months,
            ..Self::ZERO
        }
    }

    pub fn days(days: u32) -> Self {
        Self {
            days,
            ..Self::ZERO
        }
    }

    pub fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.days == 0
    }

    fn total_months(&self) -> u32 {
        self.years.saturating_mul(12).saturating_add(self.months)
    }

    /// `date + self`, or `None` when the result leaves chrono's range.
    pub fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.checked_add_months(Months::new(self.total_months()))?
            .checked_add_days(Days::new(u64::from(self.days)))
    }

    /// `date - self`, or `None` when the result leaves chrono's range.
    pub fn sub_from(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.checked_sub_months(Months::new(self.total_months()))?
            .checked_sub_days(Days::new(u64::from(self.days)))
    }

    /// Rough length in days, for sanity checks and display only.
    pub fn approx_days(&self) -> u64 {
        u64::from(self.years) * 365 + u64::from(self.months) * 30 + u64::from(self.days)
    }
}

impl fmt::Display for RetentionSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0d");
        }
        if self.years > 0 {
            write!(f, "{}y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}m", self.months)?;
        }
        if self.days > 0 {
            write!(f, "{}d", self.days)?;
        }
        Ok(())
    }
}

impl FromStr for RetentionSpan {
    type Err = SpanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(SpanParseError::Empty);
        }
        let invalid = |reason: &str| SpanParseError::Invalid {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut span = RetentionSpan::ZERO;
        let mut seen = [false; 4];
        let mut digits = String::new();

        for c in input.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            if digits.is_empty() {
                return Err(invalid("expected a count before each unit"));
            }
            let count: u32 = digits
                .parse()
                .ok()
                .filter(|n| *n <= MAX_COMPONENT)
                .ok_or_else(|| invalid("count out of range"))?;
            digits.clear();

            let slot = match c {
                'y' | 'Y' => 0,
                'm' | 'M' => 1,
                'w' | 'W' => 2,
                'd' | 'D' => 3,
                _ => return Err(invalid("unknown unit (expected y, m, w or d)")),
            };
            if seen[slot] {
                return Err(invalid("unit repeated"));
            }
            seen[slot] = true;

            match slot {
                0 => span.years = count,
                1 => span.months = count,
                2 => span.days = span.days.saturating_add(count * 7),
                _ => span.days = span.days.saturating_add(count),
            }
        }

        if !digits.is_empty() {
            return Err(invalid("missing unit after trailing count"));
        }
        Ok(span)
    }
}

impl Serialize for RetentionSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RetentionSpan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("20y".parse::<RetentionSpan>().unwrap(), RetentionSpan::years(20));
        assert_eq!("180d".parse::<RetentionSpan>().unwrap(), RetentionSpan::days(180));
        assert_eq!("2w".parse::<RetentionSpan>().unwrap(), RetentionSpan::days(14));
        assert_eq!(
            "1y6m15d".parse::<RetentionSpan>().unwrap(),
            RetentionSpan {
                years: 1,
                months: 6,
                days: 15
            }
        );
        assert!("0d".parse::<RetentionSpan>().unwrap().is_zero());
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!("".parse::<RetentionSpan>(), Err(SpanParseError::Empty));
        for bad in ["-5d", "5", "d", "5x", "1y1y", "99999999999d", "1.5y"] {
            assert!(bad.parse::<RetentionSpan>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_display_compact() {
        let span: RetentionSpan = "1y6m15d".parse().unwrap();
        assert_eq!(span.to_string(), "1y6m15d");
        assert_eq!(RetentionSpan::ZERO.to_string(), "0d");
    }

    #[test]
    fn test_serde_as_string() {
        let span: RetentionSpan = serde_json::from_str(r#""20y""#).unwrap();
        assert_eq!(span, RetentionSpan::years(20));
        assert_eq!(serde_json::to_string(&span).unwrap(), r#""20y""#);
        assert!(serde_json::from_str::<RetentionSpan>(r#""20q""#).is_err());
    }

    #[test]
    fn test_calendar_arithmetic() {
        assert_eq!(
            RetentionSpan::years(20).add_to(date(2005, 1, 1)),
            Some(date(2025, 1, 1))
        );
        assert_eq!(
            RetentionSpan::days(180).sub_from(date(2025, 1, 1)),
            Some(date(2024, 7, 5))
        );
        assert_eq!(
            RetentionSpan::days(90).add_to(date(2025, 1, 1)),
            Some(date(2025, 4, 1))
        );
    }

    #[test]
    fn test_month_end_clamps() {
        assert_eq!(
            RetentionSpan::months(1).add_to(date(2024, 1, 31)),
            Some(date(2024, 2, 29))
        );
        assert_eq!(
            RetentionSpan::years(1).add_to(date(2024, 2, 29)),
            Some(date(2025, 2, 28))
        );
    }

    proptest! {
        #[test]
        fn add_never_moves_backwards(
            y in 0u32..200, m in 0u32..24, d in 0u32..1000,
            base in 0i64..40_000,
        ) {
            let start = date(1970, 1, 1) + chrono::Duration::days(base);
            let span = RetentionSpan { years: y, months: m, days: d };
            let end = span.add_to(start).unwrap();
            prop_assert!(end >= start);
            prop_assert!(span.sub_from(end).unwrap() <= end);
        }

        #[test]
        fn display_parses_back(y in 0u32..500, m in 0u32..500, d in 0u32..5000) {
            let span = RetentionSpan { years: y, months: m, days: d };
            prop_assert_eq!(span.to_string().parse::<RetentionSpan>().unwrap(), span);
        }
    }
}
