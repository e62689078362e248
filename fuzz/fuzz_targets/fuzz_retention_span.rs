//! Fuzz target for retention spans and schedule date arithmetic.
//!
//! For any parseable span and any representable date, adding never panics
//! and, when it succeeds, never moves the date backwards.

#![no_main]

use arbitrary::Arbitrary;
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use rl_config::RetentionSpan;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    span: &'a str,
    days_from_ce: i32,
}

fuzz_target!(|input: Input<'_>| {
    let Ok(span) = input.span.parse::<RetentionSpan>() else {
        return;
    };
    let Some(date) = NaiveDate::from_num_days_from_ce_opt(input.days_from_ce) else {
        return;
    };
    if let Some(later) = span.add_to(date) {
        assert!(later >= date);
    }
    if let Some(earlier) = span.sub_from(date) {
        assert!(earlier <= date);
    }
});
