//! Criterion benchmarks for date computation and batch selection.
//!
//! Everything runs against the in-memory store so results are deterministic
//! in CI and on developer machines.

use chrono::{NaiveDate, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rl_common::EntityRef;
use rl_config::PolicyFile;
use rl_core::registry::PolicyRegistry;
use rl_core::schedule::{compute_dates, RetentionSchedule};
use rl_core::store::{MemoryScheduleStore, ScheduleFilter, ScheduleStore};

fn registry() -> PolicyRegistry {
    let file = PolicyFile::from_json(
        r#"{"schema_version":"1.0.0","policies":[
            {"category":"medical_records","version":1,"retention_period":"20y","warning_period":"180d","grace_period":"90d"},
            {"category":"billing","version":1,"retention_period":"5y","warning_period":"1m","grace_period":"30d"}
        ]}"#,
    )
    .expect("bench policies should parse");
    PolicyRegistry::from_file(file).expect("bench policies should be valid")
}

fn bench_compute_dates(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("compute_dates");
    for category in ["medical_records", "billing"] {
        let policy = registry.resolve(category).expect("policy exists");
        let start = NaiveDate::from_ymd_opt(2004, 2, 29).expect("valid date");
        group.bench_with_input(BenchmarkId::from_parameter(category), policy, |b, p| {
            b.iter(|| black_box(compute_dates(black_box(p), black_box(start))))
        });
    }
    group.finish();
}

fn populated_store(registry: &PolicyRegistry, count: u32) -> MemoryScheduleStore {
    let store = MemoryScheduleStore::new();
    let base = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid date");
    let now = Utc::now();
    for i in 0..count {
        let category = if i % 3 == 0 { "billing" } else { "medical_records" };
        let policy = registry.resolve(category).expect("policy exists");
        // Spread activity over ~25 years so both batches are non-trivial.
        let activity = base + chrono::Duration::days(i64::from(i % 9_000));
        let dates = compute_dates(policy, activity).expect("dates in range");
        let entity = EntityRef::new("patient", i.to_string()).expect("valid entity");
        let schedule =
            RetentionSchedule::new(entity, category, policy.id(), activity, activity, dates, now);
        store.insert(schedule).expect("unique entity");
    }
    store
}

fn bench_batch_selection(c: &mut Criterion) {
    let registry = registry();
    let today = NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date");
    let mut group = c.benchmark_group("batch_selection");
    for count in [1_000u32, 10_000] {
        let store = populated_store(&registry, count);
        let all = ScheduleFilter::default();
        let sharded = ScheduleFilter {
            shard: Some("0/4".parse().expect("valid shard")),
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("due_for_warning", count), &store, |b, s| {
            b.iter(|| black_box(s.due_for_warning(today, &all).map(|v| v.len())))
        });
        group.bench_with_input(
            BenchmarkId::new("due_for_warning_sharded", count),
            &store,
            |b, s| b.iter(|| black_box(s.due_for_warning(today, &sharded).map(|v| v.len()))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_compute_dates, bench_batch_selection);
criterion_main!(benches);
