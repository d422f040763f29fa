use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use daystats_core::{Month, UserId};
use daystats_events::InMemoryEventLog;
use daystats_infra::cache::{CacheStore, InMemoryCacheStore, MonthlyUserStat, SourceVersion};
use daystats_infra::queue::{DiffAction, DiffJob, DiffQueue, InMemoryDiffQueue};
use daystats_infra::{DiffApplier, RebuildEngine};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
}

fn month() -> Month {
    "2025-09".parse().unwrap()
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

fn seeded_users(cache: &InMemoryCacheStore, count: usize) -> Vec<UserId> {
    (0..count)
        .map(|_| {
            let user = UserId::new();
            cache
                .monthly_upsert(MonthlyUserStat::empty(month(), user, SourceVersion::Rebuild))
                .unwrap();
            user
        })
        .collect()
}

fn bench_diff_apply_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_apply_throughput");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("apply_batch", batch_size),
            batch_size,
            |b, &size| {
                b.iter_with_setup(
                    || {
                        let queue = InMemoryDiffQueue::arc();
                        let cache = InMemoryCacheStore::arc();
                        let users = seeded_users(&cache, size);
                        for (i, user) in users.iter().enumerate() {
                            queue
                                .enqueue(DiffJob::new(
                                    *user,
                                    day((i % 28 + 1) as u32),
                                    DiffAction::Add,
                                    "checkin",
                                ))
                                .unwrap();
                        }
                        let jobs = queue.claim_batch(size).unwrap();
                        (DiffApplier::new(queue, cache), jobs)
                    },
                    |(applier, jobs)| {
                        black_box(applier.apply_batch(jobs, far_deadline()));
                    },
                );
            },
        );
    }

    group.finish();
}

fn bench_duplicate_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_apply");
    group.sample_size(1000);

    // Steady-state redelivery path: the bit is already set, nothing changes.
    group.bench_function("replayed_add", |b| {
        let queue = InMemoryDiffQueue::arc();
        let cache = InMemoryCacheStore::arc();
        let user = seeded_users(&cache, 1)[0];
        let applier = DiffApplier::new(queue.clone(), cache);

        queue
            .enqueue(DiffJob::new(user, day(5), DiffAction::Add, "checkin"))
            .unwrap();
        let jobs = queue.claim_batch(1).unwrap();
        applier.apply_batch(jobs.clone(), far_deadline());

        b.iter_with_setup(
            || {
                let id = queue
                    .enqueue(DiffJob::new(user, day(5), DiffAction::Add, "checkin"))
                    .unwrap();
                let jobs = queue.claim_batch(1).unwrap();
                assert_eq!(jobs[0].id, id);
                jobs
            },
            |jobs| {
                black_box(applier.apply_batch(jobs, far_deadline()));
            },
        );
    });

    group.finish();
}

fn bench_rebuild_month(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild_month");

    for user_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_events", user_count),
            user_count,
            |b, &count| {
                let events = Arc::new(InMemoryEventLog::new());
                for i in 0..count {
                    let user = UserId::new();
                    // Roughly a third of the month marked per user.
                    for d in (1u32..=28).step_by(3) {
                        events.record(user, day(d + (i % 3) as u32));
                    }
                }
                let cache = InMemoryCacheStore::arc();
                let engine = RebuildEngine::new(events, cache);

                b.iter(|| {
                    black_box(engine.rebuild_month(month(), far_deadline()).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_diff_apply_throughput,
    bench_duplicate_apply,
    bench_rebuild_month
);
criterion_main!(benches);
