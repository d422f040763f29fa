//! Full-month rebuild engine.
//!
//! Recomputes a month's cache rows from scratch off the check-in event log.
//! The rebuild is the authoritative correction path: whatever drift the diff
//! stream accumulated (missed jobs, legacy rows, manual edits), a completed
//! rebuild converges the month back to the event log's truth.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use chrono::NaiveDate;
use daystats_core::{Month, UserId};
use daystats_events::{EventLog, EventLogError};

use crate::cache::{CacheError, CacheStore, DailyTotal, MonthlyUserStat, RebuildTask, SourceVersion};

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Outcome of one month's rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RebuildReport {
    pub month: Month,
    /// Monthly rows written.
    pub users_written: usize,
    /// Daily rows written.
    pub days_written: usize,
    /// Stale monthly rows deleted (users with no events left in the month).
    pub users_removed: usize,
    /// Stale daily rows deleted.
    pub days_removed: usize,
    /// Deadline hit before the month converged; the task is left `pending`.
    pub timed_out: bool,
}

impl RebuildReport {
    fn new(month: Month) -> Self {
        Self {
            month,
            users_written: 0,
            days_written: 0,
            users_removed: 0,
            days_removed: 0,
            timed_out: false,
        }
    }
}

/// Rebuilds months of cache rows from the event log.
pub struct RebuildEngine<E, C> {
    events: E,
    cache: C,
}

impl<E, C> RebuildEngine<E, C>
where
    E: EventLog,
    C: CacheStore,
{
    pub fn new(events: E, cache: C) -> Self {
        Self { events, cache }
    }

    /// Rebuild the default window: the current month, then the previous one.
    ///
    /// Two months cover the steady-state drift window (late check-ins and
    /// removals land overwhelmingly in the current or just-closed month).
    /// Months are isolated units: one month's error is folded into its slot
    /// and the next month still gets its rebuild attempt.
    pub fn rebuild_default(
        &self,
        deadline: Instant,
    ) -> Vec<(Month, Result<RebuildReport, RebuildError>)> {
        let current = Month::current();
        [current, current.prev()]
            .into_iter()
            .map(|month| (month, self.rebuild_month(month, deadline)))
            .collect()
    }

    /// Recompute every cache row for `month` from the event log.
    ///
    /// Writes the per-user monthly rows and per-day totals first, then
    /// removes rows the recompute no longer justifies; the cache is never
    /// left emptier than the event log warrants mid-run. A hit deadline
    /// leaves the task `pending` with reason `timeout`; storage or query
    /// errors leave it `failed`.
    pub fn rebuild_month(
        &self,
        month: Month,
        deadline: Instant,
    ) -> Result<RebuildReport, RebuildError> {
        let mut task = RebuildTask::started(month);
        self.cache.task_upsert(task.clone())?;

        match self.run(month, deadline) {
            Ok(report) => {
                if report.timed_out {
                    task.finish_pending("timeout");
                } else {
                    task.finish_succeeded();
                }
                self.cache.task_upsert(task)?;
                info!(
                    %month,
                    users = report.users_written,
                    days = report.days_written,
                    removed_users = report.users_removed,
                    removed_days = report.days_removed,
                    timed_out = report.timed_out,
                    "rebuild finished"
                );
                Ok(report)
            }
            Err(e) => {
                task.finish_failed(e.to_string());
                if let Err(task_err) = self.cache.task_upsert(task) {
                    warn!(%month, error = %task_err, "failed to record rebuild failure");
                }
                Err(e)
            }
        }
    }

    fn run(&self, month: Month, deadline: Instant) -> Result<RebuildReport, RebuildError> {
        let mut report = RebuildReport::new(month);

        let events = self
            .events
            .events_in_range(month.first_day(), month.last_day())?;

        // Already user-then-date ordered, so per-user groups are contiguous
        // and daily counts come out sorted.
        let mut per_user: BTreeMap<UserId, Vec<NaiveDate>> = BTreeMap::new();
        let mut per_day: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for event in &events {
            let dates = per_user.entry(event.user_id).or_default();
            // Duplicate check-ins for one day collapse to one marked day.
            if dates.last() != Some(&event.entry_date) {
                dates.push(event.entry_date);
                *per_day.entry(event.entry_date).or_default() += 1;
            }
        }

        for (user_id, dates) in &per_user {
            self.cache
                .monthly_upsert(MonthlyUserStat::from_dates(month, *user_id, dates.clone()))?;
            report.users_written += 1;

            if Instant::now() >= deadline {
                report.timed_out = true;
                return Ok(report);
            }
        }

        for (day, total) in &per_day {
            self.cache
                .daily_upsert(DailyTotal::new(*day, *total, SourceVersion::Rebuild))?;
            report.days_written += 1;

            if Instant::now() >= deadline {
                report.timed_out = true;
                return Ok(report);
            }
        }

        // Cleanup runs after all upserts so a crash mid-run leaves stale
        // extra rows (corrected next pass) rather than missing ones.
        for stale in self.cache.monthly_list(month)? {
            if !per_user.contains_key(&stale.user_id) {
                self.cache.monthly_delete(month, stale.user_id)?;
                report.users_removed += 1;

                if Instant::now() >= deadline {
                    report.timed_out = true;
                    return Ok(report);
                }
            }
        }

        let live_days: HashSet<NaiveDate> = per_day.keys().copied().collect();
        for stale in self.cache.daily_list(month)? {
            if !live_days.contains(&stale.day) {
                self.cache.daily_delete(stale.day)?;
                report.days_removed += 1;

                if Instant::now() >= deadline {
                    report.timed_out = true;
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use daystats_events::InMemoryEventLog;

    use crate::cache::{InMemoryCacheStore, RebuildStatus};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn month() -> Month {
        "2025-09".parse().unwrap()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn engine() -> (
        Arc<InMemoryEventLog>,
        Arc<InMemoryCacheStore>,
        RebuildEngine<Arc<InMemoryEventLog>, Arc<InMemoryCacheStore>>,
    ) {
        let events = Arc::new(InMemoryEventLog::new());
        let cache = InMemoryCacheStore::arc();
        let engine = RebuildEngine::new(events.clone(), cache.clone());
        (events, cache, engine)
    }

    #[test]
    fn rebuild_writes_monthly_and_daily_rows() {
        let (events, cache, engine) = engine();
        let u1 = UserId::new();
        let u2 = UserId::new();
        events.record(u1, d(1));
        events.record(u1, d(5));
        events.record(u2, d(5));

        let report = engine.rebuild_month(month(), far_deadline()).unwrap();
        assert_eq!(report.users_written, 2);
        assert_eq!(report.days_written, 2);
        assert!(!report.timed_out);

        let s1 = cache.monthly_get(month(), u1).unwrap().unwrap();
        assert_eq!(s1.total, 2);
        assert!(s1.marked_days.is_set(0));
        assert!(s1.marked_days.is_set(4));
        assert_eq!(s1.source_version, SourceVersion::Rebuild);
        assert!(s1.is_consistent());

        let s2 = cache.monthly_get(month(), u2).unwrap().unwrap();
        assert_eq!(s2.total, 1);

        assert_eq!(cache.daily_get(d(1)).unwrap().unwrap().total, 1);
        assert_eq!(cache.daily_get(d(5)).unwrap().unwrap().total, 2);

        let task = cache.task_get(month()).unwrap().unwrap();
        assert_eq!(task.status, RebuildStatus::Succeeded);
        assert!(task.last_finished_at.is_some());
    }

    #[test]
    fn rebuild_removes_rows_the_event_log_no_longer_justifies() {
        let (events, cache, engine) = engine();
        let gone = UserId::new();
        let kept = UserId::new();

        // Stale cache state: a user and a day with no surviving events.
        cache
            .monthly_upsert(MonthlyUserStat::from_dates(month(), gone, [d(3)]))
            .unwrap();
        cache
            .daily_upsert(DailyTotal::new(d(3), 1, SourceVersion::Diff))
            .unwrap();

        events.record(kept, d(7));
        let report = engine.rebuild_month(month(), far_deadline()).unwrap();

        assert_eq!(report.users_removed, 1);
        assert_eq!(report.days_removed, 1);
        assert!(cache.monthly_get(month(), gone).unwrap().is_none());
        assert!(cache.daily_get(d(3)).unwrap().is_none());
        assert_eq!(cache.daily_get(d(7)).unwrap().unwrap().total, 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let (events, cache, engine) = engine();
        let user = UserId::new();
        events.record(user, d(1));
        events.record(user, d(2));

        engine.rebuild_month(month(), far_deadline()).unwrap();
        let first = cache.monthly_get(month(), user).unwrap().unwrap();

        engine.rebuild_month(month(), far_deadline()).unwrap();
        let second = cache.monthly_get(month(), user).unwrap().unwrap();

        assert_eq!(first.total, second.total);
        assert_eq!(first.marked_days, second.marked_days);
        assert_eq!(first.marked_dates, second.marked_dates);
        assert_eq!(cache.daily_list(month()).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_events_for_one_day_count_once() {
        let (events, cache, engine) = engine();
        let user = UserId::new();
        events.record(user, d(5));
        events.record(user, d(5));

        engine.rebuild_month(month(), far_deadline()).unwrap();

        let stat = cache.monthly_get(month(), user).unwrap().unwrap();
        assert_eq!(stat.total, 1);
        assert_eq!(cache.daily_get(d(5)).unwrap().unwrap().total, 1);
    }

    #[test]
    fn expired_deadline_leaves_task_pending_with_timeout_reason() {
        let (events, cache, engine) = engine();
        events.record(UserId::new(), d(1));
        events.record(UserId::new(), d(2));

        let report = engine.rebuild_month(month(), Instant::now()).unwrap();
        assert!(report.timed_out);
        assert!(report.users_written < 2 || report.days_written < 2);

        let task = cache.task_get(month()).unwrap().unwrap();
        assert_eq!(task.status, RebuildStatus::Pending);
        assert_eq!(task.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn rebuild_default_covers_current_and_previous_month() {
        let (_, cache, engine) = engine();
        let outcomes = engine.rebuild_default(far_deadline());

        let current = Month::current();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, current);
        assert_eq!(outcomes[1].0, current.prev());
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
        assert!(cache.task_get(current).unwrap().is_some());
        assert!(cache.task_get(current.prev()).unwrap().is_some());
    }

    #[test]
    fn rebuild_default_isolates_per_month_failures() {
        struct DownEventLog;

        impl daystats_events::EventLog for DownEventLog {
            fn events_in_range(
                &self,
                _start: NaiveDate,
                _end: NaiveDate,
            ) -> Result<Vec<daystats_events::CheckInEvent>, EventLogError> {
                Err(EventLogError::Storage("connection refused".to_string()))
            }

            fn count_in_range(&self, _start: NaiveDate, _end: NaiveDate) -> Result<u64, EventLogError> {
                Err(EventLogError::Storage("connection refused".to_string()))
            }
        }

        let cache = InMemoryCacheStore::arc();
        let engine = RebuildEngine::new(DownEventLog, cache.clone());

        let outcomes = engine.rebuild_default(far_deadline());
        assert_eq!(outcomes.len(), 2);
        // The first month's error does not skip the second month's attempt.
        assert!(outcomes.iter().all(|(_, r)| r.is_err()));
        for month in [Month::current(), Month::current().prev()] {
            let task = cache.task_get(month).unwrap().unwrap();
            assert_eq!(task.status, RebuildStatus::Failed);
            assert!(task.last_error.is_some());
        }
    }

    #[test]
    fn expired_deadline_truncates_stale_row_cleanup() {
        let (_, cache, engine) = engine();

        // Stale cache state, empty event log: the whole run is cleanup.
        for _ in 0..2 {
            cache
                .monthly_upsert(MonthlyUserStat::from_dates(month(), UserId::new(), [d(3)]))
                .unwrap();
        }

        let report = engine.rebuild_month(month(), Instant::now()).unwrap();
        assert!(report.timed_out);
        assert_eq!(report.users_removed, 1);
        assert_eq!(cache.monthly_list(month()).unwrap().len(), 1);
        assert_eq!(
            cache.task_get(month()).unwrap().unwrap().status,
            RebuildStatus::Pending
        );
    }
}
