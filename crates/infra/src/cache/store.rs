//! Cache store boundary and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};

use daystats_core::{Month, UserId};

use super::model::{DailyTotal, MonthlyUserStat, RebuildTask, SourceVersion};

/// Cache store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(String),
}

impl CacheError {
    fn poisoned() -> Self {
        Self::Storage("lock poisoned".to_string())
    }
}

/// Single storage boundary over the cache-side tables: per-user monthly
/// stats, per-day totals, and per-month rebuild tasks.
///
/// Backends are interchangeable; the applier and rebuild engine are written
/// once against this trait. No long-held locks: correctness relies on
/// idempotent upserts plus periodic rebuild reconciliation.
pub trait CacheStore: Send + Sync {
    fn monthly_get(
        &self,
        month: Month,
        user_id: UserId,
    ) -> Result<Option<MonthlyUserStat>, CacheError>;

    fn monthly_upsert(&self, stat: MonthlyUserStat) -> Result<(), CacheError>;

    /// All monthly rows for one month (rebuild cleanup scan).
    fn monthly_list(&self, month: Month) -> Result<Vec<MonthlyUserStat>, CacheError>;

    fn monthly_delete(&self, month: Month, user_id: UserId) -> Result<(), CacheError>;

    fn daily_get(&self, day: NaiveDate) -> Result<Option<DailyTotal>, CacheError>;

    fn daily_upsert(&self, row: DailyTotal) -> Result<(), CacheError>;

    /// Atomically add `delta` to a day's total. Inserts the row when missing
    /// and `delta > 0`; deletes it when the result drops to zero or below
    /// (zero totals are represented by absence).
    fn daily_adjust(
        &self,
        day: NaiveDate,
        delta: i32,
        source: SourceVersion,
    ) -> Result<(), CacheError>;

    /// All daily rows with `day` inside `month`.
    fn daily_list(&self, month: Month) -> Result<Vec<DailyTotal>, CacheError>;

    fn daily_delete(&self, day: NaiveDate) -> Result<(), CacheError>;

    fn task_get(&self, month: Month) -> Result<Option<RebuildTask>, CacheError>;

    fn task_upsert(&self, task: RebuildTask) -> Result<(), CacheError>;
}

impl<C> CacheStore for Arc<C>
where
    C: CacheStore + ?Sized,
{
    fn monthly_get(
        &self,
        month: Month,
        user_id: UserId,
    ) -> Result<Option<MonthlyUserStat>, CacheError> {
        (**self).monthly_get(month, user_id)
    }

    fn monthly_upsert(&self, stat: MonthlyUserStat) -> Result<(), CacheError> {
        (**self).monthly_upsert(stat)
    }

    fn monthly_list(&self, month: Month) -> Result<Vec<MonthlyUserStat>, CacheError> {
        (**self).monthly_list(month)
    }

    fn monthly_delete(&self, month: Month, user_id: UserId) -> Result<(), CacheError> {
        (**self).monthly_delete(month, user_id)
    }

    fn daily_get(&self, day: NaiveDate) -> Result<Option<DailyTotal>, CacheError> {
        (**self).daily_get(day)
    }

    fn daily_upsert(&self, row: DailyTotal) -> Result<(), CacheError> {
        (**self).daily_upsert(row)
    }

    fn daily_adjust(
        &self,
        day: NaiveDate,
        delta: i32,
        source: SourceVersion,
    ) -> Result<(), CacheError> {
        (**self).daily_adjust(day, delta, source)
    }

    fn daily_list(&self, month: Month) -> Result<Vec<DailyTotal>, CacheError> {
        (**self).daily_list(month)
    }

    fn daily_delete(&self, day: NaiveDate) -> Result<(), CacheError> {
        (**self).daily_delete(day)
    }

    fn task_get(&self, month: Month) -> Result<Option<RebuildTask>, CacheError> {
        (**self).task_get(month)
    }

    fn task_upsert(&self, task: RebuildTask) -> Result<(), CacheError> {
        (**self).task_upsert(task)
    }
}

/// In-memory cache store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    monthly: RwLock<HashMap<(Month, UserId), MonthlyUserStat>>,
    daily: RwLock<BTreeMap<NaiveDate, DailyTotal>>,
    tasks: RwLock<HashMap<Month, RebuildTask>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl CacheStore for InMemoryCacheStore {
    fn monthly_get(
        &self,
        month: Month,
        user_id: UserId,
    ) -> Result<Option<MonthlyUserStat>, CacheError> {
        let monthly = self.monthly.read().map_err(|_| CacheError::poisoned())?;
        Ok(monthly.get(&(month, user_id)).cloned())
    }

    fn monthly_upsert(&self, stat: MonthlyUserStat) -> Result<(), CacheError> {
        let mut monthly = self.monthly.write().map_err(|_| CacheError::poisoned())?;
        monthly.insert((stat.month, stat.user_id), stat);
        Ok(())
    }

    fn monthly_list(&self, month: Month) -> Result<Vec<MonthlyUserStat>, CacheError> {
        let monthly = self.monthly.read().map_err(|_| CacheError::poisoned())?;
        let mut rows: Vec<_> = monthly
            .values()
            .filter(|s| s.month == month)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.user_id);
        Ok(rows)
    }

    fn monthly_delete(&self, month: Month, user_id: UserId) -> Result<(), CacheError> {
        let mut monthly = self.monthly.write().map_err(|_| CacheError::poisoned())?;
        monthly.remove(&(month, user_id));
        Ok(())
    }

    fn daily_get(&self, day: NaiveDate) -> Result<Option<DailyTotal>, CacheError> {
        let daily = self.daily.read().map_err(|_| CacheError::poisoned())?;
        Ok(daily.get(&day).cloned())
    }

    fn daily_upsert(&self, row: DailyTotal) -> Result<(), CacheError> {
        let mut daily = self.daily.write().map_err(|_| CacheError::poisoned())?;
        daily.insert(row.day, row);
        Ok(())
    }

    fn daily_adjust(
        &self,
        day: NaiveDate,
        delta: i32,
        source: SourceVersion,
    ) -> Result<(), CacheError> {
        let mut daily = self.daily.write().map_err(|_| CacheError::poisoned())?;

        let current = daily.get(&day).map(|r| r.total as i64).unwrap_or(0);
        let next = current + delta as i64;

        if daily.get(&day).is_none() && delta <= 0 {
            // Nothing to decrement; absence already means zero.
            return Ok(());
        }

        if next <= 0 {
            daily.remove(&day);
        } else {
            daily.insert(
                day,
                DailyTotal {
                    day,
                    total: next as u32,
                    calculated_at: Utc::now(),
                    source_version: source,
                },
            );
        }
        Ok(())
    }

    fn daily_list(&self, month: Month) -> Result<Vec<DailyTotal>, CacheError> {
        let daily = self.daily.read().map_err(|_| CacheError::poisoned())?;
        Ok(daily
            .range(month.first_day()..=month.last_day())
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn daily_delete(&self, day: NaiveDate) -> Result<(), CacheError> {
        let mut daily = self.daily.write().map_err(|_| CacheError::poisoned())?;
        daily.remove(&day);
        Ok(())
    }

    fn task_get(&self, month: Month) -> Result<Option<RebuildTask>, CacheError> {
        let tasks = self.tasks.read().map_err(|_| CacheError::poisoned())?;
        Ok(tasks.get(&month).cloned())
    }

    fn task_upsert(&self, task: RebuildTask) -> Result<(), CacheError> {
        let mut tasks = self.tasks.write().map_err(|_| CacheError::poisoned())?;
        tasks.insert(task.month, task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::model::RebuildStatus;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn month() -> Month {
        "2025-09".parse().unwrap()
    }

    #[test]
    fn monthly_upsert_get_delete() {
        let store = InMemoryCacheStore::new();
        let user = UserId::new();

        let stat = MonthlyUserStat::from_dates(month(), user, [d(1), d(5)]);
        store.monthly_upsert(stat.clone()).unwrap();

        let loaded = store.monthly_get(month(), user).unwrap().unwrap();
        assert_eq!(loaded, stat);
        assert_eq!(store.monthly_list(month()).unwrap().len(), 1);

        store.monthly_delete(month(), user).unwrap();
        assert!(store.monthly_get(month(), user).unwrap().is_none());
    }

    #[test]
    fn daily_adjust_inserts_increments_and_deletes() {
        let store = InMemoryCacheStore::new();

        // Missing row + positive delta: insert.
        store.daily_adjust(d(5), 1, SourceVersion::Diff).unwrap();
        assert_eq!(store.daily_get(d(5)).unwrap().unwrap().total, 1);

        store.daily_adjust(d(5), 1, SourceVersion::Diff).unwrap();
        assert_eq!(store.daily_get(d(5)).unwrap().unwrap().total, 2);

        store.daily_adjust(d(5), -1, SourceVersion::Diff).unwrap();
        assert_eq!(store.daily_get(d(5)).unwrap().unwrap().total, 1);

        // Dropping to zero deletes the row.
        store.daily_adjust(d(5), -1, SourceVersion::Diff).unwrap();
        assert!(store.daily_get(d(5)).unwrap().is_none());

        // Missing row + negative delta: no-op, no negative rows.
        store.daily_adjust(d(6), -1, SourceVersion::Diff).unwrap();
        assert!(store.daily_get(d(6)).unwrap().is_none());
    }

    #[test]
    fn daily_list_scans_month_range_only() {
        let store = InMemoryCacheStore::new();
        store.daily_adjust(d(1), 2, SourceVersion::Rebuild).unwrap();
        store.daily_adjust(d(30), 1, SourceVersion::Rebuild).unwrap();
        store
            .daily_adjust(
                NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
                1,
                SourceVersion::Rebuild,
            )
            .unwrap();

        let rows = store.daily_list(month()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].day, d(1));
        assert_eq!(rows[1].day, d(30));
    }

    #[test]
    fn task_upsert_replaces_per_month_row() {
        let store = InMemoryCacheStore::new();

        store.task_upsert(RebuildTask::started(month())).unwrap();
        assert_eq!(
            store.task_get(month()).unwrap().unwrap().status,
            RebuildStatus::Running
        );

        let mut task = RebuildTask::started(month());
        task.finish_succeeded();
        store.task_upsert(task).unwrap();
        assert_eq!(
            store.task_get(month()).unwrap().unwrap().status,
            RebuildStatus::Succeeded
        );
    }
}
