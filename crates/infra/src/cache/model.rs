//! Cache row models.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use daystats_core::{DayMask, Month, UserId};

/// Which path last wrote a cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceVersion {
    /// Full-month recompute from the event log.
    Rebuild,
    /// Incremental diff application.
    Diff,
}

impl SourceVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceVersion::Rebuild => "rebuild",
            SourceVersion::Diff => "diff",
        }
    }
}

/// Per-(month, user) cache row.
///
/// Invariant: `total == marked_days.count() == marked_dates.len()`, and bit
/// *i* of the mask is set ⟺ `marked_dates` contains the date with
/// day-of-month *i+1*. Bits past the month's day count stay zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyUserStat {
    pub month: Month,
    pub user_id: UserId,
    pub total: u32,
    pub marked_days: DayMask,
    pub marked_dates: Vec<NaiveDate>,
    pub calculated_at: DateTime<Utc>,
    pub source_version: SourceVersion,
}

impl MonthlyUserStat {
    /// An empty baseline row (no days marked).
    pub fn empty(month: Month, user_id: UserId, source_version: SourceVersion) -> Self {
        Self {
            month,
            user_id,
            total: 0,
            marked_days: DayMask::empty(),
            marked_dates: Vec::new(),
            calculated_at: Utc::now(),
            source_version,
        }
    }

    /// Build a row from the full set of a user's event dates in the month.
    ///
    /// Dates outside the month are ignored; the result satisfies the row
    /// invariant by construction. This is the rebuild path's constructor.
    pub fn from_dates(
        month: Month,
        user_id: UserId,
        dates: impl IntoIterator<Item = NaiveDate>,
    ) -> Self {
        let mut marked_dates: Vec<NaiveDate> =
            dates.into_iter().filter(|d| month.contains(*d)).collect();
        marked_dates.sort();
        marked_dates.dedup();

        let marked_days =
            DayMask::from_day_indices(marked_dates.iter().map(|d| d.day0() as usize));

        Self {
            month,
            user_id,
            total: marked_dates.len() as u32,
            marked_days,
            marked_dates,
            calculated_at: Utc::now(),
            source_version: SourceVersion::Rebuild,
        }
    }

    /// Normalize a loaded row: sorted, de-duplicated date list.
    ///
    /// The mask is fixed-width by type; legacy encodings are already folded in
    /// at the storage decode boundary. Tolerates rows written by older code
    /// whose date lists drifted out of order.
    pub fn normalize(&mut self) {
        self.marked_dates.sort();
        self.marked_dates.dedup();
    }

    /// Whether the row satisfies its total/mask/date-list invariant.
    pub fn is_consistent(&self) -> bool {
        self.total == self.marked_days.count() && self.total as usize == self.marked_dates.len()
    }
}

/// Per-day aggregate total across all users.
///
/// A zero total is represented by row absence, not a stored zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub total: u32,
    pub calculated_at: DateTime<Utc>,
    pub source_version: SourceVersion,
}

impl DailyTotal {
    pub fn new(day: NaiveDate, total: u32, source_version: SourceVersion) -> Self {
        Self {
            day,
            total,
            calculated_at: Utc::now(),
            source_version,
        }
    }

    pub fn month(&self) -> Month {
        Month::from_date(self.day)
    }
}

/// Rebuild task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStatus {
    Running,
    Succeeded,
    Failed,
    /// Deadline hit mid-rebuild; the month needs another pass.
    Pending,
}

impl RebuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildStatus::Running => "running",
            RebuildStatus::Succeeded => "succeeded",
            RebuildStatus::Failed => "failed",
            RebuildStatus::Pending => "pending",
        }
    }
}

/// Per-month rebuild progress marker (one row per month).
///
/// Doubles as the soft mutual-exclusion marker: concurrent rebuild triggers
/// for the same month are idempotent retries, not conflicting writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildTask {
    pub month: Month,
    pub status: RebuildStatus,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RebuildTask {
    /// A fresh `running` marker: start time stamped, prior error cleared.
    pub fn started(month: Month) -> Self {
        Self {
            month,
            status: RebuildStatus::Running,
            last_started_at: Some(Utc::now()),
            last_finished_at: None,
            last_error: None,
        }
    }

    pub fn finish_succeeded(&mut self) {
        self.status = RebuildStatus::Succeeded;
        self.last_finished_at = Some(Utc::now());
        self.last_error = None;
    }

    /// Deadline hit mid-flight; another pass is needed.
    pub fn finish_pending(&mut self, reason: impl Into<String>) {
        self.status = RebuildStatus::Pending;
        self.last_finished_at = Some(Utc::now());
        self.last_error = Some(reason.into());
    }

    pub fn finish_failed(&mut self, error: impl Into<String>) {
        self.status = RebuildStatus::Failed;
        self.last_finished_at = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    #[test]
    fn from_dates_builds_consistent_row() {
        let month: Month = "2025-09".parse().unwrap();
        let user = UserId::new();

        let stat = MonthlyUserStat::from_dates(month, user, [d(5), d(1), d(5), d(12)]);
        assert_eq!(stat.total, 3);
        assert_eq!(stat.marked_dates, vec![d(1), d(5), d(12)]);
        assert!(stat.marked_days.is_set(0));
        assert!(stat.marked_days.is_set(4));
        assert!(stat.marked_days.is_set(11));
        assert!(stat.is_consistent());
    }

    #[test]
    fn from_dates_ignores_out_of_month_dates() {
        let month: Month = "2025-09".parse().unwrap();
        let outside = NaiveDate::from_ymd_opt(2025, 8, 31).unwrap();

        let stat = MonthlyUserStat::from_dates(month, UserId::new(), [d(1), outside]);
        assert_eq!(stat.total, 1);
        assert_eq!(stat.marked_dates, vec![d(1)]);
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let month: Month = "2025-09".parse().unwrap();
        let mut stat = MonthlyUserStat::empty(month, UserId::new(), SourceVersion::Rebuild);
        stat.marked_dates = vec![d(5), d(1), d(5)];
        stat.normalize();
        assert_eq!(stat.marked_dates, vec![d(1), d(5)]);
    }

    #[test]
    fn rebuild_task_lifecycle() {
        let month: Month = "2025-09".parse().unwrap();
        let mut task = RebuildTask::started(month);
        assert_eq!(task.status, RebuildStatus::Running);
        assert!(task.last_started_at.is_some());
        assert!(task.last_error.is_none());

        task.finish_pending("timeout");
        assert_eq!(task.status, RebuildStatus::Pending);
        assert_eq!(task.last_error.as_deref(), Some("timeout"));

        task.finish_succeeded();
        assert_eq!(task.status, RebuildStatus::Succeeded);
        assert!(task.last_error.is_none());

        task.finish_failed("query failed");
        assert_eq!(task.status, RebuildStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("query failed"));
    }
}
