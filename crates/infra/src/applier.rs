//! Diff applier: incremental cache updates from claimed jobs.
//!
//! Applies each claimed `DiffJob` as one idempotent bit set/clear on the
//! per-user monthly row, plus a delta on the per-day total when the bit
//! actually changed. Application is idempotent by construction — replaying a
//! duplicate `add` (at-least-once delivery) is a no-op — and each job's apply
//! plus status update is its own unit of work, so one failure never aborts
//! the rest of the batch.

use std::time::Instant;

use chrono::Datelike;
use thiserror::Error;
use tracing::{debug, warn};

use daystats_core::{DayMask, Month, UserId};

use crate::cache::{CacheError, CacheStore, SourceVersion};
use crate::queue::{DiffAction, DiffJob, DiffQueue};

/// Per-job apply error.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The date cannot index the 31-day mask. Unreachable for jobs built
    /// in-process (typed dates), kept as a guard against foreign rows.
    #[error("malformed entry date: {0}")]
    MalformedDate(String),

    /// No monthly baseline row exists. Diffs correct an existing baseline,
    /// they never bootstrap one; a prior rebuild must create the row.
    #[error("cache_row_missing: no monthly stat for user {user_id} in {month}")]
    CacheRowMissing { month: Month, user_id: UserId },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Outcome of one batch application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ApplyReport {
    /// Jobs applied and marked `done`.
    pub processed: usize,
    /// Jobs that errored and were marked `failed`.
    pub failed: usize,
    /// Jobs re-pended because the deadline was reached first.
    pub remaining: usize,
}

/// Applies claimed diff jobs against the cache store.
pub struct DiffApplier<Q, C> {
    queue: Q,
    cache: C,
}

impl<Q, C> DiffApplier<Q, C>
where
    Q: DiffQueue,
    C: CacheStore,
{
    pub fn new(queue: Q, cache: C) -> Self {
        Self { queue, cache }
    }

    /// Apply a batch of claimed jobs in order, bounded by `deadline`.
    ///
    /// The deadline is checked after each applied job; once reached, the
    /// remaining claimed jobs are released back to `pending` so a slow run
    /// degrades to partial progress rather than stuck or dropped work.
    pub fn apply_batch(&self, jobs: Vec<DiffJob>, deadline: Instant) -> ApplyReport {
        let mut report = ApplyReport::default();
        let total = jobs.len();
        let mut iter = jobs.into_iter();

        while let Some(job) = iter.next() {
            match self.apply_one(&job) {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_done(job.id) {
                        warn!(job_id = %job.id, error = %e, "failed to mark job done");
                    }
                    report.processed += 1;
                    debug!(job_id = %job.id, action = job.action.as_str(), "diff applied");
                }
                Err(e) => {
                    if let Err(mark_err) = self.queue.mark_failed(job.id, &e.to_string()) {
                        warn!(job_id = %job.id, error = %mark_err, "failed to mark job failed");
                    }
                    report.failed += 1;
                    warn!(job_id = %job.id, error = %e, "diff apply failed");
                }
            }

            if Instant::now() >= deadline {
                for rest in iter.by_ref() {
                    if let Err(e) = self.queue.release(rest.id) {
                        warn!(job_id = %rest.id, error = %e, "failed to release job at deadline");
                    }
                    report.remaining += 1;
                }
                debug!(
                    processed = report.processed,
                    remaining = report.remaining,
                    total,
                    "batch truncated at deadline"
                );
                break;
            }
        }

        report
    }

    /// Apply one job: idempotent monthly bit update plus daily-total delta.
    fn apply_one(&self, job: &DiffJob) -> Result<(), ApplyError> {
        let month = Month::from_date(job.entry_date);
        let day_index = job.entry_date.day0() as usize;
        if day_index >= DayMask::DAYS {
            return Err(ApplyError::MalformedDate(format!(
                "day index {day_index} out of range for {}",
                job.entry_date
            )));
        }

        let mut stat = self
            .cache
            .monthly_get(month, job.user_id)?
            .ok_or(ApplyError::CacheRowMissing {
                month,
                user_id: job.user_id,
            })?;
        stat.normalize();

        let currently_set = stat.marked_days.is_set(day_index);
        let delta: i32 = match job.action {
            DiffAction::Add if !currently_set => {
                stat.marked_days.set(day_index);
                stat.marked_dates.push(job.entry_date);
                stat.marked_dates.sort();
                stat.marked_dates.dedup();
                1
            }
            DiffAction::Remove if currently_set => {
                stat.marked_days.clear(day_index);
                stat.marked_dates.retain(|d| *d != job.entry_date);
                -1
            }
            // Bit already in the requested state: replayed or duplicate job.
            _ => 0,
        };

        stat.total = (stat.total as i64 + delta as i64).max(0) as u32;
        stat.calculated_at = chrono::Utc::now();
        stat.source_version = SourceVersion::Diff;
        self.cache.monthly_upsert(stat)?;

        if delta != 0 {
            self.cache
                .daily_adjust(job.entry_date, delta, SourceVersion::Diff)?;
        }

        Ok(())
    }
}
