//! Service facade over the stats subsystem.
//!
//! Owns the queue, worker, rebuild engine, and health cache, and exposes the
//! handful of entry points the surrounding application calls: enqueue a diff
//! at check-in time, run a worker tick, trigger a rebuild, answer a health
//! probe.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use chrono::NaiveDate;
use daystats_core::{Month, UserId};
use daystats_events::EventLog;

use crate::cache::CacheStore;
use crate::health::{HealthCache, HealthSample};
use crate::queue::{DiffAction, DiffJob, DiffQueue, DiffStatus, JobId};
use crate::rebuild::{RebuildEngine, RebuildReport};
use crate::worker::{CycleReport, StatsWorker, WorkerCycleConfig};

/// Per-month rebuild outcome with the error folded in, for callers that
/// trigger multi-month rebuilds and want one summary per month rather than
/// an early-exit error.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildSummary {
    pub month: Month,
    pub report: Option<RebuildReport>,
    pub error: Option<String>,
}

/// Facade wiring the queue, cache, event log, worker, and rebuild engine.
pub struct StatsService<Q, E, C> {
    queue: Q,
    worker: StatsWorker<Q, C>,
    rebuilder: RebuildEngine<E, C>,
    health: HealthCache,
}

impl<Q, E, C> StatsService<Q, E, C>
where
    Q: DiffQueue + Clone,
    E: EventLog,
    C: CacheStore + Clone,
{
    pub fn new(queue: Q, events: E, cache: C, config: WorkerCycleConfig) -> Self {
        Self {
            worker: StatsWorker::new(queue.clone(), cache.clone(), config),
            rebuilder: RebuildEngine::new(events, cache),
            queue,
            health: HealthCache::new(Duration::from_secs(30)),
        }
    }

    /// Enqueue a diff for a check-in or check-in removal.
    ///
    /// Never fails the caller: the check-in itself is already committed, and
    /// a lost diff is repaired by the next rebuild. Enqueue errors are logged
    /// and swallowed; `None` means the diff was dropped.
    pub fn enqueue_diff(
        &self,
        user_id: UserId,
        entry_date: NaiveDate,
        action: DiffAction,
        source: &str,
    ) -> Option<JobId> {
        match self
            .queue
            .enqueue(DiffJob::new(user_id, entry_date, action, source))
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    %user_id,
                    %entry_date,
                    action = action.as_str(),
                    error = %e,
                    "failed to enqueue diff; next rebuild will repair"
                );
                None
            }
        }
    }

    /// Run one worker cycle against the queue.
    pub fn run_worker_cycle(&self) -> Result<CycleReport, crate::queue::QueueError> {
        self.worker.run_cycle()
    }

    /// Rebuild one month, or the default current-plus-previous window.
    ///
    /// Each month gets its own summary; one month's failure does not stop the
    /// others (its task row is already marked `failed` by the engine).
    pub fn rebuild(&self, month: Option<Month>, budget: Duration) -> Vec<RebuildSummary> {
        let deadline = Instant::now() + budget;
        let current = Month::current();
        let months = match month {
            Some(m) => vec![m],
            None => vec![current, current.prev()],
        };

        months
            .into_iter()
            .map(|m| match self.rebuilder.rebuild_month(m, deadline) {
                Ok(report) => RebuildSummary {
                    month: m,
                    report: Some(report),
                    error: None,
                },
                Err(e) => {
                    error!(month = %m, error = %e, "rebuild failed");
                    RebuildSummary {
                        month: m,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    /// Cached subsystem health: the queue is reachable and reports depth.
    pub fn health(&self) -> HealthSample {
        self.health.sample(|| {
            let pending = self
                .queue
                .count_by_status(DiffStatus::Pending)
                .map_err(|e| e.to_string())?;
            let failed = self
                .queue
                .count_by_status(DiffStatus::Failed)
                .map_err(|e| e.to_string())?;
            info!(pending, failed, "health probe sampled queue");
            Ok(format!("pending={pending} failed={failed}"))
        })
    }
}
