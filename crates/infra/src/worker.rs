//! Worker cycle: lease recovery, batch claim, batch apply.
//!
//! One cycle is one scheduler tick. The caller (cron, loop, test) decides
//! cadence; the cycle itself only promises bounded work per invocation.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::applier::DiffApplier;
use crate::cache::CacheStore;
use crate::queue::{DiffQueue, DiffStatus, QueueError};

/// Tuning knobs for one worker cycle.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCycleConfig {
    /// Maximum jobs claimed per cycle.
    pub batch_limit: usize,
    /// Lease age after which a `processing` job is presumed abandoned.
    pub lease: Duration,
    /// Wall-clock budget for applying the claimed batch.
    pub budget: Duration,
}

impl Default for WorkerCycleConfig {
    fn default() -> Self {
        Self {
            batch_limit: 200,
            lease: Duration::from_secs(10 * 60),
            budget: Duration::from_secs(30),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Nothing to claim.
    Idle,
    /// Every claimed job reached a terminal status.
    Completed,
    /// The budget expired; part of the batch went back to `pending`.
    Truncated,
}

/// Summary of one worker cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub status: CycleStatus,
    /// Stale leases reclaimed before claiming.
    pub released: usize,
    /// Jobs applied and marked `done`.
    pub processed: usize,
    /// Jobs that errored and were marked `failed` this cycle.
    pub failed: usize,
    /// Claimed jobs re-pended at the budget deadline.
    pub remaining: usize,
    /// Queue depth (`pending`) after the cycle.
    pub pending: usize,
    /// Total `failed` jobs in the queue after the cycle.
    pub failed_total: usize,
}

/// Drains the diff queue one bounded batch at a time.
pub struct StatsWorker<Q, C> {
    queue: Q,
    applier: DiffApplier<Q, C>,
    config: WorkerCycleConfig,
}

impl<Q, C> StatsWorker<Q, C>
where
    Q: DiffQueue + Clone,
    C: CacheStore,
{
    pub fn new(queue: Q, cache: C, config: WorkerCycleConfig) -> Self {
        Self {
            applier: DiffApplier::new(queue.clone(), cache),
            queue,
            config,
        }
    }

    /// Run one cycle: reclaim stale leases, claim a batch, apply it.
    pub fn run_cycle(&self) -> Result<CycleReport, QueueError> {
        let released = self.queue.release_stale(self.config.lease)?;
        if released > 0 {
            warn!(released, "reclaimed stale job leases");
        }

        let jobs = self.queue.claim_batch(self.config.batch_limit)?;
        let claimed = jobs.len();

        let report = if claimed == 0 {
            Default::default()
        } else {
            let deadline = Instant::now() + self.config.budget;
            self.applier.apply_batch(jobs, deadline)
        };

        let status = if claimed == 0 {
            CycleStatus::Idle
        } else if report.remaining > 0 {
            CycleStatus::Truncated
        } else {
            CycleStatus::Completed
        };

        let cycle = CycleReport {
            status,
            released,
            processed: report.processed,
            failed: report.failed,
            remaining: report.remaining,
            pending: self.queue.count_by_status(DiffStatus::Pending)?,
            failed_total: self.queue.count_by_status(DiffStatus::Failed)?,
        };

        info!(
            status = ?cycle.status,
            claimed,
            processed = cycle.processed,
            failed = cycle.failed,
            remaining = cycle.remaining,
            pending = cycle.pending,
            "worker cycle finished"
        );
        Ok(cycle)
    }
}
