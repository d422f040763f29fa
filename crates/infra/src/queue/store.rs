//! Diff queue storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;

use super::types::{DiffJob, DiffStatus, JobId};

/// Diff queue persistence boundary.
///
/// Claiming must be atomic per batch: a job is never visible as `pending` to
/// one claimer and `processing` to another, and two concurrent `claim_batch`
/// calls never return overlapping job IDs.
pub trait DiffQueue: Send + Sync {
    /// Insert one `pending` job. No dedup: duplicate enqueues for the same
    /// `(user, date)` are retained and both applied (idempotent downstream).
    fn enqueue(&self, job: DiffJob) -> Result<JobId, QueueError>;

    /// Get a job by ID.
    fn get(&self, id: JobId) -> Result<Option<DiffJob>, QueueError>;

    /// Atomically claim up to `limit` pending jobs in creation order,
    /// transitioning them to `processing` with a fresh lease.
    fn claim_batch(&self, limit: usize) -> Result<Vec<DiffJob>, QueueError>;

    /// Re-pend `processing` jobs whose lease predates `now - older_than`
    /// (crashed or timed-out worker). Returns the number reclaimed.
    fn release_stale(&self, older_than: Duration) -> Result<usize, QueueError>;

    /// Re-pend one claimed job (deadline truncation path). Only `processing`
    /// jobs transition; terminal jobs are left untouched.
    fn release(&self, id: JobId) -> Result<(), QueueError>;

    /// Terminal success transition.
    fn mark_done(&self, id: JobId) -> Result<(), QueueError>;

    /// Terminal failure transition with the apply error recorded.
    fn mark_failed(&self, id: JobId, error: &str) -> Result<(), QueueError>;

    /// Operator maintenance action: re-pend a `failed` job.
    fn retry_failed(&self, id: JobId) -> Result<(), QueueError>;

    /// Observability: number of jobs currently in `status`.
    fn count_by_status(&self, status: DiffStatus) -> Result<usize, QueueError>;
}

impl<Q> DiffQueue for Arc<Q>
where
    Q: DiffQueue + ?Sized,
{
    fn enqueue(&self, job: DiffJob) -> Result<JobId, QueueError> {
        (**self).enqueue(job)
    }

    fn get(&self, id: JobId) -> Result<Option<DiffJob>, QueueError> {
        (**self).get(id)
    }

    fn claim_batch(&self, limit: usize) -> Result<Vec<DiffJob>, QueueError> {
        (**self).claim_batch(limit)
    }

    fn release_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        (**self).release_stale(older_than)
    }

    fn release(&self, id: JobId) -> Result<(), QueueError> {
        (**self).release(id)
    }

    fn mark_done(&self, id: JobId) -> Result<(), QueueError> {
        (**self).mark_done(id)
    }

    fn mark_failed(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        (**self).mark_failed(id, error)
    }

    fn retry_failed(&self, id: JobId) -> Result<(), QueueError> {
        (**self).retry_failed(id)
    }

    fn count_by_status(&self, status: DiffStatus) -> Result<usize, QueueError> {
        (**self).count_by_status(status)
    }
}

/// Diff queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("invalid transition for job {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: JobId,
        from: DiffStatus,
        to: DiffStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueError {
    fn poisoned() -> Self {
        Self::Storage("lock poisoned".to_string())
    }
}

/// In-memory diff queue for tests/dev.
///
/// A single write lock covers the whole claim, which gives the same
/// no-double-claim guarantee the Postgres backend gets from
/// `FOR UPDATE SKIP LOCKED`.
#[derive(Debug, Default)]
pub struct InMemoryDiffQueue {
    jobs: RwLock<HashMap<JobId, DiffJob>>,
}

impl InMemoryDiffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Test fixture: back-date a claimed job's lease by `by`.
    #[cfg(test)]
    pub(crate) fn age_lease(&self, id: JobId, by: chrono::Duration) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.get_mut(&id) {
                if let Some(locked_at) = job.locked_at {
                    job.locked_at = Some(locked_at - by);
                }
            }
        }
    }
}

impl DiffQueue for InMemoryDiffQueue {
    fn enqueue(&self, job: DiffJob) -> Result<JobId, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, id: JobId) -> Result<Option<DiffJob>, QueueError> {
        let jobs = self.jobs.read().map_err(|_| QueueError::poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    fn claim_batch(&self, limit: usize) -> Result<Vec<DiffJob>, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        let now = Utc::now();

        let mut candidates: Vec<JobId> = jobs
            .values()
            .filter(|j| j.status == DiffStatus::Pending)
            .map(|j| j.id)
            .collect();

        // Creation order; JobId (UUIDv7) breaks created_at ties deterministically.
        candidates.sort_by_key(|id| jobs.get(id).map(|j| (j.created_at, j.id.0)));
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(job) = jobs.get_mut(&id) {
                job.mark_processing(now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    fn release_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(older_than).unwrap_or_default();

        let mut released = 0;
        for job in jobs.values_mut() {
            if job.lease_expired(now, threshold) {
                job.release();
                released += 1;
            }
        }
        Ok(released)
    }

    fn release(&self, id: JobId) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        // A late release can race a terminal transition; never resurrect a
        // done or failed job.
        if job.status == DiffStatus::Processing {
            job.release();
        }
        Ok(())
    }

    fn mark_done(&self, id: JobId) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.mark_done();
        Ok(())
    }

    fn mark_failed(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.mark_failed(error);
        Ok(())
    }

    fn retry_failed(&self, id: JobId) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::poisoned())?;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != DiffStatus::Failed {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.status,
                to: DiffStatus::Pending,
            });
        }
        job.release();
        Ok(())
    }

    fn count_by_status(&self, status: DiffStatus) -> Result<usize, QueueError> {
        let jobs = self.jobs.read().map_err(|_| QueueError::poisoned())?;
        Ok(jobs.values().filter(|j| j.status == status).count())
    }
}
