//! Postgres-backed diff queue.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so that multiple worker processes
//! competing for the same pending set never double-claim a job. Status and
//! action columns are stored as text in their snake_case wire form.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use daystats_core::UserId;

use super::store::{DiffQueue, QueueError};
use super::types::{DiffAction, DiffJob, DiffStatus, JobId};

/// Postgres diff queue over the `diff_jobs` table.
pub struct PostgresDiffQueue {
    pool: Arc<PgPool>,
}

impl PostgresDiffQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn runtime() -> Result<tokio::runtime::Handle, QueueError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| QueueError::Storage(format!("no tokio runtime: {e}")))
    }
}

fn storage_err(e: sqlx::Error) -> QueueError {
    QueueError::Storage(e.to_string())
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<DiffJob, QueueError> {
    let status_raw: String = row.try_get("status").map_err(storage_err)?;
    let action_raw: String = row.try_get("action").map_err(storage_err)?;

    let status = match status_raw.as_str() {
        "pending" => DiffStatus::Pending,
        "processing" => DiffStatus::Processing,
        "done" => DiffStatus::Done,
        "failed" => DiffStatus::Failed,
        other => {
            return Err(QueueError::Storage(format!("unknown job status: {other}")));
        }
    };
    let action = match action_raw.as_str() {
        "add" => DiffAction::Add,
        "remove" => DiffAction::Remove,
        other => {
            return Err(QueueError::Storage(format!("unknown job action: {other}")));
        }
    };

    let user_id = UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(storage_err)?);

    Ok(DiffJob {
        id: JobId::from_uuid(row.try_get::<Uuid, _>("id").map_err(storage_err)?),
        user_id,
        entry_date: row.try_get("entry_date").map_err(storage_err)?,
        action,
        source: row.try_get("source").map_err(storage_err)?,
        status,
        error: row.try_get("error").map_err(storage_err)?,
        locked_at: row.try_get("locked_at").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

impl DiffQueue for PostgresDiffQueue {
    fn enqueue(&self, job: DiffJob) -> Result<JobId, QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO diff_jobs (
                    id, user_id, entry_date, action, source,
                    status, error, locked_at, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(job.id.0)
            .bind(*job.user_id.as_uuid())
            .bind(job.entry_date)
            .bind(job.action.as_str())
            .bind(&job.source)
            .bind(job.status.as_str())
            .bind(&job.error)
            .bind(job.locked_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&*pool)
            .await
            .map_err(storage_err)?;
            Ok(job.id)
        })
    }

    fn get(&self, id: JobId) -> Result<Option<DiffJob>, QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            let row = sqlx::query("SELECT * FROM diff_jobs WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&*pool)
                .await
                .map_err(storage_err)?;
            row.as_ref().map(row_to_job).transpose()
        })
    }

    fn claim_batch(&self, limit: usize) -> Result<Vec<DiffJob>, QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            // SKIP LOCKED keeps concurrent claimers from blocking on or
            // double-claiming each other's rows.
            let rows = sqlx::query(
                r#"
                UPDATE diff_jobs
                SET status = 'processing', locked_at = NOW(), updated_at = NOW()
                WHERE id IN (
                    SELECT id FROM diff_jobs
                    WHERE status = 'pending'
                    ORDER BY created_at, id
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING *
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&*pool)
            .await
            .map_err(storage_err)?;

            let mut jobs = rows
                .iter()
                .map(row_to_job)
                .collect::<Result<Vec<_>, _>>()?;
            jobs.sort_by_key(|j| (j.created_at, j.id.0));
            Ok(jobs)
        })
    }

    fn release_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let secs = older_than.as_secs_f64();

        handle.block_on(async move {
            let result = sqlx::query(
                r#"
                UPDATE diff_jobs
                SET status = 'pending', locked_at = NULL, error = NULL, updated_at = NOW()
                WHERE status = 'processing'
                  AND locked_at < NOW() - make_interval(secs => $1)
                "#,
            )
            .bind(secs)
            .execute(&*pool)
            .await
            .map_err(storage_err)?;
            Ok(result.rows_affected() as usize)
        })
    }

    fn release(&self, id: JobId) -> Result<(), QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            // Guarded on the current status so a late release never
            // resurrects a job that a concurrent worker already finished.
            let result = sqlx::query(
                r#"
                UPDATE diff_jobs
                SET status = 'pending', locked_at = NULL, error = NULL, updated_at = NOW()
                WHERE id = $1 AND status = 'processing'
                "#,
            )
            .bind(id.0)
            .execute(&*pool)
            .await
            .map_err(storage_err)?;

            if result.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM diff_jobs WHERE id = $1")
                    .bind(id.0)
                    .fetch_optional(&*pool)
                    .await
                    .map_err(storage_err)?;
                if exists.is_none() {
                    return Err(QueueError::NotFound(id));
                }
            }
            Ok(())
        })
    }

    fn mark_done(&self, id: JobId) -> Result<(), QueueError> {
        self.set_status(id, "done", None, true)
    }

    fn mark_failed(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        self.set_status(id, "failed", Some(error), true)
    }

    fn retry_failed(&self, id: JobId) -> Result<(), QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            let result = sqlx::query(
                r#"
                UPDATE diff_jobs
                SET status = 'pending', locked_at = NULL, error = NULL, updated_at = NOW()
                WHERE id = $1 AND status = 'failed'
                "#,
            )
            .bind(id.0)
            .execute(&*pool)
            .await
            .map_err(storage_err)?;

            if result.rows_affected() == 0 {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: DiffStatus::Failed,
                    to: DiffStatus::Pending,
                });
            }
            Ok(())
        })
    }

    fn count_by_status(&self, status: DiffStatus) -> Result<usize, QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let status = status.as_str();

        handle.block_on(async move {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM diff_jobs WHERE status = $1")
                .bind(status)
                .fetch_one(&*pool)
                .await
                .map_err(storage_err)?;
            let n: i64 = row.try_get("n").map_err(storage_err)?;
            Ok(n as usize)
        })
    }
}

impl PostgresDiffQueue {
    fn set_status(
        &self,
        id: JobId,
        status: &'static str,
        error: Option<&str>,
        clear_lock: bool,
    ) -> Result<(), QueueError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let error = error.map(str::to_owned);

        handle.block_on(async move {
            let result = sqlx::query(
                r#"
                UPDATE diff_jobs
                SET status = $2,
                    error = $3,
                    locked_at = CASE WHEN $4 THEN NULL ELSE locked_at END,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id.0)
            .bind(status)
            .bind(error)
            .bind(clear_lock)
            .execute(&*pool)
            .await
            .map_err(storage_err)?;

            if result.rows_affected() == 0 {
                return Err(QueueError::NotFound(id));
            }
            Ok(())
        })
    }
}
