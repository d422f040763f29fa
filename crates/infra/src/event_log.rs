//! Postgres reader for the check-in event log.
//!
//! The `check_in_events` table is owned by the surrounding application; this
//! subsystem only reads it, and only for rebuilds.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use chrono::NaiveDate;
use daystats_core::UserId;
use daystats_events::{CheckInEvent, EventLog, EventLogError};

/// Read-only Postgres event log over `check_in_events`.
pub struct PostgresEventLog {
    pool: Arc<PgPool>,
}

impl PostgresEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn runtime() -> Result<tokio::runtime::Handle, EventLogError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| EventLogError::Storage(format!("no tokio runtime: {e}")))
    }
}

fn storage_err(e: sqlx::Error) -> EventLogError {
    EventLogError::Storage(e.to_string())
}

impl EventLog for PostgresEventLog {
    fn events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CheckInEvent>, EventLogError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            let rows = sqlx::query(
                r#"
                SELECT user_id, entry_date
                FROM check_in_events
                WHERE entry_date BETWEEN $1 AND $2
                ORDER BY user_id, entry_date
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_all(&*pool)
            .await
            .map_err(storage_err)?;

            rows.iter()
                .map(|row| {
                    Ok(CheckInEvent::new(
                        UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(storage_err)?),
                        row.try_get("entry_date").map_err(storage_err)?,
                    ))
                })
                .collect()
        })
    }

    fn count_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<u64, EventLogError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            let row = sqlx::query(
                "SELECT COUNT(*) AS n FROM check_in_events WHERE entry_date BETWEEN $1 AND $2",
            )
            .bind(start)
            .bind(end)
            .fetch_one(&*pool)
            .await
            .map_err(storage_err)?;
            let n: i64 = row.try_get("n").map_err(storage_err)?;
            Ok(n.max(0) as u64)
        })
    }
}
