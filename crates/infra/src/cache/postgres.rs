//! Postgres-backed cache store.
//!
//! Reads tolerate legacy row encodings: `marked_days` goes through
//! `DayMask::decode_lenient`, and `marked_dates` accepts both a JSON array of
//! ISO dates and a JSON-encoded string wrapping one. Writes always emit the
//! canonical forms (31-char bit string, plain JSON date array).

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use chrono::NaiveDate;
use daystats_core::{DayMask, Month, UserId};

use super::model::{DailyTotal, MonthlyUserStat, RebuildStatus, RebuildTask, SourceVersion};
use super::store::{CacheError, CacheStore};

/// Postgres cache store over `monthly_user_stats`, `daily_totals`, and
/// `rebuild_tasks`.
pub struct PostgresCacheStore {
    pool: Arc<PgPool>,
}

impl PostgresCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn runtime() -> Result<tokio::runtime::Handle, CacheError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| CacheError::Storage(format!("no tokio runtime: {e}")))
    }
}

fn storage_err(e: sqlx::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

fn parse_source(raw: &str) -> SourceVersion {
    // Unknown historical values are treated as rebuild-origin (the safer
    // assumption: the next rebuild overwrites them either way).
    match raw {
        "diff" => SourceVersion::Diff,
        _ => SourceVersion::Rebuild,
    }
}

fn parse_month(raw: &str) -> Result<Month, CacheError> {
    Month::from_str(raw).map_err(|e| CacheError::Storage(format!("bad month column: {e}")))
}

/// Decode a stored date list, tolerating a JSON-encoded-string wrapper and
/// skipping unparseable entries.
fn decode_dates(value: &JsonValue) -> Vec<NaiveDate> {
    let items = match value {
        JsonValue::Array(items) => items.clone(),
        JsonValue::String(s) => match serde_json::from_str::<JsonValue>(s) {
            Ok(JsonValue::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut dates: Vec<NaiveDate> = items
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|s| NaiveDate::from_str(s).ok())
        .collect();
    dates.sort();
    dates.dedup();
    dates
}

fn encode_dates(dates: &[NaiveDate]) -> JsonValue {
    JsonValue::Array(
        dates
            .iter()
            .map(|d| JsonValue::String(d.to_string()))
            .collect(),
    )
}

fn row_to_monthly(row: &sqlx::postgres::PgRow) -> Result<MonthlyUserStat, CacheError> {
    let month = parse_month(&row.try_get::<String, _>("month").map_err(storage_err)?)?;
    let mask_raw: String = row.try_get("marked_days").map_err(storage_err)?;
    let dates_raw: JsonValue = row.try_get("marked_dates").map_err(storage_err)?;
    let source_raw: String = row.try_get("source_version").map_err(storage_err)?;
    let total: i32 = row.try_get("total").map_err(storage_err)?;

    Ok(MonthlyUserStat {
        month,
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(storage_err)?),
        total: total.max(0) as u32,
        marked_days: DayMask::decode_lenient(&mask_raw),
        marked_dates: decode_dates(&dates_raw),
        calculated_at: row.try_get("calculated_at").map_err(storage_err)?,
        source_version: parse_source(&source_raw),
    })
}

fn row_to_daily(row: &sqlx::postgres::PgRow) -> Result<DailyTotal, CacheError> {
    let total: i32 = row.try_get("total").map_err(storage_err)?;
    let source_raw: String = row.try_get("source_version").map_err(storage_err)?;

    Ok(DailyTotal {
        day: row.try_get("day").map_err(storage_err)?,
        total: total.max(0) as u32,
        calculated_at: row.try_get("calculated_at").map_err(storage_err)?,
        source_version: parse_source(&source_raw),
    })
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<RebuildTask, CacheError> {
    let month = parse_month(&row.try_get::<String, _>("month").map_err(storage_err)?)?;
    let status_raw: String = row.try_get("status").map_err(storage_err)?;
    let status = match status_raw.as_str() {
        "running" => RebuildStatus::Running,
        "succeeded" => RebuildStatus::Succeeded,
        "failed" => RebuildStatus::Failed,
        "pending" => RebuildStatus::Pending,
        other => {
            return Err(CacheError::Storage(format!(
                "unknown rebuild status: {other}"
            )));
        }
    };

    Ok(RebuildTask {
        month,
        status,
        last_started_at: row.try_get("last_started_at").map_err(storage_err)?,
        last_finished_at: row.try_get("last_finished_at").map_err(storage_err)?,
        last_error: row.try_get("last_error").map_err(storage_err)?,
    })
}

impl CacheStore for PostgresCacheStore {
    fn monthly_get(
        &self,
        month: Month,
        user_id: UserId,
    ) -> Result<Option<MonthlyUserStat>, CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let month = month.to_string();
        let user = *user_id.as_uuid();

        handle.block_on(async move {
            let row = sqlx::query(
                "SELECT * FROM monthly_user_stats WHERE month = $1 AND user_id = $2",
            )
            .bind(&month)
            .bind(user)
            .fetch_optional(&*pool)
            .await
            .map_err(storage_err)?;
            row.as_ref().map(row_to_monthly).transpose()
        })
    }

    fn monthly_upsert(&self, stat: MonthlyUserStat) -> Result<(), CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO monthly_user_stats (
                    month, user_id, total, marked_days, marked_dates,
                    calculated_at, source_version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (month, user_id)
                DO UPDATE SET
                    total = EXCLUDED.total,
                    marked_days = EXCLUDED.marked_days,
                    marked_dates = EXCLUDED.marked_dates,
                    calculated_at = EXCLUDED.calculated_at,
                    source_version = EXCLUDED.source_version
                "#,
            )
            .bind(stat.month.to_string())
            .bind(*stat.user_id.as_uuid())
            .bind(stat.total as i32)
            .bind(stat.marked_days.encode())
            .bind(encode_dates(&stat.marked_dates))
            .bind(stat.calculated_at)
            .bind(stat.source_version.as_str())
            .execute(&*pool)
            .await
            .map_err(storage_err)?;
            Ok(())
        })
    }

    fn monthly_list(&self, month: Month) -> Result<Vec<MonthlyUserStat>, CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let month = month.to_string();

        handle.block_on(async move {
            let rows = sqlx::query(
                "SELECT * FROM monthly_user_stats WHERE month = $1 ORDER BY user_id",
            )
            .bind(&month)
            .fetch_all(&*pool)
            .await
            .map_err(storage_err)?;
            rows.iter().map(row_to_monthly).collect()
        })
    }

    fn monthly_delete(&self, month: Month, user_id: UserId) -> Result<(), CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let month = month.to_string();
        let user = *user_id.as_uuid();

        handle.block_on(async move {
            sqlx::query("DELETE FROM monthly_user_stats WHERE month = $1 AND user_id = $2")
                .bind(&month)
                .bind(user)
                .execute(&*pool)
                .await
                .map_err(storage_err)?;
            Ok(())
        })
    }

    fn daily_get(&self, day: NaiveDate) -> Result<Option<DailyTotal>, CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            let row = sqlx::query("SELECT * FROM daily_totals WHERE day = $1")
                .bind(day)
                .fetch_optional(&*pool)
                .await
                .map_err(storage_err)?;
            row.as_ref().map(row_to_daily).transpose()
        })
    }

    fn daily_upsert(&self, row: DailyTotal) -> Result<(), CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO daily_totals (day, total, calculated_at, source_version)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (day)
                DO UPDATE SET
                    total = EXCLUDED.total,
                    calculated_at = EXCLUDED.calculated_at,
                    source_version = EXCLUDED.source_version
                "#,
            )
            .bind(row.day)
            .bind(row.total as i32)
            .bind(row.calculated_at)
            .bind(row.source_version.as_str())
            .execute(&*pool)
            .await
            .map_err(storage_err)?;
            Ok(())
        })
    }

    fn daily_adjust(
        &self,
        day: NaiveDate,
        delta: i32,
        source: SourceVersion,
    ) -> Result<(), CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let source = source.as_str();

        handle.block_on(async move {
            // One transaction: a missing row is only created for a positive
            // delta, and a total that drops to zero is deleted before commit,
            // so no reader ever observes a stored zero row.
            let mut tx = pool.begin().await.map_err(storage_err)?;

            let updated = sqlx::query(
                r#"
                UPDATE daily_totals
                SET total = total + $2, calculated_at = NOW(), source_version = $3
                WHERE day = $1
                "#,
            )
            .bind(day)
            .bind(delta)
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            if updated.rows_affected() == 0 {
                if delta <= 0 {
                    // Absence already means zero.
                    return tx.commit().await.map_err(storage_err);
                }
                sqlx::query(
                    r#"
                    INSERT INTO daily_totals (day, total, calculated_at, source_version)
                    VALUES ($1, $2, NOW(), $3)
                    ON CONFLICT (day)
                    DO UPDATE SET
                        total = daily_totals.total + EXCLUDED.total,
                        calculated_at = NOW(),
                        source_version = EXCLUDED.source_version
                    "#,
                )
                .bind(day)
                .bind(delta)
                .bind(source)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            } else {
                sqlx::query("DELETE FROM daily_totals WHERE day = $1 AND total <= 0")
                    .bind(day)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
            }

            tx.commit().await.map_err(storage_err)
        })
    }

    fn daily_list(&self, month: Month) -> Result<Vec<DailyTotal>, CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let (start, end) = (month.first_day(), month.last_day());

        handle.block_on(async move {
            let rows =
                sqlx::query("SELECT * FROM daily_totals WHERE day BETWEEN $1 AND $2 ORDER BY day")
                    .bind(start)
                    .bind(end)
                    .fetch_all(&*pool)
                    .await
                    .map_err(storage_err)?;
            rows.iter().map(row_to_daily).collect()
        })
    }

    fn daily_delete(&self, day: NaiveDate) -> Result<(), CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            sqlx::query("DELETE FROM daily_totals WHERE day = $1")
                .bind(day)
                .execute(&*pool)
                .await
                .map_err(storage_err)?;
            Ok(())
        })
    }

    fn task_get(&self, month: Month) -> Result<Option<RebuildTask>, CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let month = month.to_string();

        handle.block_on(async move {
            let row = sqlx::query("SELECT * FROM rebuild_tasks WHERE month = $1")
                .bind(&month)
                .fetch_optional(&*pool)
                .await
                .map_err(storage_err)?;
            row.as_ref().map(row_to_task).transpose()
        })
    }

    fn task_upsert(&self, task: RebuildTask) -> Result<(), CacheError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();

        handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO rebuild_tasks (
                    month, status, last_started_at, last_finished_at, last_error
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (month)
                DO UPDATE SET
                    status = EXCLUDED.status,
                    last_started_at = EXCLUDED.last_started_at,
                    last_finished_at = EXCLUDED.last_finished_at,
                    last_error = EXCLUDED.last_error
                "#,
            )
            .bind(task.month.to_string())
            .bind(task.status.as_str())
            .bind(task.last_started_at)
            .bind(task.last_finished_at)
            .bind(&task.last_error)
            .execute(&*pool)
            .await
            .map_err(storage_err)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_dates_accepts_array_and_wrapped_string() {
        let plain = serde_json::json!(["2025-09-01", "2025-09-05"]);
        let dates = decode_dates(&plain);
        assert_eq!(dates.len(), 2);

        let wrapped = JsonValue::String("[\"2025-09-05\",\"2025-09-01\"]".to_string());
        assert_eq!(decode_dates(&wrapped), dates);
    }

    #[test]
    fn decode_dates_skips_garbage_and_dedups() {
        let raw = serde_json::json!(["2025-09-01", "not-a-date", "2025-09-01", 42]);
        let dates = decode_dates(&raw);
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].to_string(), "2025-09-01");
    }

    #[test]
    fn unknown_source_version_defaults_to_rebuild() {
        assert_eq!(parse_source("diff"), SourceVersion::Diff);
        assert_eq!(parse_source("rebuild"), SourceVersion::Rebuild);
        assert_eq!(parse_source("legacy"), SourceVersion::Rebuild);
    }
}
