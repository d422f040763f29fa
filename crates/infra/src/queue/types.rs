//! Core diff job types and transitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use daystats_core::UserId;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The delta a diff job carries: mark or unmark one check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    Add,
    Remove,
}

impl DiffAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffAction::Add => "add",
            DiffAction::Remove => "remove",
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a worker, lease active
    Processing,
    /// Applied successfully
    Done,
    /// Apply failed; terminal until manually re-pended
    Failed,
}

impl DiffStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiffStatus::Done | DiffStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStatus::Pending => "pending",
            DiffStatus::Processing => "processing",
            DiffStatus::Done => "done",
            DiffStatus::Failed => "failed",
        }
    }
}

/// One queued cache mutation: add or remove a single check-in.
///
/// `action` and `entry_date` mirror exactly the event-log mutation that
/// created the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffJob {
    pub id: JobId,
    pub user_id: UserId,
    pub entry_date: NaiveDate,
    pub action: DiffAction,
    /// Where the mutation came from (e.g. "checkin", "admin", "import").
    pub source: String,
    pub status: DiffStatus,
    pub error: Option<String>,
    /// Lease timestamp; set while `processing`, cleared otherwise.
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiffJob {
    pub fn new(
        user_id: UserId,
        entry_date: NaiveDate,
        action: DiffAction,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            entry_date,
            action,
            source: source.into(),
            status: DiffStatus::Pending,
            error: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claim the job: `pending → processing`, stamping the lease.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = DiffStatus::Processing;
        self.locked_at = Some(now);
        self.updated_at = now;
    }

    /// Terminal success: `processing → done`, lease cleared.
    pub fn mark_done(&mut self) {
        self.status = DiffStatus::Done;
        self.error = None;
        self.locked_at = None;
        self.updated_at = Utc::now();
    }

    /// Terminal failure with the apply error recorded.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DiffStatus::Failed;
        self.error = Some(error.into());
        self.locked_at = None;
        self.updated_at = Utc::now();
    }

    /// Back to `pending`: lease and stale error cleared.
    ///
    /// Used both for expired leases and for deadline re-pends.
    pub fn release(&mut self) {
        self.status = DiffStatus::Pending;
        self.error = None;
        self.locked_at = None;
        self.updated_at = Utc::now();
    }

    /// Whether the lease expired relative to `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>, older_than: chrono::Duration) -> bool {
        self.status == DiffStatus::Processing
            && self
                .locked_at
                .is_some_and(|locked| now - locked > older_than)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> DiffJob {
        DiffJob::new(
            UserId::new(),
            NaiveDate::from_ymd_opt(2025, 9, 5).unwrap(),
            DiffAction::Add,
            "checkin",
        )
    }

    #[test]
    fn job_lifecycle() {
        let mut job = test_job();
        assert_eq!(job.status, DiffStatus::Pending);
        assert!(job.locked_at.is_none());

        let now = Utc::now();
        job.mark_processing(now);
        assert_eq!(job.status, DiffStatus::Processing);
        assert_eq!(job.locked_at, Some(now));

        job.mark_done();
        assert_eq!(job.status, DiffStatus::Done);
        assert!(job.locked_at.is_none());
        assert!(job.status.is_terminal());
    }

    #[test]
    fn failure_records_error() {
        let mut job = test_job();
        job.mark_processing(Utc::now());
        job.mark_failed("cache_row_missing: no baseline");

        assert_eq!(job.status, DiffStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cache_row_missing: no baseline"));
        assert!(job.locked_at.is_none());
    }

    #[test]
    fn release_clears_lease_and_error() {
        let mut job = test_job();
        job.mark_processing(Utc::now());
        job.mark_failed("transient");
        job.release();

        assert_eq!(job.status, DiffStatus::Pending);
        assert!(job.error.is_none());
        assert!(job.locked_at.is_none());
    }

    #[test]
    fn lease_expiry_is_threshold_based() {
        let mut job = test_job();
        let claimed_at = Utc::now() - chrono::Duration::minutes(20);
        job.mark_processing(claimed_at);

        let now = Utc::now();
        assert!(job.lease_expired(now, chrono::Duration::minutes(10)));
        assert!(!job.lease_expired(now, chrono::Duration::minutes(30)));

        // Pending jobs never count as expired.
        job.release();
        assert!(!job.lease_expired(now, chrono::Duration::minutes(0)));
    }
}
