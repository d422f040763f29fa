//! Read-only query boundary over the check-in event log.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use thiserror::Error;

use daystats_core::UserId;

use super::event::CheckInEvent;

/// Event log query error.
#[derive(Debug, Clone, Error)]
pub enum EventLogError {
    #[error("event log query failed: {0}")]
    Storage(String),
}

/// Read-only access to the append-only check-in log.
///
/// Implementations must return events ordered by `(user_id, entry_date)` so
/// that rebuild grouping is deterministic. The statistics subsystem never
/// writes through this trait.
pub trait EventLog: Send + Sync {
    /// All events with `entry_date` in `start..=end`, ordered by user then date.
    fn events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CheckInEvent>, EventLogError>;

    /// Count of events with `entry_date` in `start..=end`.
    fn count_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<u64, EventLogError>;
}

impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    fn events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CheckInEvent>, EventLogError> {
        (**self).events_in_range(start, end)
    }

    fn count_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<u64, EventLogError> {
        (**self).count_in_range(start, end)
    }
}

/// In-memory event log for tests/dev.
///
/// The `record`/`remove` helpers stand in for the surrounding application's
/// own mutations; they are fixture support, not part of the `EventLog` trait.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: RwLock<BTreeSet<(UserId, NaiveDate)>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a check-in fact (idempotent: the pair is unique).
    pub fn record(&self, user_id: UserId, entry_date: NaiveDate) {
        if let Ok(mut events) = self.events.write() {
            events.insert((user_id, entry_date));
        }
    }

    /// Remove a check-in fact (admin-deletion fixture).
    pub fn remove(&self, user_id: UserId, entry_date: NaiveDate) {
        if let Ok(mut events) = self.events.write() {
            events.remove(&(user_id, entry_date));
        }
    }
}

impl EventLog for InMemoryEventLog {
    fn events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CheckInEvent>, EventLogError> {
        let events = self
            .events
            .read()
            .map_err(|_| EventLogError::Storage("lock poisoned".to_string()))?;

        // BTreeSet iteration is already (user, date) ordered.
        Ok(events
            .iter()
            .filter(|(_, d)| *d >= start && *d <= end)
            .map(|&(user_id, entry_date)| CheckInEvent::new(user_id, entry_date))
            .collect())
    }

    fn count_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<u64, EventLogError> {
        Ok(self.events_in_range(start, end)?.len() as u64)
    }
}
