use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use daystats_core::UserId;

/// A single check-in fact: one user marked one calendar date.
///
/// Unique per `(user_id, entry_date)` pair. Created by user action, deleted by
/// admin action; both mutations happen outside this subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckInEvent {
    pub user_id: UserId,
    pub entry_date: NaiveDate,
}

impl CheckInEvent {
    pub fn new(user_id: UserId, entry_date: NaiveDate) -> Self {
        Self {
            user_id,
            entry_date,
        }
    }
}
