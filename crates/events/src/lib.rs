//! `daystats-events` — the check-in Event Log boundary.
//!
//! The event log is the source of truth for check-ins and is owned by the
//! surrounding application; this subsystem only ever **reads** it (for
//! rebuilds and reconciliation). Cache rows are disposable and always
//! reconstructible from this log.

pub mod event;
pub mod log;

pub use event::CheckInEvent;
pub use log::{EventLog, EventLogError, InMemoryEventLog};
