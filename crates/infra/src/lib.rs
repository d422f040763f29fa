//! Infrastructure layer: diff job queue, cache store, applier, rebuild engine.

pub mod applier;
pub mod cache;
pub mod event_log;
pub mod health;
pub mod queue;
pub mod rebuild;
pub mod service;
pub mod worker;


pub use applier::{ApplyError, ApplyReport, DiffApplier};
pub use event_log::PostgresEventLog;
pub use health::{HealthCache, HealthSample};
pub use rebuild::{RebuildEngine, RebuildError, RebuildReport};
pub use service::{RebuildSummary, StatsService};
pub use worker::{CycleReport, CycleStatus, StatsWorker, WorkerCycleConfig};
