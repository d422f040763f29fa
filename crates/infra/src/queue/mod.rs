//! Durable diff job queue.
//!
//! ## Design
//!
//! - One job per check-in mutation (add or remove), no dedup — duplicate
//!   delivery is safe because application is idempotent
//! - Lease-based claiming: `processing` + `locked_at` marks a job as owned by
//!   some worker; stale leases are reclaimed before every claim cycle
//! - `failed` is terminal until an operator re-pends it (no automatic retry)
//! - Claim order follows creation order within a batch
//!
//! ## Components
//!
//! - `DiffJob`: one queued delta awaiting cache application
//! - `DiffQueue`: persistence boundary (in-memory or Postgres)

pub mod postgres;
pub mod store;
pub mod types;

pub use postgres::PostgresDiffQueue;
pub use store::{DiffQueue, InMemoryDiffQueue, QueueError};
pub use types::{DiffAction, DiffJob, DiffStatus, JobId};
