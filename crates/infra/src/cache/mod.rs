//! Derived statistics cache store.
//!
//! Two denormalized read tables plus the per-month rebuild bookkeeping:
//!
//! - `MonthlyUserStat`: per-(month, user) presence mask, date list, and total
//! - `DailyTotal`: per-day check-in count across users (zero == row absence)
//! - `RebuildTask`: per-month rebuild progress marker
//!
//! Cache rows are never the source of truth; a rebuild may delete and
//! recreate them at will because they are always reconstructible from the
//! event log.

pub mod model;
pub mod postgres;
pub mod store;

pub use model::{DailyTotal, MonthlyUserStat, RebuildStatus, RebuildTask, SourceVersion};
pub use postgres::PostgresCacheStore;
pub use store::{CacheError, CacheStore, InMemoryCacheStore};
