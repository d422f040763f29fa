//! `daystats-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the calendar `Month` value type, and the
//! fixed-width day presence mask used by the statistics cache.

pub mod error;
pub mod id;
pub mod mask;
pub mod month;

pub use error::{DomainError, DomainResult};
pub use id::UserId;
pub use mask::DayMask;
pub use month::Month;
