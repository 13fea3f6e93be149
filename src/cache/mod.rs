//! Two-level TTL cache for slow, rarely-changing API lookups.
//!
//! This module is independent of Freshservice:
//! - An in-memory map holds entries for the life of the process
//! - A directory holds one `<key>.json` file per entry and survives restarts
//! - Entries are fresh while younger than a single process-wide TTL
//! - Disk failures degrade to memory-only operation; fetch failures are
//!   always returned to the caller

mod error;
mod layer;
mod storage;
mod traits;

pub use error::CacheError;
pub use layer::{CacheLayer, DEFAULT_TTL_SECS};
pub use storage::{CacheStorage, FileStorage, NoopStorage};
pub use traits::Provenance;

#[cfg(test)]
pub(crate) use layer::tests::ManualClock;
