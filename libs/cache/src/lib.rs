//! # brook-cache
//!
//! A bounded key/value store holding the frozen state of inactive resources.
//!
//! ## Design Principles
//!
//! - Entries expire after a per-entry TTL; expiry is observed lazily by `get`
//! - Capacity is never exceeded; the entry expiring first is dropped first
//! - Eviction is FIFO-by-expiry, reads never refresh an entry
//! - All timestamps use the tokio clock so paused-time tests are exact

mod stats;
mod store;

pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::TimeBasedCache;
