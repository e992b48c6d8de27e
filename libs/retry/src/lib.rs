//! # brook-retry
//!
//! Runs fallible async operations under an exponential backoff policy.
//!
//! ## Design Principles
//!
//! - Delays grow as `initial * multiplier^attempt`, capped at `max_interval`
//! - Jitter spreads each delay by `± randomization_factor`, never above the cap
//! - Cancellation is never retried: it ends the run immediately
//! - A predicate decides which failures are worth another attempt

mod error;
mod policy;

pub use error::{Cancelled, RetryError};
pub use policy::{RetryCallback, RetryPolicy, RetryPredicate};
