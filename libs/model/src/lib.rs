//! # brook-model
//!
//! State models and reducers for queries, mutations and subscriptions.
//!
//! ## Design Principles
//!
//! - A model is an immutable snapshot; every transition builds a new value
//! - Reducers are total: every (state, action) pair yields a state
//! - `revision` changes if and only if the reply or the error changed
//! - Payloads live behind `Arc` so "unchanged" can be checked by pointer
//!
//! ## Shared Shape
//!
//! Every model carries:
//! - `reply` and `reply_updated_at`
//! - `error` and `error_updated_at`
//! - a kind-specific `status`
//! - a [`Revision`] token for optimistic concurrency
//!
//! The object-safe [`ResourceView`] family exposes that shape without the payload
//! type, which is what filters and the error relay operate on.

mod error;
mod mutation;
mod query;
mod subscription;
mod types;

pub use error::ResourceError;
pub use mutation::*;
pub use query::*;
pub use subscription::*;
pub use types::*;

/// Re-export of the monotonic clock used for every model timestamp.
pub use tokio::time::Instant;
