//! # brook-id
//!
//! Resource keys for the brook engine.
//!
//! ## Design Principles
//!
//! - A key is a namespace plus an ordered list of tags
//! - Equality and hashing cover both the namespace and the tags
//! - Keys are immutable and cheap to clone (shared storage)
//! - Keys are typed per resource kind so a query key never addresses a mutation
//!
//! ## Text Format
//!
//! Every typed key has a canonical text form: `{prefix}:{namespace}` followed by
//! one `/{tag}` segment per tag.
//!
//! Examples:
//! - `query:todos`
//! - `query:todo/42`
//! - `infinite:feed/home/true`
//! - `mutation:create-todo`
//!
//! Tags are used for grouping: batch operations select every key that shares at
//! least one tag with a filter.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
