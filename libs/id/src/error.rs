//! Error types for key parsing.

use thiserror::Error;

/// Errors that can occur when parsing a key from its text form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The key string is empty.
    #[error("key cannot be empty")]
    Empty,

    /// The key has a prefix for a different resource kind.
    #[error("invalid key prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The key is missing the `:` separator between prefix and namespace.
    #[error("key missing ':' separator")]
    MissingSeparator,

    /// The namespace is empty or contains reserved characters.
    #[error("invalid namespace: '{0}'")]
    InvalidNamespace(String),

    /// A tag segment is empty.
    #[error("empty tag segment at position {0}")]
    EmptyTag(usize),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error indicates a prefix mismatch.
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. } | IdError::MissingSeparator)
    }
}
