//! Retry error types.

use thiserror::Error;

/// Marker error a callable may return to report that it was cancelled.
///
/// A failure whose chain contains this type is never retried.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Outcome of a run that did not produce a value.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation failed after {attempts} attempt(s): {error}")]
    Failed {
        #[source]
        error: anyhow::Error,
        attempts: u32,
    },
}

impl RetryError {
    /// Returns true if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    /// Returns the final failure, or `None` if the run was cancelled.
    pub fn into_failure(self) -> Option<anyhow::Error> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed { error, .. } => Some(error),
        }
    }
}

/// Returns true if `err` reports a cancellation.
pub(crate) fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}
