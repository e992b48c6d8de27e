//! Engine error types.

use std::fmt;

use brook_model::ResourceError;
use thiserror::Error;

use crate::actors::ActorError;
use crate::config::ConfigError;

/// Why a command was skipped instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The state is fresh, nothing to fetch.
    Fresh,
    /// Fetching is paused after a classified error.
    Paused,
    /// The state changed since the caller observed it.
    RevisionMismatch,
    /// The load-more parameter is not the next page.
    ParamMismatch,
    /// A one-shot mutation already succeeded.
    AlreadyMutated,
    /// A mutation is still in flight.
    Pending,
    /// There is no data to operate on.
    NoData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Fresh => "fresh",
            SkipReason::Paused => "paused",
            SkipReason::RevisionMismatch => "revision mismatch",
            SkipReason::ParamMismatch => "param mismatch",
            SkipReason::AlreadyMutated => "already mutated",
            SkipReason::Pending => "pending",
            SkipReason::NoData => "no data",
        };
        f.write_str(reason)
    }
}

/// Outcome of a command that did not produce a value.
///
/// Failures are also recorded in the resource's state; this is only what a
/// caller waiting on the command gets back.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// A precondition did not hold, nothing ran.
    #[error("command skipped: {0}")]
    Skipped(SkipReason),

    /// The actor was torn down while the command ran.
    #[error("command cancelled")]
    Cancelled,

    /// The user callable failed terminally.
    #[error("command failed: {0}")]
    Failed(ResourceError),

    /// The command never reached the actor.
    #[error(transparent)]
    Actor(#[from] ActorError),
}

impl CommandError {
    /// Returns true for skips and cancellations.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CommandError::Skipped(_) | CommandError::Cancelled)
    }

    /// Returns the failure, if the command failed.
    pub fn failure(&self) -> Option<&ResourceError> {
        match self {
            CommandError::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors returned by [`Client`](crate::Client) operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An id is already registered by a key with a different data type.
    #[error("key type mismatch for {id}")]
    KeyTypeMismatch { id: String },

    /// The client has been shut down.
    #[error("client is shut down")]
    Shutdown,

    /// The client was built outside a tokio runtime without a handle.
    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
