//! Mutation state, actions and reducer.

use std::sync::Arc;

use tokio::time::Instant;

use crate::types::{error_changed, reply_changed, revise};
use crate::{Reduce, ResourceError, ResourceView, Revision};

/// Mutation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Failure,
}

/// State of a mutation.
#[derive(Debug)]
pub struct MutationModel<T> {
    pub reply: Option<Arc<T>>,
    pub reply_updated_at: Option<Instant>,
    pub error: Option<ResourceError>,
    pub error_updated_at: Option<Instant>,
    pub status: MutationStatus,
    /// Number of successful mutations since the last reset.
    pub mutated_count: u32,
    pub revision: Revision,
}

impl<T> Clone for MutationModel<T> {
    fn clone(&self) -> Self {
        Self {
            reply: self.reply.clone(),
            reply_updated_at: self.reply_updated_at,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            status: self.status,
            mutated_count: self.mutated_count,
            revision: self.revision,
        }
    }
}

impl<T> Default for MutationModel<T> {
    fn default() -> Self {
        Self {
            reply: None,
            reply_updated_at: None,
            error: None,
            error_updated_at: None,
            status: MutationStatus::Idle,
            mutated_count: 0,
            revision: Revision::INITIAL,
        }
    }
}

impl<T> MutationModel<T> {
    /// Returns the last reply, if any.
    pub fn data(&self) -> Option<&Arc<T>> {
        self.reply.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.status == MutationStatus::Idle
    }

    /// Returns the time of the last completed mutation.
    pub fn submitted_at(&self) -> Option<Instant> {
        match (self.reply_updated_at, self.error_updated_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Actions applied to a [`MutationModel`].
#[derive(Debug)]
pub enum MutationAction<T> {
    Reset,
    Mutating,
    MutateSuccess { data: Arc<T>, updated_at: Instant },
    MutateFailure { error: ResourceError, updated_at: Instant },
}

impl<T> Reduce for MutationModel<T> {
    type Action = MutationAction<T>;

    fn reduce(&self, action: MutationAction<T>) -> Self {
        let next = match action {
            MutationAction::Reset => Self {
                revision: self.revision,
                ..Self::default()
            },
            MutationAction::Mutating => Self {
                status: MutationStatus::Pending,
                ..self.clone()
            },
            MutationAction::MutateSuccess { data, updated_at } => Self {
                reply: Some(data),
                reply_updated_at: Some(updated_at),
                error: None,
                error_updated_at: self.error.as_ref().map(|_| updated_at).or(self.error_updated_at),
                status: MutationStatus::Success,
                mutated_count: self.mutated_count.saturating_add(1),
                revision: self.revision,
            },
            MutationAction::MutateFailure { error, updated_at } => Self {
                error: Some(error),
                error_updated_at: Some(updated_at),
                status: MutationStatus::Failure,
                ..self.clone()
            },
        };
        let revision = revise(
            self.revision,
            reply_changed(
                &self.reply,
                self.reply_updated_at,
                &next.reply,
                next.reply_updated_at,
            ),
            error_changed(
                &self.error,
                self.error_updated_at,
                &next.error,
                next.error_updated_at,
            ),
        );
        Self { revision, ..next }
    }
}

/// Payload-free view of a mutation model.
pub trait MutationView: ResourceView {
    fn mutated_count(&self) -> u32;
    fn submitted_at(&self) -> Option<Instant>;
    fn is_idle(&self) -> bool;
}

impl<T: Send + Sync> ResourceView for MutationModel<T> {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn has_reply(&self) -> bool {
        self.reply.is_some()
    }

    fn reply_updated_at(&self) -> Option<Instant> {
        self.reply_updated_at
    }

    fn error(&self) -> Option<&ResourceError> {
        self.error.as_ref()
    }

    fn error_updated_at(&self) -> Option<Instant> {
        self.error_updated_at
    }

    fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    fn is_failure(&self) -> bool {
        self.status == MutationStatus::Failure
    }
}

impl<T: Send + Sync> MutationView for MutationModel<T> {
    fn mutated_count(&self) -> u32 {
        self.mutated_count
    }

    fn submitted_at(&self) -> Option<Instant> {
        MutationModel::submitted_at(self)
    }

    fn is_idle(&self) -> bool {
        MutationModel::is_idle(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mutate_success_counts() {
        let now = Instant::now();
        let model = MutationModel::<u32>::default()
            .reduce(MutationAction::Mutating)
            .reduce(MutationAction::MutateSuccess {
                data: Arc::new(7),
                updated_at: now,
            });
        assert!(model.is_success());
        assert_eq!(model.mutated_count, 1);
        assert_eq!(model.data().map(|d| **d), Some(7));
        assert_ne!(model.revision, Revision::INITIAL);
    }

    #[test]
    fn test_mutating_keeps_revision() {
        let model = MutationModel::<u32>::default().reduce(MutationAction::Mutating);
        assert!(model.is_pending());
        assert_eq!(model.revision, Revision::INITIAL);
    }

    #[test]
    fn test_failure_then_success_clears_error() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        let model = MutationModel::<u32>::default()
            .reduce(MutationAction::MutateFailure {
                error: ResourceError::msg("conflict"),
                updated_at: now,
            })
            .reduce(MutationAction::MutateSuccess {
                data: Arc::new(1),
                updated_at: later,
            });
        assert!(model.error.is_none());
        assert_eq!(model.error_updated_at, Some(later));
        assert_eq!(model.submitted_at(), Some(later));
    }

    #[test]
    fn test_reset_clears_everything() {
        let now = Instant::now();
        let model = MutationModel::<u32>::default().reduce(MutationAction::MutateSuccess {
            data: Arc::new(1),
            updated_at: now,
        });
        let reset = model.reduce(MutationAction::Reset);
        assert!(reset.is_idle());
        assert_eq!(reset.mutated_count, 0);
        assert!(reset.reply.is_none());
        assert!(reset.submitted_at().is_none());
        assert_ne!(reset.revision, model.revision);
    }

    #[test]
    fn test_reset_of_idle_keeps_revision() {
        let model = MutationModel::<u32>::default();
        assert_eq!(model.reduce(MutationAction::Reset).revision, model.revision);
    }

    #[test]
    fn test_submitted_at_takes_latest() {
        let now = Instant::now();
        let later = now + Duration::from_secs(3);
        let model = MutationModel::<u32>::default()
            .reduce(MutationAction::MutateSuccess {
                data: Arc::new(1),
                updated_at: now,
            })
            .reduce(MutationAction::MutateFailure {
                error: ResourceError::msg("boom"),
                updated_at: later,
            });
        assert_eq!(model.submitted_at(), Some(later));
        assert_eq!(model.mutated_count, 1);
        assert!(model.is_failure());
    }
}
