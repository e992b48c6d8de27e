//! Subscription state, actions and reducer.

use std::sync::Arc;

use tokio::time::Instant;

use crate::types::{error_changed, reply_changed, revise};
use crate::{Reduce, ResourceError, ResourceView, Revision};

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

/// Whether the subscription source is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriberStatus {
    #[default]
    NoSubscribers,
    Active,
}

/// State of a subscription.
#[derive(Debug)]
pub struct SubscriptionModel<T> {
    pub reply: Option<Arc<T>>,
    pub reply_updated_at: Option<Instant>,
    pub error: Option<ResourceError>,
    pub error_updated_at: Option<Instant>,
    pub status: SubscriptionStatus,
    pub subscriber_status: SubscriberStatus,
    pub revision: Revision,
}

impl<T> Clone for SubscriptionModel<T> {
    fn clone(&self) -> Self {
        Self {
            reply: self.reply.clone(),
            reply_updated_at: self.reply_updated_at,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            status: self.status,
            subscriber_status: self.subscriber_status,
            revision: self.revision,
        }
    }
}

impl<T> Default for SubscriptionModel<T> {
    fn default() -> Self {
        Self {
            reply: None,
            reply_updated_at: None,
            error: None,
            error_updated_at: None,
            status: SubscriptionStatus::Pending,
            subscriber_status: SubscriberStatus::NoSubscribers,
            revision: Revision::INITIAL,
        }
    }
}

impl<T> SubscriptionModel<T> {
    /// Seed a model with placeholder data.
    pub fn with_initial_data(data: Arc<T>, now: Instant) -> Self {
        Self {
            reply: Some(data),
            reply_updated_at: Some(now),
            status: SubscriptionStatus::Success,
            revision: Revision::next(),
            ..Self::default()
        }
    }

    /// Returns the latest received value, if any.
    pub fn data(&self) -> Option<&Arc<T>> {
        self.reply.as_ref()
    }

    /// Returns true if the subscription source is running.
    pub fn is_active(&self) -> bool {
        self.subscriber_status == SubscriberStatus::Active
    }

    /// Build the action for a received value.
    ///
    /// Equal values keep the current `Arc` and timestamp, so the reducer
    /// leaves the revision untouched.
    pub fn receive_action<F>(&self, data: T, now: Instant, equals: F) -> SubscriptionAction<T>
    where
        F: Fn(&T, &T) -> bool,
    {
        match (&self.reply, self.reply_updated_at) {
            (Some(current), Some(updated_at)) if equals(current, &data) => {
                SubscriptionAction::ReceiveSuccess {
                    data: Arc::clone(current),
                    updated_at,
                }
            }
            _ => SubscriptionAction::ReceiveSuccess {
                data: Arc::new(data),
                updated_at: now,
            },
        }
    }

    /// Build the action for a terminal source failure.
    pub fn failure_action<F>(
        &self,
        error: ResourceError,
        now: Instant,
        error_equals: Option<F>,
    ) -> SubscriptionAction<T>
    where
        F: Fn(&ResourceError, &ResourceError) -> bool,
    {
        match (&self.error, self.error_updated_at, error_equals) {
            (Some(current), Some(updated_at), Some(eq)) if eq(current, &error) => {
                SubscriptionAction::ReceiveFailure {
                    error: current.clone(),
                    updated_at,
                }
            }
            _ => SubscriptionAction::ReceiveFailure {
                error,
                updated_at: now,
            },
        }
    }
}

/// Actions applied to a [`SubscriptionModel`].
#[derive(Debug)]
pub enum SubscriptionAction<T> {
    Reset,
    ReceiveSuccess { data: Arc<T>, updated_at: Instant },
    ReceiveFailure { error: ResourceError, updated_at: Instant },
    SubscriberChanged { status: SubscriberStatus },
}

impl<T> Reduce for SubscriptionModel<T> {
    type Action = SubscriptionAction<T>;

    fn reduce(&self, action: SubscriptionAction<T>) -> Self {
        let next = match action {
            SubscriptionAction::Reset => Self {
                subscriber_status: self.subscriber_status,
                revision: self.revision,
                ..Self::default()
            },
            SubscriptionAction::ReceiveSuccess { data, updated_at } => {
                let error_updated_at = if self.error.is_some() {
                    Some(updated_at)
                } else {
                    self.error_updated_at
                };
                Self {
                    reply: Some(data),
                    reply_updated_at: Some(updated_at),
                    error: None,
                    error_updated_at,
                    status: SubscriptionStatus::Success,
                    ..self.clone()
                }
            }
            SubscriptionAction::ReceiveFailure { error, updated_at } => Self {
                error: Some(error),
                error_updated_at: Some(updated_at),
                status: SubscriptionStatus::Failure,
                ..self.clone()
            },
            SubscriptionAction::SubscriberChanged { status } => Self {
                subscriber_status: status,
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

/// Payload-free view of a subscription model.
pub trait SubscriptionView: ResourceView {
    fn subscriber_status(&self) -> SubscriberStatus;
}

impl<T: Send + Sync> ResourceView for SubscriptionModel<T> {
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
        self.status == SubscriptionStatus::Pending
    }

    fn is_success(&self) -> bool {
        self.status == SubscriptionStatus::Success
    }

    fn is_failure(&self) -> bool {
        self.status == SubscriptionStatus::Failure
    }
}

impl<T: Send + Sync> SubscriptionView for SubscriptionModel<T> {
    fn subscriber_status(&self) -> SubscriberStatus {
        self.subscriber_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn received(now: Instant) -> SubscriptionModel<String> {
        SubscriptionModel::default().reduce(SubscriptionAction::ReceiveSuccess {
            data: Arc::new("tick".to_string()),
            updated_at: now,
        })
    }

    #[test]
    fn test_receive_success() {
        let model = received(Instant::now());
        assert!(model.is_success());
        assert_ne!(model.revision, Revision::INITIAL);
    }

    #[test]
    fn test_equal_value_keeps_instance() {
        let now = Instant::now();
        let model = received(now);
        let action =
            model.receive_action("tick".to_string(), now + Duration::from_secs(1), |a, b| a == b);
        let next = model.reduce(action);
        assert!(Arc::ptr_eq(next.data().unwrap(), model.data().unwrap()));
        assert_eq!(next.reply_updated_at, Some(now));
        assert_eq!(next.revision, model.revision);
    }

    #[test]
    fn test_different_value_replaces() {
        let now = Instant::now();
        let model = received(now);
        let action = model.receive_action("tock".to_string(), now, |a, b| a == b);
        let next = model.reduce(action);
        assert_eq!(next.data().map(|d| d.as_str()), Some("tock"));
        assert_ne!(next.revision, model.revision);
    }

    #[test]
    fn test_equal_error_keeps_instance() {
        let now = Instant::now();
        let first = ResourceError::msg("socket closed");
        let model = received(now).reduce(SubscriptionAction::ReceiveFailure {
            error: first.clone(),
            updated_at: now,
        });
        let eq = |a: &ResourceError, b: &ResourceError| a.to_string() == b.to_string();
        let action = model.failure_action(
            ResourceError::msg("socket closed"),
            now + Duration::from_secs(5),
            Some(eq),
        );
        let next = model.reduce(action);
        assert!(ResourceError::ptr_eq(next.error.as_ref().unwrap(), &first));
        assert_eq!(next.revision, model.revision);
        assert!(next.is_failure());
        assert!(next.data().is_some());
    }

    #[test]
    fn test_subscriber_status_keeps_revision() {
        let model = received(Instant::now());
        let next = model.reduce(SubscriptionAction::SubscriberChanged {
            status: SubscriberStatus::Active,
        });
        assert!(next.is_active());
        assert_eq!(next.revision, model.revision);
    }

    #[test]
    fn test_reset_returns_to_pending() {
        let model = received(Instant::now()).reduce(SubscriptionAction::SubscriberChanged {
            status: SubscriberStatus::Active,
        });
        let reset = model.reduce(SubscriptionAction::Reset);
        assert!(reset.is_pending());
        assert!(reset.data().is_none());
        assert!(reset.is_active());
        assert_ne!(reset.revision, model.revision);
    }
}
