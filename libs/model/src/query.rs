//! Query state, actions and reducer.
//!
//! ## State Machine
//!
//! ```text
//! status:        pending -> success <-> failure
//! fetch_status:  idle -> fetching -> idle | paused(until)
//! ```
//!
//! A failed query keeps the last successful reply next to the new error.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{error_changed, reply_changed, revise, saturating_deadline};
use crate::{Reduce, ResourceError, ResourceView, Revision};

// =============================================================================
// Status Enums
// =============================================================================

/// Query status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

/// Query fetch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    /// Automatic refetching is suppressed until `unpause_at`.
    Paused { unpause_at: Instant },
}

// =============================================================================
// Model
// =============================================================================

/// State of a query.
#[derive(Debug)]
pub struct QueryModel<T> {
    pub reply: Option<Arc<T>>,
    pub reply_updated_at: Option<Instant>,
    pub error: Option<ResourceError>,
    pub error_updated_at: Option<Instant>,
    /// Instant after which the reply is stale. `None` means stale already.
    pub stale_at: Option<Instant>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub is_invalidated: bool,
    pub revision: Revision,
}

impl<T> Clone for QueryModel<T> {
    fn clone(&self) -> Self {
        Self {
            reply: self.reply.clone(),
            reply_updated_at: self.reply_updated_at,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            stale_at: self.stale_at,
            status: self.status,
            fetch_status: self.fetch_status,
            is_invalidated: self.is_invalidated,
            revision: self.revision,
        }
    }
}

impl<T> Default for QueryModel<T> {
    fn default() -> Self {
        Self {
            reply: None,
            reply_updated_at: None,
            error: None,
            error_updated_at: None,
            stale_at: None,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            is_invalidated: false,
            revision: Revision::INITIAL,
        }
    }
}

impl<T> QueryModel<T> {
    /// Seed a model with placeholder data.
    ///
    /// The data counts as a success but is stale immediately, so the first
    /// connect still fetches.
    pub fn with_initial_data(data: Arc<T>, now: Instant) -> Self {
        Self {
            reply: Some(data),
            reply_updated_at: Some(now),
            status: QueryStatus::Success,
            revision: Revision::next(),
            ..Self::default()
        }
    }

    /// Returns the current reply, if any.
    pub fn data(&self) -> Option<&Arc<T>> {
        self.reply.as_ref()
    }

    /// Returns true if the reply is stale at `now`.
    pub fn is_stale_at(&self, now: Instant) -> bool {
        self.stale_at.is_none_or(|at| now >= at)
    }

    /// Returns true if refetching is paused at `now`.
    pub fn is_paused_at(&self, now: Instant) -> bool {
        matches!(self.fetch_status, FetchStatus::Paused { unpause_at } if now < unpause_at)
    }

    /// Decide whether a connect should trigger a fetch.
    ///
    /// `revision` is the revision the caller observed, if it supplied one.
    pub fn should_fetch(&self, revision: Option<Revision>, now: Instant) -> bool {
        if revision.is_some_and(|r| r != self.revision) {
            return false;
        }
        if self.is_paused_at(now) {
            return false;
        }
        self.is_invalidated || self.status == QueryStatus::Pending || self.is_stale_at(now)
    }

    /// Build the success action for freshly fetched data.
    ///
    /// If `equals` says the new data matches the current reply, the current
    /// `Arc` and its timestamp are kept and only the staleness deadline moves.
    pub fn success_action<F>(
        &self,
        data: T,
        now: Instant,
        stale_time: Duration,
        equals: F,
    ) -> QueryAction<T>
    where
        F: Fn(&T, &T) -> bool,
    {
        let stale_at = saturating_deadline(now, stale_time);
        match (&self.reply, self.reply_updated_at) {
            (Some(current), Some(updated_at)) if equals(current, &data) => {
                QueryAction::FetchSuccess {
                    data: Arc::clone(current),
                    updated_at,
                    stale_at,
                }
            }
            _ => QueryAction::FetchSuccess {
                data: Arc::new(data),
                updated_at: now,
                stale_at,
            },
        }
    }

    /// Build the failure action for a terminal fetch error.
    ///
    /// If `error_equals` says the new error matches the current one, the
    /// current error instance and its timestamp are kept.
    pub fn failure_action<F>(
        &self,
        error: ResourceError,
        now: Instant,
        paused_until: Option<Instant>,
        error_equals: Option<F>,
    ) -> QueryAction<T>
    where
        F: Fn(&ResourceError, &ResourceError) -> bool,
    {
        let (error, updated_at) = match (&self.error, self.error_updated_at, error_equals) {
            (Some(current), Some(at), Some(eq)) if eq(current, &error) => (current.clone(), at),
            _ => (error, now),
        };
        QueryAction::FetchFailure {
            error,
            updated_at,
            paused_until,
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Actions applied to a [`QueryModel`].
#[derive(Debug)]
pub enum QueryAction<T> {
    /// A fetch started. `is_invalidated` overrides the flag when set.
    Fetching { is_invalidated: Option<bool> },

    /// A fetch completed.
    FetchSuccess {
        data: Arc<T>,
        updated_at: Instant,
        stale_at: Instant,
    },

    /// A fetch failed terminally.
    FetchFailure {
        error: ResourceError,
        updated_at: Instant,
        paused_until: Option<Instant>,
    },

    /// Mark the reply as invalid so the next connect refetches.
    Invalidate,

    /// Overwrite the reply from outside a fetch. Status is untouched.
    ForceUpdate { data: Arc<T>, updated_at: Instant },
}

impl<T> Reduce for QueryModel<T> {
    type Action = QueryAction<T>;

    fn reduce(&self, action: QueryAction<T>) -> Self {
        let mut next = self.clone();
        match action {
            QueryAction::Fetching { is_invalidated } => {
                next.fetch_status = FetchStatus::Fetching;
                if let Some(flag) = is_invalidated {
                    next.is_invalidated = flag;
                }
            }
            QueryAction::FetchSuccess {
                data,
                updated_at,
                stale_at,
            } => {
                next.reply = Some(data);
                next.reply_updated_at = Some(updated_at);
                next.stale_at = Some(stale_at);
                if next.error.is_some() {
                    next.error = None;
                    next.error_updated_at = Some(updated_at);
                }
                next.status = QueryStatus::Success;
                next.fetch_status = FetchStatus::Idle;
                next.is_invalidated = false;
            }
            QueryAction::FetchFailure {
                error,
                updated_at,
                paused_until,
            } => {
                next.error = Some(error);
                next.error_updated_at = Some(updated_at);
                next.status = QueryStatus::Failure;
                next.fetch_status = match paused_until {
                    Some(unpause_at) => FetchStatus::Paused { unpause_at },
                    None => FetchStatus::Idle,
                };
            }
            QueryAction::Invalidate => {
                next.is_invalidated = true;
            }
            QueryAction::ForceUpdate { data, updated_at } => {
                next.reply = Some(data);
                next.reply_updated_at = Some(updated_at);
            }
        }
        next.revision = revise(
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
        next
    }
}

// =============================================================================
// Views
// =============================================================================

/// Payload-free view of a query model, used by filters.
pub trait QueryView: ResourceView {
    fn stale_at(&self) -> Option<Instant>;
    fn fetch_status(&self) -> FetchStatus;
    fn is_invalidated(&self) -> bool;
    fn is_stale_at(&self, now: Instant) -> bool;
    fn is_paused_at(&self, now: Instant) -> bool;
}

impl<T: Send + Sync> ResourceView for QueryModel<T> {
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
        self.status == QueryStatus::Pending
    }

    fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    fn is_failure(&self) -> bool {
        self.status == QueryStatus::Failure
    }
}

impl<T: Send + Sync> QueryView for QueryModel<T> {
    fn stale_at(&self) -> Option<Instant> {
        self.stale_at
    }

    fn fetch_status(&self) -> FetchStatus {
        self.fetch_status
    }

    fn is_invalidated(&self) -> bool {
        self.is_invalidated
    }

    fn is_stale_at(&self, now: Instant) -> bool {
        QueryModel::is_stale_at(self, now)
    }

    fn is_paused_at(&self, now: Instant) -> bool {
        QueryModel::is_paused_at(self, now)
    }
}

// =============================================================================
// Infinite Query Chunks
// =============================================================================

/// One page of an infinite query and the parameter that produced it.
#[derive(Debug)]
pub struct QueryChunk<T, S> {
    pub data: Arc<T>,
    pub param: S,
}

impl<T, S: Clone> Clone for QueryChunk<T, S> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            param: self.param.clone(),
        }
    }
}

impl<T, S> QueryChunk<T, S> {
    pub fn new(data: T, param: S) -> Self {
        Self {
            data: Arc::new(data),
            param,
        }
    }
}

/// Ordered pages of an infinite query.
pub type QueryChunks<T, S> = Vec<QueryChunk<T, S>>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn success(now: Instant) -> QueryModel<String> {
        QueryModel::default().reduce(QueryAction::FetchSuccess {
            data: Arc::new("a".to_string()),
            updated_at: now,
            stale_at: now + Duration::from_secs(10),
        })
    }

    #[test]
    fn test_default_is_pending() {
        let model = QueryModel::<u32>::default();
        assert!(model.is_pending());
        assert_eq!(model.revision, Revision::INITIAL);
        assert!(model.should_fetch(None, Instant::now()));
    }

    #[test]
    fn test_fetching_keeps_revision() {
        let now = Instant::now();
        let model = success(now);
        let next = model.reduce(QueryAction::Fetching {
            is_invalidated: None,
        });
        assert_eq!(next.fetch_status, FetchStatus::Fetching);
        assert_eq!(next.revision, model.revision);
    }

    #[test]
    fn test_fetch_success_clears_error_and_invalidation() {
        let now = Instant::now();
        let failed = QueryModel::<String>::default()
            .reduce(QueryAction::Invalidate)
            .reduce(QueryAction::FetchFailure {
                error: ResourceError::msg("boom"),
                updated_at: now,
                paused_until: None,
            });
        assert!(failed.is_failure());
        assert!(failed.is_invalidated);

        let later = now + Duration::from_secs(1);
        let recovered = failed.reduce(QueryAction::FetchSuccess {
            data: Arc::new("ok".to_string()),
            updated_at: later,
            stale_at: later,
        });
        assert!(recovered.is_success());
        assert!(recovered.error.is_none());
        assert_eq!(recovered.error_updated_at, Some(later));
        assert!(!recovered.is_invalidated);
        assert_eq!(recovered.fetch_status, FetchStatus::Idle);
        assert_ne!(recovered.revision, failed.revision);
    }

    #[test]
    fn test_failure_keeps_last_reply() {
        let now = Instant::now();
        let model = success(now).reduce(QueryAction::FetchFailure {
            error: ResourceError::msg("offline"),
            updated_at: now,
            paused_until: None,
        });
        assert!(model.is_failure());
        assert_eq!(model.data().map(|d| d.as_str()), Some("a"));
    }

    #[test]
    fn test_failure_with_pause() {
        let now = Instant::now();
        let until = now + Duration::from_secs(30);
        let model = success(now).reduce(QueryAction::FetchFailure {
            error: ResourceError::msg("rate limited"),
            updated_at: now,
            paused_until: Some(until),
        });
        assert_eq!(model.fetch_status, FetchStatus::Paused { unpause_at: until });
        assert!(model.is_paused_at(now));
        assert!(!model.should_fetch(None, now + Duration::from_secs(29)));
        assert!(model.should_fetch(None, until));
    }

    #[test]
    fn test_invalidate_keeps_revision() {
        let model = success(Instant::now());
        let next = model.reduce(QueryAction::Invalidate);
        assert!(next.is_invalidated);
        assert_eq!(next.revision, model.revision);
    }

    #[test]
    fn test_force_update_leaves_status() {
        let now = Instant::now();
        let model = success(now).reduce(QueryAction::Fetching {
            is_invalidated: None,
        });
        let next = model.reduce(QueryAction::ForceUpdate {
            data: Arc::new("edited".to_string()),
            updated_at: now,
        });
        assert_eq!(next.status, QueryStatus::Success);
        assert_eq!(next.fetch_status, FetchStatus::Fetching);
        assert_eq!(next.data().map(|d| d.as_str()), Some("edited"));
        assert_ne!(next.revision, model.revision);
    }

    #[rstest]
    #[case::fresh(Duration::from_secs(5), false)]
    #[case::at_deadline(Duration::from_secs(10), true)]
    #[case::past_deadline(Duration::from_secs(11), true)]
    fn test_staleness(#[case] elapsed: Duration, #[case] stale: bool) {
        let now = Instant::now();
        let model = success(now);
        assert_eq!(model.is_stale_at(now + elapsed), stale);
        assert_eq!(model.should_fetch(None, now + elapsed), stale);
    }

    #[test]
    fn test_should_fetch_rejects_old_revision() {
        let now = Instant::now();
        let model = success(now).reduce(QueryAction::Invalidate);
        assert!(model.should_fetch(Some(model.revision), now));
        assert!(!model.should_fetch(Some(Revision::INITIAL), now));
    }

    #[test]
    fn test_success_action_keeps_equal_reply() {
        let now = Instant::now();
        let model = success(now);
        let later = now + Duration::from_secs(60);

        let action =
            model.success_action("a".to_string(), later, Duration::from_secs(10), |a, b| a == b);
        let next = model.reduce(action);

        assert!(Arc::ptr_eq(next.data().unwrap(), model.data().unwrap()));
        assert_eq!(next.reply_updated_at, Some(now));
        assert_eq!(next.stale_at, Some(later + Duration::from_secs(10)));
        assert_eq!(next.revision, model.revision);
    }

    #[test]
    fn test_success_action_replaces_different_reply() {
        let now = Instant::now();
        let model = success(now);
        let later = now + Duration::from_secs(60);

        let action = model.success_action("b".to_string(), later, Duration::ZERO, |a, b| a == b);
        let next = model.reduce(action);

        assert_eq!(next.data().map(|d| d.as_str()), Some("b"));
        assert_eq!(next.reply_updated_at, Some(later));
        assert_ne!(next.revision, model.revision);
    }

    #[test]
    fn test_failure_action_keeps_equal_error() {
        let now = Instant::now();
        let first = ResourceError::msg("timeout");
        let model = success(now).reduce(QueryAction::FetchFailure {
            error: first.clone(),
            updated_at: now,
            paused_until: None,
        });

        let same_message = |a: &ResourceError, b: &ResourceError| a.to_string() == b.to_string();
        let action = model.failure_action(
            ResourceError::msg("timeout"),
            now + Duration::from_secs(1),
            None,
            Some(same_message),
        );
        let next = model.reduce(action);

        assert!(ResourceError::ptr_eq(next.error.as_ref().unwrap(), &first));
        assert_eq!(next.error_updated_at, Some(now));
        assert_eq!(next.revision, model.revision);
    }

    #[test]
    fn test_initial_data_is_stale() {
        let now = Instant::now();
        let model = QueryModel::with_initial_data(Arc::new(1u32), now);
        assert!(model.is_success());
        assert!(model.is_stale_at(now));
        assert!(model.should_fetch(None, now));
    }
}
