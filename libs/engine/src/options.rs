//! Per-kind resource options.
//!
//! Defaults live in [`EngineConfig`](crate::EngineConfig); a key can adjust
//! the resolved options for itself through its `on_configure` hook.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use brook_model::{saturating_deadline, Instant, QueryView, ResourceError, SubscriptionView};
use brook_retry::RetryPolicy;

/// Decides whether two errors count as the same failure.
pub type ErrorEquals = Arc<dyn Fn(&ResourceError, &ResourceError) -> bool + Send + Sync>;

/// Maps a failure to how long automatic refetching should pause.
pub type PauseAfter = Arc<dyn Fn(&ResourceError) -> Option<Duration> + Send + Sync>;

/// Returns true if a failure should not reach the error relay.
pub type SuppressRelay = Arc<dyn Fn(&ResourceError) -> bool + Send + Sync>;

/// Decides whether a deactivated query may be kept in the cache.
pub type QueryCacheable = Arc<dyn Fn(&dyn QueryView) -> bool + Send + Sync>;

/// Decides whether a deactivated subscription may be kept in the cache.
pub type SubscriptionCacheable = Arc<dyn Fn(&dyn SubscriptionView) -> bool + Send + Sync>;

fn errors_equal(equals: &Option<ErrorEquals>, a: &ResourceError, b: &ResourceError) -> bool {
    match equals {
        Some(eq) => eq(a, b),
        None => ResourceError::ptr_eq(a, b),
    }
}

// =============================================================================
// Query Options
// =============================================================================

/// Options for queries and infinite queries.
#[derive(Clone)]
pub struct QueryOptions {
    /// How long a reply stays fresh.
    pub stale_time: Duration,

    /// How long a deactivated query stays in the cache.
    pub gc_time: Duration,

    /// How long an unreferenced query stays active.
    pub keep_alive_time: Duration,

    /// How long a prefetch waits for its fetch to land.
    pub prefetch_window_time: Duration,

    pub retry: RetryPolicy,

    pub error_equals: Option<ErrorEquals>,

    pub pause_duration_after: Option<PauseAfter>,

    /// Resume failed queries when the network comes back.
    pub revalidate_on_reconnect: bool,

    /// Resume stale queries when the window regains focus.
    pub revalidate_on_focus: bool,

    pub suppress_error_relay: Option<SuppressRelay>,

    pub cacheable: Option<QueryCacheable>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
            keep_alive_time: Duration::from_secs(5),
            prefetch_window_time: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            error_equals: None,
            pause_duration_after: None,
            revalidate_on_reconnect: true,
            revalidate_on_focus: true,
            suppress_error_relay: None,
            cacheable: None,
        }
    }
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_keep_alive_time(mut self, keep_alive_time: Duration) -> Self {
        self.keep_alive_time = keep_alive_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_error_equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&ResourceError, &ResourceError) -> bool + Send + Sync + 'static,
    {
        self.error_equals = Some(Arc::new(equals));
        self
    }

    pub fn with_pause_duration_after<F>(mut self, pause: F) -> Self
    where
        F: Fn(&ResourceError) -> Option<Duration> + Send + Sync + 'static,
    {
        self.pause_duration_after = Some(Arc::new(pause));
        self
    }

    pub fn with_suppress_error_relay<F>(mut self, suppress: F) -> Self
    where
        F: Fn(&ResourceError) -> bool + Send + Sync + 'static,
    {
        self.suppress_error_relay = Some(Arc::new(suppress));
        self
    }

    pub fn with_cacheable<F>(mut self, cacheable: F) -> Self
    where
        F: Fn(&dyn QueryView) -> bool + Send + Sync + 'static,
    {
        self.cacheable = Some(Arc::new(cacheable));
        self
    }

    /// Returns the deadline refetching pauses until after `error`, if any.
    pub fn pause_until(&self, error: &ResourceError, now: Instant) -> Option<Instant> {
        let pause = self.pause_duration_after.as_ref()?;
        pause(error)
            .filter(|d| !d.is_zero())
            .map(|d| saturating_deadline(now, d))
    }

    pub fn errors_equal(&self, a: &ResourceError, b: &ResourceError) -> bool {
        errors_equal(&self.error_equals, a, b)
    }

    pub fn suppresses(&self, error: &ResourceError) -> bool {
        self.suppress_error_relay.as_ref().is_some_and(|f| f(error))
    }

    /// Returns true if a query in this state may be frozen into the cache.
    pub fn is_cacheable(&self, view: &dyn QueryView) -> bool {
        !self.gc_time.is_zero()
            && view.is_success()
            && self.cacheable.as_ref().is_none_or(|f| f(view))
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("keep_alive_time", &self.keep_alive_time)
            .field("prefetch_window_time", &self.prefetch_window_time)
            .field("retry", &self.retry)
            .field("revalidate_on_reconnect", &self.revalidate_on_reconnect)
            .field("revalidate_on_focus", &self.revalidate_on_focus)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Mutation Options
// =============================================================================

/// Options for mutations.
#[derive(Clone)]
pub struct MutationOptions {
    /// How long an unreferenced mutation stays active.
    pub keep_alive_time: Duration,

    /// Mutations are not idempotent, so retries are off unless enabled.
    pub retry: RetryPolicy,

    /// Allow only one successful mutation per instance.
    pub is_one_shot: bool,

    /// Reject a mutation whose revision is no longer current.
    pub is_strict_mode: bool,

    pub suppress_error_relay: Option<SuppressRelay>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            keep_alive_time: Duration::from_secs(5),
            retry: RetryPolicy::disabled(),
            is_one_shot: false,
            is_strict_mode: false,
            suppress_error_relay: None,
        }
    }
}

impl MutationOptions {
    pub fn one_shot(mut self) -> Self {
        self.is_one_shot = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.is_strict_mode = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_keep_alive_time(mut self, keep_alive_time: Duration) -> Self {
        self.keep_alive_time = keep_alive_time;
        self
    }

    pub fn suppresses(&self, error: &ResourceError) -> bool {
        self.suppress_error_relay.as_ref().is_some_and(|f| f(error))
    }
}

impl fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("keep_alive_time", &self.keep_alive_time)
            .field("retry", &self.retry)
            .field("is_one_shot", &self.is_one_shot)
            .field("is_strict_mode", &self.is_strict_mode)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Subscription Options
// =============================================================================

/// Options for subscriptions.
#[derive(Clone)]
pub struct SubscriptionOptions {
    pub gc_time: Duration,
    pub keep_alive_time: Duration,

    /// Policy for (re)starting the subscription source.
    pub retry: RetryPolicy,

    pub error_equals: Option<ErrorEquals>,
    pub suppress_error_relay: Option<SuppressRelay>,
    pub cacheable: Option<SubscriptionCacheable>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            gc_time: Duration::from_secs(5 * 60),
            keep_alive_time: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            error_equals: None,
            suppress_error_relay: None,
            cacheable: None,
        }
    }
}

impl SubscriptionOptions {
    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_keep_alive_time(mut self, keep_alive_time: Duration) -> Self {
        self.keep_alive_time = keep_alive_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_error_equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&ResourceError, &ResourceError) -> bool + Send + Sync + 'static,
    {
        self.error_equals = Some(Arc::new(equals));
        self
    }

    pub fn errors_equal(&self, a: &ResourceError, b: &ResourceError) -> bool {
        errors_equal(&self.error_equals, a, b)
    }

    pub fn suppresses(&self, error: &ResourceError) -> bool {
        self.suppress_error_relay.as_ref().is_some_and(|f| f(error))
    }

    pub fn is_cacheable(&self, view: &dyn SubscriptionView) -> bool {
        !self.gc_time.is_zero()
            && view.is_success()
            && self.cacheable.as_ref().is_none_or(|f| f(view))
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("gc_time", &self.gc_time)
            .field("keep_alive_time", &self.keep_alive_time)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
