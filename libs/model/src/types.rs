//! Types shared by every resource model.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::ResourceError;

// =============================================================================
// Revision
// =============================================================================

static REVISION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Optimistic-concurrency token for a resource's state.
///
/// Revisions come from a process-wide monotonic counter, so two distinct
/// updates never share a revision even when they land on the same clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    /// Revision of a state that has never held a reply or an error.
    pub const INITIAL: Self = Self(0);

    /// Allocates a fresh revision.
    #[must_use]
    pub fn next() -> Self {
        Self(REVISION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying counter value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// =============================================================================
// Reducer
// =============================================================================

/// A state that evolves through a pure reducer.
pub trait Reduce: Sized {
    /// The action type accepted by the reducer.
    type Action;

    /// Returns the state that results from applying `action`.
    ///
    /// Never mutates `self`.
    #[must_use]
    fn reduce(&self, action: Self::Action) -> Self;
}

// =============================================================================
// Views
// =============================================================================

/// Payload-free view of the shape every model shares.
pub trait ResourceView: Send + Sync {
    fn revision(&self) -> Revision;
    fn has_reply(&self) -> bool;
    fn reply_updated_at(&self) -> Option<Instant>;
    fn error(&self) -> Option<&ResourceError>;
    fn error_updated_at(&self) -> Option<Instant>;
    fn is_pending(&self) -> bool;
    fn is_success(&self) -> bool;
    fn is_failure(&self) -> bool;
}

// =============================================================================
// Helpers
// =============================================================================

/// Horizon used when a deadline would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Returns `now + after`, clamped to a distant horizon instead of overflowing.
#[must_use]
pub fn saturating_deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Returns true if the reply slot differs between two states.
pub(crate) fn reply_changed<T>(
    prev: &Option<Arc<T>>,
    prev_at: Option<Instant>,
    next: &Option<Arc<T>>,
    next_at: Option<Instant>,
) -> bool {
    let same_value = match (prev, next) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    };
    !same_value || prev_at != next_at
}

/// Returns true if the error slot differs between two states.
pub(crate) fn error_changed(
    prev: &Option<ResourceError>,
    prev_at: Option<Instant>,
    next: &Option<ResourceError>,
    next_at: Option<Instant>,
) -> bool {
    let same_value = match (prev, next) {
        (None, None) => true,
        (Some(a), Some(b)) => ResourceError::ptr_eq(a, b),
        _ => false,
    };
    !same_value || prev_at != next_at
}

/// Picks the revision for a transition.
pub(crate) fn revise(current: Revision, reply_changed: bool, error_changed: bool) -> Revision {
    if reply_changed || error_changed {
        Revision::next()
    } else {
        current
    }
}
