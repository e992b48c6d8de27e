//! Error relay: a side channel that fans command failures out to observers.
//!
//! Failures are always recorded in the resource's own state; the relay is an
//! additional broadcast for cross-cutting surfaces such as toasts or logs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use brook_model::{Instant, ResourceError, ResourceView};
use tokio::sync::broadcast;
use tracing::debug;

use crate::resource::ResourceKey;

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    /// Broadcast buffer size; slow receivers lag past it.
    pub capacity: usize,

    /// Identical records for the same key within this window are dropped.
    pub dedup_window: Duration,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            capacity: 64,
            dedup_window: Duration::from_secs(1),
        }
    }
}

/// One reported failure.
#[derive(Clone)]
pub struct ErrorRecord {
    pub error: ResourceError,
    pub key: ResourceKey,

    /// The resource's model right after the failure was recorded.
    pub model: Arc<dyn ResourceView>,

    pub reported_at: Instant,
}

impl fmt::Debug for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecord")
            .field("error", &self.error)
            .field("key", &self.key)
            .field("revision", &self.model.revision())
            .field("reported_at", &self.reported_at)
            .finish()
    }
}

/// Broadcast channel for [`ErrorRecord`]s.
#[derive(Clone)]
pub struct ErrorRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    tx: broadcast::Sender<ErrorRecord>,
    policy: RelayPolicy,
    recent: Mutex<HashMap<ResourceKey, (String, Instant)>>,
}

impl ErrorRelay {
    pub fn new(policy: RelayPolicy) -> Self {
        let (tx, _) = broadcast::channel(policy.capacity.max(1));
        Self {
            inner: Arc::new(RelayInner {
                tx,
                policy,
                recent: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to records reported from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorRecord> {
        self.inner.tx.subscribe()
    }

    /// Broadcast `record` unless an identical one went out within the window.
    ///
    /// Returns true if the record was broadcast.
    pub fn report(&self, record: ErrorRecord) -> bool {
        let message = record.error.to_string();
        let now = record.reported_at;
        let window = self.inner.policy.dedup_window;
        {
            let mut recent = self
                .inner
                .recent
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            recent.retain(|_, (_, at)| now.saturating_duration_since(*at) < window);
            if let Some((last, _)) = recent.get(&record.key) {
                if *last == message {
                    debug!(key = %record.key, "Dropping duplicate error record");
                    return false;
                }
            }
            if !window.is_zero() {
                recent.insert(record.key.clone(), (message, now));
            }
        }
        // No receivers is fine: the relay is optional for observers.
        let _ = self.inner.tx.send(record);
        true
    }

    pub fn receiver_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl fmt::Debug for ErrorRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRelay")
            .field("policy", &self.inner.policy)
            .field("receivers", &self.inner.tx.receiver_count())
            .finish()
    }
}
