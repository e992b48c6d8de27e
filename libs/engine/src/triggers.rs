//! Revalidation triggers: network, window focus and memory pressure.
//!
//! Platform signals reach the engine as streams supplied by the embedder.
//! While at least one [`MountGuard`](crate::MountGuard) is alive the client
//! observes them:
//!
//! - `Online` arms a debounce timer; `Offline` disarms it. When it fires,
//!   failed resources that opted in are resumed.
//! - `Focused` does the same for stale queries; `Blurred` disarms.
//! - Memory pressure evicts expired cache entries (`Low`) or clears the
//!   caches entirely (`High`, `Critical`).

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use brook_model::Instant;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::filter::{QueryFilter, SubscriptionFilter};
use crate::registry::Shared;

/// Network reachability changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

/// Application window focus changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Focused,
    Blurred,
}

/// Memory pressure levels reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Low,
    High,
    Critical,
}

/// Opens a fresh event stream each time the client is mounted.
pub type EventSource<E> = Arc<dyn Fn() -> BoxStream<'static, E> + Send + Sync>;

/// Which resources each trigger revalidates.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Debounce between coming online and revalidating.
    pub network_resume_delay: Duration,

    /// Debounce between regaining focus and revalidating.
    pub focus_resume_delay: Duration,

    pub reconnect_queries: QueryFilter,
    pub reconnect_subscriptions: SubscriptionFilter,
    pub focus_queries: QueryFilter,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            network_resume_delay: Duration::from_millis(500),
            focus_resume_delay: Duration::from_millis(500),
            reconnect_queries: QueryFilter::active().with_predicate(|_, view| view.is_failure()),
            reconnect_subscriptions: SubscriptionFilter::active()
                .with_predicate(|_, view| view.is_failure()),
            focus_queries: QueryFilter::active()
                .with_predicate(|_, view| view.is_stale_at(Instant::now())),
        }
    }
}

/// Event sources handed to the client builder.
#[derive(Clone, Default)]
pub struct EventSources {
    pub network: Option<EventSource<NetworkEvent>>,
    pub window: Option<EventSource<WindowEvent>>,
    pub memory: Option<EventSource<MemoryPressure>>,
}

impl fmt::Debug for EventSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSources")
            .field("network", &self.network.is_some())
            .field("window", &self.window.is_some())
            .field("memory", &self.memory.is_some())
            .finish()
    }
}

// =============================================================================
// Triggers
// =============================================================================

#[derive(Default)]
struct MountState {
    mounts: usize,
    cancel: Option<CancellationToken>,
}

/// Owns the observer tasks of one client.
pub(crate) struct Triggers {
    sources: EventSources,
    state: Mutex<MountState>,
}

impl Triggers {
    pub fn new(sources: EventSources) -> Self {
        Self {
            sources,
            state: Mutex::new(MountState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MountState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one mount; the first starts the observers.
    pub fn mount(&self, shared: &Arc<Shared>) {
        let mut state = self.lock();
        state.mounts += 1;
        if state.mounts > 1 {
            return;
        }

        let cancel = shared.cancel.child_token();
        let config = &shared.config.triggers;
        let weak = Arc::downgrade(shared);

        if let Some(source) = &self.sources.network {
            let weak = weak.clone();
            shared.runtime.spawn(observe_debounced(
                source(),
                config.network_resume_delay,
                cancel.clone(),
                |event| *event == NetworkEvent::Online,
                move || fire(&weak, "reconnect", Shared::revalidate_on_reconnect),
            ));
        }
        if let Some(source) = &self.sources.window {
            let weak = weak.clone();
            shared.runtime.spawn(observe_debounced(
                source(),
                config.focus_resume_delay,
                cancel.clone(),
                |event| *event == WindowEvent::Focused,
                move || fire(&weak, "focus", Shared::revalidate_on_focus),
            ));
        }
        if let Some(source) = &self.sources.memory {
            shared
                .runtime
                .spawn(observe_memory(source(), weak, cancel.clone()));
        }

        info!("Revalidation triggers mounted");
        state.cancel = Some(cancel);
    }

    /// Drop one mount; the last stops the observers.
    pub fn unmount(&self) {
        let mut state = self.lock();
        state.mounts = state.mounts.saturating_sub(1);
        if state.mounts == 0 {
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
                info!("Revalidation triggers unmounted");
            }
        }
    }

    /// Stop the observers regardless of outstanding mounts.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.mounts = 0;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
    }

    pub fn mounts(&self) -> usize {
        self.lock().mounts
    }
}

/// Keeps the triggers of a client mounted until dropped.
#[must_use = "triggers unmount when the guard is dropped"]
pub struct MountGuard {
    shared: Weak<Shared>,
}

impl MountGuard {
    pub(crate) fn new(shared: &Arc<Shared>) -> Self {
        shared.triggers.mount(shared);
        Self {
            shared: Arc::downgrade(shared),
        }
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.triggers.unmount();
        }
    }
}

impl fmt::Debug for MountGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountGuard").finish_non_exhaustive()
    }
}

// =============================================================================
// Observers
// =============================================================================

/// Run `revalidate` on the client if it is still alive.
fn fire(shared: &Weak<Shared>, trigger: &'static str, revalidate: fn(&Shared) -> usize) -> bool {
    match shared.upgrade() {
        Some(shared) => {
            let count = revalidate(&shared);
            debug!(trigger, count, "Trigger fired");
            true
        }
        None => false,
    }
}

async fn armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Arm a timer on events for which `arms` holds and disarm it on the others.
///
/// `on_fire` returns false once there is nothing left to revalidate.
async fn observe_debounced<E, A, F>(
    mut events: BoxStream<'static, E>,
    delay: Duration,
    cancel: CancellationToken,
    arms: A,
    mut on_fire: F,
) where
    A: Fn(&E) -> bool,
    F: FnMut() -> bool,
{
    let mut timer: Option<Pin<Box<Sleep>>> = None;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = armed(&mut timer) => {
                timer = None;
                if !on_fire() {
                    break;
                }
            }
            event = events.next() => match event {
                Some(event) if arms(&event) => timer = Some(Box::pin(sleep(delay))),
                Some(_) => timer = None,
                None => break,
            },
        }
    }
}

async fn observe_memory(
    mut events: BoxStream<'static, MemoryPressure>,
    shared: Weak<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let level = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(level) => level,
                None => break,
            },
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match level {
            MemoryPressure::Low => {
                let evicted = shared.evict();
                info!(?level, evicted, "Evicted expired cache entries");
            }
            MemoryPressure::High | MemoryPressure::Critical => {
                shared.clear_caches();
                info!(?level, "Cleared caches");
            }
        }
    }
}
