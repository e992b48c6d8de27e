//! Registry: the directory of active actors and the cache of frozen ones.
//!
//! ## Lifecycle
//!
//! ```text
//! acquire ─► active (refs > 0) ─► lingering (refs == 0, keep-alive)
//!              ▲                        │ idle + keep-alive elapsed
//!              │ cache hit              ▼
//!              └──────────── cached ◄── collector (freeze or drop)
//! ```
//!
//! Every map is mutated under one lock. Deactivation signals go through a
//! collector task that batches them for the flush window and applies each
//! batch in a single critical section.

mod control;
mod coordinator;
mod store;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use brook_cache::CacheStatsSnapshot;
use brook_model::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) use control::{InfiniteQueryControl, MutationControl, QueryControl, SubscriptionControl};
pub(crate) use store::{InfiniteQueries, Kind, Live, Mutations, Queries, Store, Subscriptions};

use crate::actors::{ActorRef, SpawnOptions, Spawned};
use crate::config::EngineConfig;
use crate::deps::Dependencies;
use crate::error::EngineError;
use crate::relay::ErrorRelay;
use crate::resource::ResourceKey;
use crate::triggers::Triggers;
use store::Control;

// =============================================================================
// State
// =============================================================================

pub(crate) struct RegistryState {
    queries: Store<brook_id::QueryId, dyn brook_model::QueryView>,
    infinite: Store<brook_id::InfiniteQueryId, dyn brook_model::QueryView>,
    mutations: Store<brook_id::MutationId, dyn brook_model::MutationView>,
    subscriptions: Store<brook_id::SubscriptionId, dyn brook_model::SubscriptionView>,
    closed: bool,
}

impl RegistryState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            queries: Store::new(config.query_cache_capacity),
            infinite: Store::new(config.query_cache_capacity),
            mutations: Store::new(0),
            subscriptions: Store::new(config.subscription_cache_capacity),
            closed: false,
        }
    }

    fn evict(&mut self, now: Instant) -> usize {
        self.queries.cache.evict(now)
            + self.infinite.cache.evict(now)
            + self.subscriptions.cache.evict(now)
    }

    fn clear_caches(&mut self) {
        self.queries.cache.clear();
        self.infinite.cache.clear();
        self.subscriptions.cache.clear();
    }
}

/// Signal that a resource has been idle with no refs for its keep-alive.
#[derive(Debug)]
struct Deactivation {
    key: ResourceKey,
    serial: u64,
    seq: u64,
}

/// A newly created actor and its coordinator controls.
pub(crate) struct Created<V: ?Sized, M, C> {
    pub spawned: Spawned<M, C>,
    pub control: Box<dyn Control<V>>,
}

/// Counters describing the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    pub active_queries: usize,
    pub active_infinite_queries: usize,
    pub active_mutations: usize,
    pub active_subscriptions: usize,
    pub cached_queries: usize,
    pub cached_infinite_queries: usize,
    pub cached_subscriptions: usize,
    pub query_cache: CacheStatsSnapshot,
    pub infinite_query_cache: CacheStatsSnapshot,
    pub subscription_cache: CacheStatsSnapshot,
}

// =============================================================================
// Shared
// =============================================================================

/// State shared by a client, its refs, its collector and its triggers.
pub(crate) struct Shared {
    state: Mutex<RegistryState>,
    pub config: EngineConfig,
    pub deps: Dependencies,
    pub runtime: Handle,

    /// Parent of every actor and background task token.
    pub cancel: CancellationToken,

    pub relay: Option<ErrorRelay>,
    pub triggers: Triggers,
    gc_tx: mpsc::UnboundedSender<Deactivation>,
}

impl Shared {
    pub fn new(
        config: EngineConfig,
        deps: Dependencies,
        triggers: Triggers,
        runtime: Handle,
    ) -> Arc<Self> {
        let (gc_tx, gc_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let relay = config.relay.clone().map(ErrorRelay::new);
        let window = config.gc_flush_window;

        let shared = Arc::new(Self {
            state: Mutex::new(RegistryState::new(&config)),
            config,
            deps,
            runtime,
            cancel,
            relay,
            triggers,
            gc_tx,
        });

        shared.runtime.spawn(run_collector(
            Arc::downgrade(&shared),
            gc_rx,
            window,
            shared.cancel.clone(),
        ));
        shared
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            mailbox_size: self.config.mailbox_size,
            parent: self.cancel.clone(),
            relay: self.relay.clone(),
            runtime: self.runtime.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Attach / detach
    // -------------------------------------------------------------------------

    /// Attach to the resource `id`, creating its actor if needed.
    ///
    /// A new actor starts from the frozen model in the cache if there is a
    /// live one; otherwise `create` picks initial data or the default.
    ///
    /// `create` runs key hooks, so it is called without the lock held. If
    /// another caller activated `id` meanwhile, the new actor is stopped and
    /// the lease attaches to the winner.
    pub fn acquire<K, M, C, F>(
        self: &Arc<Self>,
        id: K::Id,
        create: F,
    ) -> Result<Lease<K, M, C>, EngineError>
    where
        K: Kind,
        M: Clone + Send + Sync + 'static,
        C: Send + 'static,
        F: FnOnce(&Arc<Self>, Option<M>) -> Created<K::View, M, C>,
    {
        let frozen = {
            let mut state = self.lock();
            if state.closed {
                return Err(EngineError::Shutdown);
            }
            let store = K::store(&mut state);
            if let Some(slot) = store.active.get_mut(&id) {
                return self.attach::<K, M, C>(id, slot);
            }
            match store.cache.get_at(&id, Instant::now()) {
                Some(frozen) => Some(
                    frozen
                        .as_any()
                        .downcast_ref::<M>()
                        .cloned()
                        .ok_or_else(|| mismatch(&id))?,
                ),
                None => None,
            }
        };
        let rehydrated = frozen.is_some();

        let Created { spawned, control } = create(self, frozen);
        let Spawned {
            handle,
            state: model,
            actor_ref,
        } = spawned;

        let mut state = self.lock();
        if state.closed {
            actor_ref.stop();
            return Err(EngineError::Shutdown);
        }
        let store = K::store(&mut state);
        if let Some(slot) = store.active.get_mut(&id) {
            debug!(key = %id, actor_id = %actor_ref.actor_id, "Lost activation race");
            actor_ref.stop();
            return self.attach::<K, M, C>(id, slot);
        }

        let serial = actor_ref.serial;
        info!(key = %id, actor_id = %actor_ref.actor_id, rehydrated, "Activated resource");
        store.cache.delete(&id);
        let live = Arc::new(Live {
            handle,
            state: model,
        });
        store.active.insert(
            id.clone(),
            store::Slot {
                actor_ref,
                refs: 1,
                seq: 1,
                linger: None,
                live: Arc::clone(&live) as Arc<dyn std::any::Any + Send + Sync>,
                control,
            },
        );
        Ok(Lease::new(self, id, serial, live))
    }

    /// Take one more reference to an active slot.
    fn attach<K, M, C>(
        self: &Arc<Self>,
        id: K::Id,
        slot: &mut store::Slot<K::View>,
    ) -> Result<Lease<K, M, C>, EngineError>
    where
        K: Kind,
        M: Clone + Send + Sync + 'static,
        C: Send + 'static,
    {
        let live = Arc::clone(&slot.live)
            .downcast::<Live<M, C>>()
            .map_err(|_| mismatch(&id))?;
        slot.refs += 1;
        slot.seq += 1;
        if let Some(linger) = slot.linger.take() {
            linger.abort();
        }
        debug!(key = %id, refs = slot.refs, "Attached to active resource");
        Ok(Lease::new(self, id, slot.serial(), live))
    }

    /// Drop one reference to `id`; the last one arms the keep-alive.
    fn release<K: Kind>(&self, id: &K::Id, serial: u64) {
        let mut state = self.lock();
        let store = K::store(&mut state);
        let Some(slot) = store.active.get_mut(id) else {
            return;
        };
        if slot.serial() != serial {
            return;
        }
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return;
        }
        let key: ResourceKey = id.clone().into();
        debug!(key = %key, "Last reference released");
        let linger = self.arm_linger(
            key,
            serial,
            slot.seq,
            slot.control.keep_alive(),
            slot.actor_ref.wait_idle(),
        );
        slot.linger = Some(linger);
    }

    /// Signal the collector once `keep_alive` elapsed and the actor is idle.
    fn arm_linger(
        &self,
        key: ResourceKey,
        serial: u64,
        seq: u64,
        keep_alive: Duration,
        idle: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> AbortHandle {
        let gc = self.gc_tx.clone();
        self.runtime
            .spawn(async move {
                tokio::time::sleep(keep_alive).await;
                idle.await;
                // The collector is gone once the client shut down.
                let _ = gc.send(Deactivation { key, serial, seq });
            })
            .abort_handle()
    }

    // -------------------------------------------------------------------------
    // Collection
    // -------------------------------------------------------------------------

    fn collect(&self, batch: Vec<Deactivation>) {
        let now = Instant::now();
        let mut state = self.lock();
        let mut deactivated = 0usize;
        for signal in &batch {
            let done = match &signal.key {
                ResourceKey::Query(id) => self.deactivate::<Queries>(&mut state, id, signal, now),
                ResourceKey::InfiniteQuery(id) => {
                    self.deactivate::<InfiniteQueries>(&mut state, id, signal, now)
                }
                ResourceKey::Mutation(id) => {
                    self.deactivate::<Mutations>(&mut state, id, signal, now)
                }
                ResourceKey::Subscription(id) => {
                    self.deactivate::<Subscriptions>(&mut state, id, signal, now)
                }
            };
            deactivated += usize::from(done);
        }
        let evicted = state.evict(now);
        debug!(signals = batch.len(), deactivated, evicted, "Applied deactivation batch");
    }

    /// Move `id` from the active map into the cache.
    ///
    /// The signal is honoured only if no ref was taken since it was armed and
    /// the actor has nothing left to do.
    fn deactivate<K: Kind>(
        &self,
        state: &mut RegistryState,
        id: &K::Id,
        signal: &Deactivation,
        now: Instant,
    ) -> bool {
        let store = K::store(state);
        let Some(slot) = store.active.get_mut(id) else {
            return false;
        };
        if slot.serial() != signal.serial || slot.seq != signal.seq || slot.refs > 0 {
            debug!(key = %id, "Ignoring stale deactivation");
            return false;
        }
        if !slot.actor_ref.is_idle() {
            debug!(key = %id, "Resource busy, deferring deactivation");
            let linger = self.arm_linger(
                signal.key.clone(),
                signal.serial,
                signal.seq,
                Duration::ZERO,
                slot.actor_ref.wait_idle(),
            );
            slot.linger = Some(linger);
            return false;
        }

        let Some(slot) = store.active.remove(id) else {
            return false;
        };
        let frozen = match slot.control.freeze() {
            Some((frozen, ttl)) => {
                store.cache.set_at(id.clone(), frozen, ttl, now);
                true
            }
            None => {
                store.cache.delete(id);
                false
            }
        };
        slot.shutdown();
        info!(key = %id, frozen, "Deactivated resource");
        true
    }

    /// Drop expired cache entries now.
    pub fn evict(&self) -> usize {
        self.lock().evict(Instant::now())
    }

    /// Drop every cache entry.
    pub fn clear_caches(&self) {
        self.lock().clear_caches();
    }

    pub fn stats(&self) -> RegistryStats {
        let now = Instant::now();
        let state = self.lock();
        RegistryStats {
            active_queries: state.queries.active.len(),
            active_infinite_queries: state.infinite.active.len(),
            active_mutations: state.mutations.active.len(),
            active_subscriptions: state.subscriptions.active.len(),
            cached_queries: state.queries.cache.keys_at(now).len(),
            cached_infinite_queries: state.infinite.cache.keys_at(now).len(),
            cached_subscriptions: state.subscriptions.cache.keys_at(now).len(),
            query_cache: state.queries.cache.stats().snapshot(),
            infinite_query_cache: state.infinite.cache.stats().snapshot(),
            subscription_cache: state.subscriptions.cache.stats().snapshot(),
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Stop every actor and background task, waiting up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        let actors: Vec<ActorRef> = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.clear_caches();
            let mut actors = state.queries.drain();
            actors.extend(state.infinite.drain());
            actors.extend(state.mutations.drain());
            actors.extend(state.subscriptions.drain());
            actors
        };
        self.triggers.stop();
        self.cancel.cancel();

        info!(count = actors.len(), "Stopping all actors");

        // Wait for all to finish with timeout
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if actors.iter().all(|a| !a.is_running()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Force abort any remaining
        for actor in &actors {
            if actor.is_running() {
                warn!(actor_id = %actor.actor_id, "Force aborting actor");
                actor.abort();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn mismatch(id: &impl std::fmt::Display) -> EngineError {
    EngineError::KeyTypeMismatch { id: id.to_string() }
}

/// Batch deactivation signals over `window` and apply each batch at once.
async fn run_collector(
    shared: Weak<Shared>,
    mut rx: mpsc::UnboundedReceiver<Deactivation>,
    window: Duration,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let mut batch = vec![first];
        let flush = tokio::time::sleep(window);
        tokio::pin!(flush);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = &mut flush => break,
                signal = rx.recv() => match signal {
                    Some(signal) => batch.push(signal),
                    None => break,
                },
            }
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.collect(batch);
    }
    debug!("Deactivation collector stopped");
}

// =============================================================================
// Lease
// =============================================================================

/// One counted reference to an active resource.
///
/// Dropping the lease releases the reference.
pub(crate) struct Lease<K: Kind, M, C> {
    id: K::Id,
    serial: u64,
    live: Arc<Live<M, C>>,
    shared: Weak<Shared>,
}

impl<K: Kind, M, C> Lease<K, M, C> {
    fn new(shared: &Arc<Shared>, id: K::Id, serial: u64, live: Arc<Live<M, C>>) -> Self {
        Self {
            id,
            serial,
            live,
            shared: Arc::downgrade(shared),
        }
    }

    pub fn id(&self) -> &K::Id {
        &self.id
    }

    pub fn live(&self) -> &Live<M, C> {
        &self.live
    }

    pub fn shared(&self) -> Option<Arc<Shared>> {
        self.shared.upgrade()
    }
}

impl<K: Kind, M, C> Drop for Lease<K, M, C> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release::<K>(&self.id, self.serial);
        }
    }
}
