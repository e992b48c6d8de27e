//! The client: entry point for creating refs and coordinating resources.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use brook_id::{InfiniteQueryId, QueryId};
use brook_model::{Instant, QueryChunks, QueryModel, SubscriptionModel};
use tokio::runtime::Handle;
use tracing::debug;

use crate::actors::{
    spawn_actor, InfiniteQueryActor, MutationActor, Notifier, QueryActor, SubscriptionActor,
};
use crate::config::EngineConfig;
use crate::deps::Dependencies;
use crate::effects::{QueryEffect, QueryEffects};
use crate::error::EngineError;
use crate::filter::{QueryFilter, SubscriptionFilter};
use crate::key::{InfiniteQueryKey, MutationKey, QueryKey, SubscriptionKey};
use crate::refs::{InfiniteQueryRef, MutationRef, QueryRef, SubscriptionRef};
use crate::registry::{
    Created, InfiniteQueries, InfiniteQueryControl, Mutations, MutationControl, Queries,
    QueryControl, RegistryStats, Shared, SubscriptionControl, Subscriptions,
};
use crate::relay::ErrorRelay;
use crate::resource::ResourceKey;
use crate::triggers::{
    EventSource, EventSources, MemoryPressure, MountGuard, NetworkEvent, Triggers, WindowEvent,
};

/// How long [`Client::shutdown`] waits for actors before aborting them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: EngineConfig,
    deps: Dependencies,
    sources: EventSources,
    runtime: Option<Handle>,
}

impl ClientBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dependencies(mut self, deps: Dependencies) -> Self {
        self.deps = deps;
        self
    }

    pub fn network_events(mut self, source: EventSource<NetworkEvent>) -> Self {
        self.sources.network = Some(source);
        self
    }

    pub fn window_events(mut self, source: EventSource<WindowEvent>) -> Self {
        self.sources.window = Some(source);
        self
    }

    pub fn memory_events(mut self, source: EventSource<MemoryPressure>) -> Self {
        self.sources.memory = Some(source);
        self
    }

    /// Runtime to spawn actors on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Client, EngineError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| EngineError::NoRuntime)?,
        };
        let shared = Shared::new(
            self.config,
            self.deps,
            Triggers::new(self.sources),
            runtime,
        );
        Ok(Client { shared })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Handle to one engine instance. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Build a client on the current runtime.
    pub fn new(config: EngineConfig, deps: Dependencies) -> Result<Self, EngineError> {
        Self::builder().config(config).dependencies(deps).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.shared.deps
    }

    // -------------------------------------------------------------------------
    // Refs
    // -------------------------------------------------------------------------

    /// Reference the query for `key`, activating it if needed.
    pub fn query<K: QueryKey>(&self, key: K) -> Result<QueryRef<K>, EngineError> {
        let key = Arc::new(key);
        let id = key.id();
        let actor_key = Arc::clone(&key);
        let lease = self
            .shared
            .acquire::<Queries, _, _, _>(id.clone(), move |shared, frozen| {
                let options = actor_key.on_configure(shared.config.query.clone());
                let model = frozen
                    .or_else(|| {
                        actor_key
                            .initial_data(&shared.deps)
                            .map(|data| {
                                QueryModel::with_initial_data(Arc::new(data), Instant::now())
                            })
                    })
                    .unwrap_or_default();
                let actor = QueryActor::new(actor_key, id, options.clone(), shared.deps.clone());
                let spawned = spawn_actor(actor, model, shared.spawn_options());
                let control = Box::new(QueryControl {
                    handle: spawned.handle.clone(),
                    state: spawned.state.clone(),
                    options,
                });
                Created { spawned, control }
            })?;
        Ok(QueryRef::new(lease, key))
    }

    /// Reference the infinite query for `key`, activating it if needed.
    pub fn infinite_query<K: InfiniteQueryKey>(
        &self,
        key: K,
    ) -> Result<InfiniteQueryRef<K>, EngineError> {
        let key = Arc::new(key);
        let id = key.id();
        let actor_key = Arc::clone(&key);
        let lease = self
            .shared
            .acquire::<InfiniteQueries, _, _, _>(id.clone(), move |shared, frozen| {
                let options = actor_key.on_configure(shared.config.query.clone());
                let model = frozen
                    .or_else(|| {
                        actor_key
                            .initial_data(&shared.deps)
                            .map(|data| {
                                QueryModel::with_initial_data(Arc::new(data), Instant::now())
                            })
                    })
                    .unwrap_or_default();
                let actor =
                    InfiniteQueryActor::new(actor_key, id, options.clone(), shared.deps.clone());
                let spawned = spawn_actor(actor, model, shared.spawn_options());
                let control = Box::new(InfiniteQueryControl {
                    handle: spawned.handle.clone(),
                    state: spawned.state.clone(),
                    options,
                });
                Created { spawned, control }
            })?;
        Ok(InfiniteQueryRef::new(lease, key))
    }

    /// Reference the mutation for `key`, activating it if needed.
    pub fn mutation<K: MutationKey>(&self, key: K) -> Result<MutationRef<K>, EngineError> {
        let key = Arc::new(key);
        let id = key.id();
        let lease = self
            .shared
            .acquire::<Mutations, _, _, _>(id.clone(), move |shared, _| {
                let options = key.on_configure(shared.config.mutation.clone());
                let weak = Arc::downgrade(shared);
                let notifier: Notifier = Arc::new(move |effect: QueryEffect| {
                    effect(&QueryEffects::new(weak.clone()));
                });
                let actor = MutationActor::new(
                    key,
                    id,
                    options.clone(),
                    shared.deps.clone(),
                    Some(notifier),
                );
                let spawned = spawn_actor(actor, Default::default(), shared.spawn_options());
                let control = Box::new(MutationControl {
                    state: spawned.state.clone(),
                    options,
                });
                Created { spawned, control }
            })?;
        Ok(MutationRef::new(lease))
    }

    /// Reference the subscription for `key`, activating it if needed.
    ///
    /// The source does not start until [`SubscriptionRef::resume`] is called.
    pub fn subscription<K: SubscriptionKey>(
        &self,
        key: K,
    ) -> Result<SubscriptionRef<K>, EngineError> {
        let key = Arc::new(key);
        let id = key.id();
        let lease = self
            .shared
            .acquire::<Subscriptions, _, _, _>(id.clone(), move |shared, frozen| {
                let options = key.on_configure(shared.config.subscription.clone());
                let model = frozen
                    .or_else(|| {
                        key.initial_data(&shared.deps).map(|data| {
                            SubscriptionModel::with_initial_data(Arc::new(data), Instant::now())
                        })
                    })
                    .unwrap_or_default();
                let actor = SubscriptionActor::new(key, id, options.clone(), shared.deps.clone());
                let spawned = spawn_actor(actor, model, shared.spawn_options());
                let control = Box::new(SubscriptionControl {
                    handle: spawned.handle.clone(),
                    state: spawned.state.clone(),
                    options,
                });
                Created { spawned, control }
            })?;
        Ok(SubscriptionRef::new(lease))
    }

    // -------------------------------------------------------------------------
    // Prefetch
    // -------------------------------------------------------------------------

    /// Warm the query for `key` and release it.
    ///
    /// Waits up to the prefetch window for the fetch to land; the resource
    /// then lingers for its keep-alive and is frozen into the cache.
    pub async fn prefetch_query<K: QueryKey>(&self, key: K) -> Result<(), EngineError> {
        let window = key
            .on_configure(self.shared.config.query.clone())
            .prefetch_window_time;
        let query = self.query(key)?;
        match tokio::time::timeout(window, query.resume()).await {
            Ok(Ok(_)) => debug!(key = %query.id(), "Prefetched query"),
            Ok(Err(e)) => debug!(key = %query.id(), error = %e, "Prefetch did not fetch"),
            Err(_) => debug!(key = %query.id(), "Prefetch window elapsed"),
        }
        Ok(())
    }

    /// Warm the first chunk of the infinite query for `key` and release it.
    pub async fn prefetch_infinite_query<K: InfiniteQueryKey>(
        &self,
        key: K,
    ) -> Result<(), EngineError> {
        let window = key
            .on_configure(self.shared.config.query.clone())
            .prefetch_window_time;
        let query = self.infinite_query(key)?;
        match tokio::time::timeout(window, query.resume()).await {
            Ok(Ok(_)) => debug!(key = %query.id(), "Prefetched infinite query"),
            Ok(Err(e)) => debug!(key = %query.id(), error = %e, "Prefetch did not fetch"),
            Err(_) => debug!(key = %query.id(), "Prefetch window elapsed"),
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Coordination
    // -------------------------------------------------------------------------

    /// Refetch matching active queries; mark matching cached ones invalidated.
    pub fn invalidate_queries(&self, filter: &QueryFilter) -> usize {
        self.shared.invalidate_queries(filter)
    }

    /// Tear down matching active queries and drop matching cached ones.
    pub fn remove_queries(&self, filter: &QueryFilter) -> usize {
        self.shared.remove_queries(filter)
    }

    /// Connect matching active queries.
    pub fn resume_queries(&self, filter: &QueryFilter) -> usize {
        self.shared.resume_queries(filter)
    }

    pub fn remove_subscriptions(&self, filter: &SubscriptionFilter) -> usize {
        self.shared.remove_subscriptions(filter)
    }

    pub fn resume_subscriptions(&self, filter: &SubscriptionFilter) -> usize {
        self.shared.resume_subscriptions(filter)
    }

    pub fn invalidate_by(&self, ids: &[ResourceKey]) -> usize {
        self.shared.invalidate_by(ids)
    }

    pub fn remove_by(&self, ids: &[ResourceKey]) -> usize {
        self.shared.remove_by(ids)
    }

    pub fn resume_by(&self, ids: &[ResourceKey]) -> usize {
        self.shared.resume_by(ids)
    }

    /// Edit the data of a query, active or cached. Returns true if applied.
    pub fn update_query_data<T, F>(&self, id: &QueryId, edit: F) -> bool
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.shared.update_query_data(id, edit)
    }

    /// Edit the chunks of an infinite query, active or cached.
    pub fn update_infinite_query_data<T, S, F>(&self, id: &InfiniteQueryId, edit: F) -> bool
    where
        T: Send + Sync + 'static,
        S: Clone + fmt::Debug + Send + Sync + 'static,
        F: FnOnce(&QueryChunks<T, S>) -> QueryChunks<T, S> + Send + 'static,
    {
        self.shared.update_infinite_query_data(id, edit)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start observing revalidation triggers until the guard is dropped.
    pub fn mount(&self) -> MountGuard {
        MountGuard::new(&self.shared)
    }

    pub fn error_relay(&self) -> Option<&ErrorRelay> {
        self.shared.relay.as_ref()
    }

    pub fn stats(&self) -> RegistryStats {
        self.shared.stats()
    }

    /// Drop expired cache entries now.
    pub fn evict(&self) -> usize {
        self.shared.evict()
    }

    pub fn clear_caches(&self) {
        self.shared.clear_caches();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stop every actor and background task.
    ///
    /// Refs still held afterwards observe stopped actors.
    pub async fn shutdown(&self) {
        self.shared.shutdown(SHUTDOWN_TIMEOUT).await;
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("stats", &self.shared.stats())
            .finish()
    }
}
