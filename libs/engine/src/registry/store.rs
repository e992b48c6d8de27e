//! Per-kind storage: active slots plus the cache of frozen models.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use brook_cache::TimeBasedCache;
use brook_id::{InfiniteQueryId, MutationId, QueryId, SubscriptionId, UniqueId};
use brook_model::{
    Instant, MutationView, QueryAction, QueryModel, QueryView, Reduce, ResourceView,
    SubscriberStatus, SubscriptionAction, SubscriptionModel, SubscriptionView,
};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::RegistryState;
use crate::actors::{ActorHandle, ActorRef};
use crate::filter::Filter;
use crate::resource::{ResourceKey, ResourceKind};

// =============================================================================
// Kinds
// =============================================================================

/// Selects one of the registry's stores.
pub(crate) trait Kind: Send + Sync + 'static {
    type Id: Clone
        + Eq
        + Hash
        + Display
        + AsRef<UniqueId>
        + Into<ResourceKey>
        + Send
        + Sync
        + 'static;
    type View: ?Sized + ResourceView + 'static;

    const KIND: ResourceKind;

    fn store(state: &mut RegistryState) -> &mut Store<Self::Id, Self::View>;
}

pub(crate) struct Queries;
pub(crate) struct InfiniteQueries;
pub(crate) struct Mutations;
pub(crate) struct Subscriptions;

impl Kind for Queries {
    type Id = QueryId;
    type View = dyn QueryView;
    const KIND: ResourceKind = ResourceKind::Query;

    fn store(state: &mut RegistryState) -> &mut Store<QueryId, dyn QueryView> {
        &mut state.queries
    }
}

impl Kind for InfiniteQueries {
    type Id = InfiniteQueryId;
    type View = dyn QueryView;
    const KIND: ResourceKind = ResourceKind::InfiniteQuery;

    fn store(state: &mut RegistryState) -> &mut Store<InfiniteQueryId, dyn QueryView> {
        &mut state.infinite
    }
}

impl Kind for Mutations {
    type Id = MutationId;
    type View = dyn MutationView;
    const KIND: ResourceKind = ResourceKind::Mutation;

    fn store(state: &mut RegistryState) -> &mut Store<MutationId, dyn MutationView> {
        &mut state.mutations
    }
}

impl Kind for Subscriptions {
    type Id = SubscriptionId;
    type View = dyn SubscriptionView;
    const KIND: ResourceKind = ResourceKind::Subscription;

    fn store(state: &mut RegistryState) -> &mut Store<SubscriptionId, dyn SubscriptionView> {
        &mut state.subscriptions
    }
}

// =============================================================================
// Frozen Models
// =============================================================================

/// A model parked in the cache.
pub(crate) trait Frozen<V: ?Sized>: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn view(&self) -> &V;

    /// The same model with its reply marked invalid.
    fn invalidated(&self) -> Option<Arc<dyn Frozen<V>>>;
}

impl<T: Send + Sync + 'static> Frozen<dyn QueryView> for QueryModel<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn view(&self) -> &(dyn QueryView + 'static) {
        self
    }

    fn invalidated(&self) -> Option<Arc<dyn Frozen<dyn QueryView>>> {
        Some(Arc::new(self.reduce(QueryAction::Invalidate)))
    }
}

impl<T: Send + Sync + 'static> Frozen<dyn SubscriptionView> for SubscriptionModel<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn view(&self) -> &(dyn SubscriptionView + 'static) {
        self
    }

    fn invalidated(&self) -> Option<Arc<dyn Frozen<dyn SubscriptionView>>> {
        None
    }
}

/// Subscriptions are frozen without a running source.
pub(crate) fn freeze_subscription<T>(model: &SubscriptionModel<T>) -> SubscriptionModel<T> {
    model.reduce(SubscriptionAction::SubscriberChanged {
        status: SubscriberStatus::NoSubscribers,
    })
}

// =============================================================================
// Slots
// =============================================================================

/// Typed endpoints of a running actor, shared with its refs.
pub(crate) struct Live<M, C> {
    pub handle: ActorHandle<C>,
    pub state: watch::Receiver<M>,
}

impl<M: Clone, C> Live<M, C> {
    pub fn snapshot(&self) -> M {
        self.state.borrow().clone()
    }
}

/// Kind-erased operations the coordinator runs on an active resource.
pub(crate) trait Control<V: ?Sized>: Send + Sync {
    /// Current model.
    fn view(&self) -> Arc<V>;

    /// The model to cache on deactivation and its time to live, if cacheable.
    fn freeze(&self) -> Option<(Arc<dyn Frozen<V>>, Duration)>;

    fn keep_alive(&self) -> Duration;

    /// Mark invalid and refetch. No-op for kinds without invalidation.
    fn invalidate(&self);

    /// Connect without a revision guard.
    fn resume(&self);

    /// Whether reconnect and focus triggers apply to this resource.
    fn revalidates_on_reconnect(&self) -> bool {
        false
    }

    fn revalidates_on_focus(&self) -> bool {
        false
    }
}

/// One active resource.
pub(crate) struct Slot<V: ?Sized> {
    pub actor_ref: ActorRef,
    pub refs: usize,

    /// Bumped on every attach; a deactivation signal carries the value it saw.
    pub seq: u64,

    /// Pending keep-alive task, armed when `refs` drops to zero.
    pub linger: Option<AbortHandle>,

    /// `Arc<Live<M, C>>` for the actor's model and command types.
    pub live: Arc<dyn Any + Send + Sync>,

    pub control: Box<dyn Control<V>>,
}

impl<V: ?Sized> Slot<V> {
    pub fn serial(&self) -> u64 {
        self.actor_ref.serial
    }

    /// Stop the actor and cancel its pending keep-alive.
    pub fn shutdown(self) -> ActorRef {
        if let Some(linger) = self.linger {
            linger.abort();
        }
        self.actor_ref.stop();
        self.actor_ref
    }
}

// =============================================================================
// Store
// =============================================================================

pub(crate) struct Store<I, V: ?Sized> {
    pub active: HashMap<I, Slot<V>>,
    pub cache: TimeBasedCache<I, Arc<dyn Frozen<V>>>,
}

impl<I, V> Store<I, V>
where
    I: Clone + Eq + Hash + AsRef<UniqueId>,
    V: ?Sized + ResourceView,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            cache: TimeBasedCache::new(capacity),
        }
    }

    /// Ids of active resources matching `filter`.
    pub fn matching_active(&self, filter: &Filter<V>) -> Vec<I> {
        if !filter.scope.includes_active() {
            return Vec::new();
        }
        self.active
            .iter()
            .filter(|(id, slot)| filter.matches(id.as_ref(), &*slot.control.view()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of live cache entries matching `filter`.
    pub fn matching_inactive(&self, filter: &Filter<V>, now: Instant) -> Vec<I> {
        if !filter.scope.includes_inactive() {
            return Vec::new();
        }
        self.cache
            .keys_at(now)
            .into_iter()
            .filter(|id| {
                self.cache
                    .peek_at(id, now)
                    .is_some_and(|frozen| filter.matches(id.as_ref(), frozen.view()))
            })
            .collect()
    }

    /// Remove an active resource, stopping its actor.
    pub fn remove_active(&mut self, id: &I) -> Option<ActorRef> {
        self.active.remove(id).map(Slot::shutdown)
    }

    /// Take every active resource, stopping the actors.
    pub fn drain(&mut self) -> Vec<ActorRef> {
        self.active.drain().map(|(_, slot)| slot.shutdown()).collect()
    }
}
