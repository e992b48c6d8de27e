//! Filter-driven batch operations across active and cached resources.

use std::sync::Arc;

use brook_id::{InfiniteQueryId, QueryId};
use brook_model::{Instant, QueryAction, QueryChunks, QueryModel, QueryView, Reduce};
use tracing::{debug, info};

use super::store::{Control, Frozen, InfiniteQueries, Kind, Live, Mutations, Queries, Subscriptions};
use super::{RegistryState, Shared};
use crate::actors::{DataEdit, InfiniteQueryCommand, Message, QueryCommand};
use crate::filter::{Filter, QueryFilter, SubscriptionFilter};
use crate::resource::ResourceKey;

// =============================================================================
// Per-store helpers
// =============================================================================

fn invalidate_matching<K>(state: &mut RegistryState, filter: &QueryFilter, now: Instant) -> usize
where
    K: Kind<View = dyn QueryView>,
{
    let store = K::store(state);
    let active = store.matching_active(filter);
    for id in &active {
        if let Some(slot) = store.active.get(id) {
            slot.control.invalidate();
        }
    }
    let inactive = store.matching_inactive(filter, now);
    for id in &inactive {
        store
            .cache
            .swap(id, |frozen| frozen.invalidated().unwrap_or_else(|| Arc::clone(frozen)));
    }
    active.len() + inactive.len()
}

fn remove_matching<K: Kind>(
    state: &mut RegistryState,
    filter: &Filter<K::View>,
    now: Instant,
) -> usize {
    let store = K::store(state);
    let active = store.matching_active(filter);
    for id in &active {
        store.remove_active(id);
    }
    let inactive = store.matching_inactive(filter, now);
    for id in &inactive {
        store.cache.delete(id);
    }
    active.len() + inactive.len()
}

/// Resume active resources matching `filter` for which `applies` holds.
fn resume_matching<K, P>(state: &mut RegistryState, filter: &Filter<K::View>, applies: P) -> usize
where
    K: Kind,
    P: Fn(&dyn Control<K::View>) -> bool,
{
    let store = K::store(state);
    let mut resumed = 0;
    for id in store.matching_active(filter) {
        if let Some(slot) = store.active.get(&id) {
            if applies(slot.control.as_ref()) {
                slot.control.resume();
                resumed += 1;
            }
        }
    }
    resumed
}

fn invalidate_one<K>(state: &mut RegistryState, id: &K::Id, now: Instant) -> bool
where
    K: Kind,
{
    let store = K::store(state);
    if let Some(slot) = store.active.get(id) {
        slot.control.invalidate();
        return true;
    }
    if store.cache.peek_at(id, now).is_none() {
        return false;
    }
    store
        .cache
        .swap(id, |frozen| frozen.invalidated().unwrap_or_else(|| Arc::clone(frozen)));
    true
}

fn remove_one<K: Kind>(state: &mut RegistryState, id: &K::Id) -> bool {
    let store = K::store(state);
    if store.remove_active(id).is_some() {
        return true;
    }
    store.cache.delete(id).is_some()
}

fn resume_one<K: Kind>(state: &mut RegistryState, id: &K::Id) -> bool {
    match K::store(state).active.get(id) {
        Some(slot) => {
            slot.control.resume();
            true
        }
        None => false,
    }
}

// =============================================================================
// Coordinator
// =============================================================================

impl Shared {
    /// Invalidate matching queries and infinite queries.
    ///
    /// Active ones refetch; cached ones are marked so their next activation
    /// fetches.
    pub fn invalidate_queries(&self, filter: &QueryFilter) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let count = invalidate_matching::<Queries>(&mut state, filter, now)
            + invalidate_matching::<InfiniteQueries>(&mut state, filter, now);
        debug!(count, "Invalidated queries");
        count
    }

    /// Tear down matching active queries and drop matching cached ones.
    pub fn remove_queries(&self, filter: &QueryFilter) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let count = remove_matching::<Queries>(&mut state, filter, now)
            + remove_matching::<InfiniteQueries>(&mut state, filter, now);
        debug!(count, "Removed queries");
        count
    }

    /// Send a connect to matching active queries.
    pub fn resume_queries(&self, filter: &QueryFilter) -> usize {
        let mut state = self.lock();
        resume_matching::<Queries, _>(&mut state, filter, |_| true)
            + resume_matching::<InfiniteQueries, _>(&mut state, filter, |_| true)
    }

    pub fn remove_subscriptions(&self, filter: &SubscriptionFilter) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let count = remove_matching::<Subscriptions>(&mut state, filter, now);
        debug!(count, "Removed subscriptions");
        count
    }

    /// Restart the source of matching active subscriptions that stopped.
    pub fn resume_subscriptions(&self, filter: &SubscriptionFilter) -> usize {
        let mut state = self.lock();
        resume_matching::<Subscriptions, _>(&mut state, filter, |_| true)
    }

    pub fn invalidate_by(&self, ids: &[ResourceKey]) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        ids.iter()
            .filter(|key| match key {
                ResourceKey::Query(id) => invalidate_one::<Queries>(&mut state, id, now),
                ResourceKey::InfiniteQuery(id) => {
                    invalidate_one::<InfiniteQueries>(&mut state, id, now)
                }
                ResourceKey::Mutation(_) | ResourceKey::Subscription(_) => false,
            })
            .count()
    }

    pub fn remove_by(&self, ids: &[ResourceKey]) -> usize {
        let mut state = self.lock();
        ids.iter()
            .filter(|key| match key {
                ResourceKey::Query(id) => remove_one::<Queries>(&mut state, id),
                ResourceKey::InfiniteQuery(id) => remove_one::<InfiniteQueries>(&mut state, id),
                ResourceKey::Mutation(id) => remove_one::<Mutations>(&mut state, id),
                ResourceKey::Subscription(id) => remove_one::<Subscriptions>(&mut state, id),
            })
            .count()
    }

    pub fn resume_by(&self, ids: &[ResourceKey]) -> usize {
        let mut state = self.lock();
        ids.iter()
            .filter(|key| match key {
                ResourceKey::Query(id) => resume_one::<Queries>(&mut state, id),
                ResourceKey::InfiniteQuery(id) => resume_one::<InfiniteQueries>(&mut state, id),
                ResourceKey::Mutation(_) => false,
                ResourceKey::Subscription(id) => resume_one::<Subscriptions>(&mut state, id),
            })
            .count()
    }

    // -------------------------------------------------------------------------
    // Triggers
    // -------------------------------------------------------------------------

    /// Resume what a network reconnect should revalidate.
    pub fn revalidate_on_reconnect(&self) -> usize {
        let triggers = &self.config.triggers;
        let mut state = self.lock();
        let count = resume_matching::<Queries, _>(&mut state, &triggers.reconnect_queries, |c| {
            c.revalidates_on_reconnect()
        }) + resume_matching::<InfiniteQueries, _>(&mut state, &triggers.reconnect_queries, |c| {
            c.revalidates_on_reconnect()
        }) + resume_matching::<Subscriptions, _>(
            &mut state,
            &triggers.reconnect_subscriptions,
            |c| c.revalidates_on_reconnect(),
        );
        info!(count, "Revalidating after reconnect");
        count
    }

    /// Resume what regaining focus should revalidate.
    pub fn revalidate_on_focus(&self) -> usize {
        let filter = &self.config.triggers.focus_queries;
        let mut state = self.lock();
        let count = resume_matching::<Queries, _>(&mut state, filter, |c| c.revalidates_on_focus())
            + resume_matching::<InfiniteQueries, _>(&mut state, filter, |c| {
                c.revalidates_on_focus()
            });
        info!(count, "Revalidating after focus");
        count
    }

    // -------------------------------------------------------------------------
    // Forced edits
    // -------------------------------------------------------------------------

    pub fn update_query_data<T, F>(&self, id: &QueryId, edit: F) -> bool
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.update_data::<Queries, T, QueryCommand<T>, F>(id, edit, |edit| {
            QueryCommand::ForceUpdate { edit }
        })
    }

    pub fn update_infinite_query_data<T, S, F>(&self, id: &InfiniteQueryId, edit: F) -> bool
    where
        T: Send + Sync + 'static,
        S: Clone + std::fmt::Debug + Send + Sync + 'static,
        F: FnOnce(&QueryChunks<T, S>) -> QueryChunks<T, S> + Send + 'static,
    {
        self.update_data::<InfiniteQueries, QueryChunks<T, S>, InfiniteQueryCommand<T, S>, F>(
            id,
            edit,
            |edit| InfiniteQueryCommand::ForceUpdate { edit },
        )
    }

    /// Edit the data of an active query through its queue, or swap the
    /// frozen model of a cached one.
    fn update_data<K, D, C, F>(
        &self,
        id: &K::Id,
        edit: F,
        command: impl FnOnce(DataEdit<D>) -> C,
    ) -> bool
    where
        K: Kind<View = dyn QueryView>,
        D: Send + Sync + 'static,
        C: Message,
        F: FnOnce(&D) -> D + Send + 'static,
    {
        let now = Instant::now();
        let mut state = self.lock();
        let store = K::store(&mut state);

        if let Some(slot) = store.active.get(id) {
            let Ok(live) = Arc::clone(&slot.live).downcast::<Live<QueryModel<D>, C>>() else {
                return false;
            };
            return live.handle.try_send(command(Box::new(edit))).is_ok();
        }

        let current = store
            .cache
            .peek_at(id, now)
            .and_then(|frozen| frozen.as_any().downcast_ref::<QueryModel<D>>())
            .cloned();
        let Some((model, reply)) = current.and_then(|m| m.reply.clone().map(|r| (m, r))) else {
            return false;
        };
        let next: Arc<dyn Frozen<dyn QueryView>> = Arc::new(model.reduce(QueryAction::ForceUpdate {
            data: Arc::new(edit(&reply)),
            updated_at: now,
        }));
        store.cache.swap(id, move |_| next);
        true
    }
}
