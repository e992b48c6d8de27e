//! Query effects run after a successful mutation.
//!
//! Mutations never hold the client. The registry hands each mutation actor a
//! notifier closure with a weak reference; effects receive a narrow
//! [`QueryEffects`] handle built from it.

use std::sync::{Arc, Weak};

use brook_id::{InfiniteQueryId, QueryId};
use brook_model::QueryChunks;

use crate::filter::QueryFilter;
use crate::registry::Shared;
use crate::resource::ResourceKey;

/// A side effect on queries.
pub type QueryEffect = Box<dyn FnOnce(&QueryEffects) + Send>;

/// Build a [`QueryEffect`] from a closure.
pub fn query_effect<F>(effect: F) -> QueryEffect
where
    F: FnOnce(&QueryEffects) + Send + 'static,
{
    Box::new(effect)
}

/// The query operations available to mutation effects.
pub struct QueryEffects {
    shared: Weak<Shared>,
}

impl QueryEffects {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    fn with<R>(&self, f: impl FnOnce(&Arc<Shared>) -> R) -> Option<R> {
        self.shared.upgrade().map(|shared| f(&shared))
    }

    pub fn invalidate_queries(&self, filter: &QueryFilter) {
        self.with(|shared| shared.invalidate_queries(filter));
    }

    pub fn remove_queries(&self, filter: &QueryFilter) {
        self.with(|shared| shared.remove_queries(filter));
    }

    pub fn resume_queries(&self, filter: &QueryFilter) {
        self.with(|shared| shared.resume_queries(filter));
    }

    pub fn invalidate_by(&self, ids: &[ResourceKey]) {
        self.with(|shared| shared.invalidate_by(ids));
    }

    /// Edit the data of a query, active or cached. Returns true if applied.
    pub fn update_query_data<T, F>(&self, id: &QueryId, edit: F) -> bool
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.with(|shared| shared.update_query_data(id, edit))
            .unwrap_or(false)
    }

    /// Edit the chunks of an infinite query, active or cached.
    pub fn update_infinite_query_data<T, S, F>(&self, id: &InfiniteQueryId, edit: F) -> bool
    where
        T: Send + Sync + 'static,
        S: Clone + std::fmt::Debug + Send + Sync + 'static,
        F: FnOnce(&QueryChunks<T, S>) -> QueryChunks<T, S> + Send + 'static,
    {
        self.with(|shared| shared.update_infinite_query_data(id, edit))
            .unwrap_or(false)
    }
}
