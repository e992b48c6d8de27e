//! Kind-tagged resource ids.

use std::fmt;

use brook_id::{InfiniteQueryId, MutationId, QueryId, SubscriptionId, UniqueId};

/// The four resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Query,
    InfiniteQuery,
    Mutation,
    Subscription,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Query => "query",
            ResourceKind::InfiniteQuery => "infinite_query",
            ResourceKind::Mutation => "mutation",
            ResourceKind::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

/// An id of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Query(QueryId),
    InfiniteQuery(InfiniteQueryId),
    Mutation(MutationId),
    Subscription(SubscriptionId),
}

impl ResourceKey {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::Query(_) => ResourceKind::Query,
            ResourceKey::InfiniteQuery(_) => ResourceKind::InfiniteQuery,
            ResourceKey::Mutation(_) => ResourceKind::Mutation,
            ResourceKey::Subscription(_) => ResourceKind::Subscription,
        }
    }

    /// Returns the untyped id.
    pub fn unique(&self) -> &UniqueId {
        match self {
            ResourceKey::Query(id) => id.unique(),
            ResourceKey::InfiniteQuery(id) => id.unique(),
            ResourceKey::Mutation(id) => id.unique(),
            ResourceKey::Subscription(id) => id.unique(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Query(id) => id.fmt(f),
            ResourceKey::InfiniteQuery(id) => id.fmt(f),
            ResourceKey::Mutation(id) => id.fmt(f),
            ResourceKey::Subscription(id) => id.fmt(f),
        }
    }
}

impl From<QueryId> for ResourceKey {
    fn from(id: QueryId) -> Self {
        ResourceKey::Query(id)
    }
}

impl From<InfiniteQueryId> for ResourceKey {
    fn from(id: InfiniteQueryId) -> Self {
        ResourceKey::InfiniteQuery(id)
    }
}

impl From<MutationId> for ResourceKey {
    fn from(id: MutationId) -> Self {
        ResourceKey::Mutation(id)
    }
}

impl From<SubscriptionId> for ResourceKey {
    fn from(id: SubscriptionId) -> Self {
        ResourceKey::Subscription(id)
    }
}
