//! Typed references to active resources.
//!
//! A ref keeps its resource active. Commands go through the actor's queue;
//! state is read from the actor's watch channel. Dropping (or closing) the
//! last ref of a resource arms its keep-alive, after which it is frozen into
//! the cache.

use std::fmt;
use std::sync::Arc;

use brook_model::{MutationModel, QueryChunks, QueryModel, Revision, SubscriptionModel};
use tokio::sync::{oneshot, watch};

use crate::actors::{
    ActorError, ActorHandle, Completion, InfiniteQueryCommand, Message, MutationCommand,
    QueryCommand, SubscriptionCommand,
};
use crate::error::{CommandError, SkipReason};
use crate::key::{InfiniteQueryKey, MutationKey, QueryKey, SubscriptionKey};
use crate::registry::{InfiniteQueries, Lease, Mutations, Queries, Subscriptions};

/// Send a command carrying a completion and wait for it.
async fn request<C, R>(
    handle: &ActorHandle<C>,
    build: impl FnOnce(Completion<R>) -> C,
) -> Result<Arc<R>, CommandError>
where
    C: Message,
{
    let (tx, rx) = oneshot::channel();
    handle.send(build(tx)).await?;
    // A dropped sender means the actor stopped before answering.
    rx.await.unwrap_or(Err(CommandError::Cancelled))
}

/// Accessors every ref shares.
macro_rules! ref_common {
    ($id:ty, $model:ty, $command:ty) => {
        pub fn id(&self) -> &$id {
            self.lease.id()
        }

        /// Snapshot of the current model.
        pub fn state(&self) -> $model {
            self.lease.live().snapshot()
        }

        /// Receiver that observes every model the actor publishes.
        pub fn watch(&self) -> watch::Receiver<$model> {
            self.lease.live().state.clone()
        }

        /// Send a raw command to the actor.
        pub async fn send(&self, command: $command) -> Result<(), ActorError> {
            self.lease.live().handle.send(command).await
        }

        /// Release this reference.
        pub fn close(self) {}
    };
}

// =============================================================================
// Query
// =============================================================================

/// Reference to a query.
pub struct QueryRef<K: QueryKey> {
    lease: Lease<Queries, QueryModel<K::Data>, QueryCommand<K::Data>>,
    key: Arc<K>,
}

impl<K: QueryKey> QueryRef<K> {
    pub(crate) fn new(
        lease: Lease<Queries, QueryModel<K::Data>, QueryCommand<K::Data>>,
        key: Arc<K>,
    ) -> Self {
        Self { lease, key }
    }

    ref_common!(brook_id::QueryId, QueryModel<K::Data>, QueryCommand<K::Data>);

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Fetch unless the data is fresh or fetching is paused.
    pub async fn resume(&self) -> Result<Arc<K::Data>, CommandError> {
        self.connect(None).await
    }

    /// Like [`resume`](Self::resume), skipped if the state moved past
    /// `revision`.
    pub async fn connect(&self, revision: Option<Revision>) -> Result<Arc<K::Data>, CommandError> {
        request(&self.lease.live().handle, |reply_to| QueryCommand::Connect {
            revision,
            reply_to: Some(reply_to),
        })
        .await
    }

    /// Refetch regardless of freshness.
    pub async fn invalidate(&self) -> Result<Arc<K::Data>, CommandError> {
        let revision = self.state().revision;
        request(&self.lease.live().handle, |reply_to| QueryCommand::Invalidate {
            revision,
            reply_to: Some(reply_to),
        })
        .await
    }

    /// Replace the data with an edit of the current data.
    pub async fn force_update<F>(&self, edit: F) -> Result<(), ActorError>
    where
        F: FnOnce(&K::Data) -> K::Data + Send + 'static,
    {
        self.send(QueryCommand::ForceUpdate {
            edit: Box::new(edit),
        })
        .await
    }
}

impl<K: QueryKey> fmt::Debug for QueryRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRef").field("id", self.id()).finish()
    }
}

// =============================================================================
// Infinite Query
// =============================================================================

type ChunksOf<K> = QueryChunks<<K as InfiniteQueryKey>::Data, <K as InfiniteQueryKey>::Param>;

/// Reference to an infinite query.
pub struct InfiniteQueryRef<K: InfiniteQueryKey> {
    lease: Lease<
        InfiniteQueries,
        QueryModel<ChunksOf<K>>,
        InfiniteQueryCommand<K::Data, K::Param>,
    >,
    key: Arc<K>,
}

impl<K: InfiniteQueryKey> InfiniteQueryRef<K> {
    pub(crate) fn new(
        lease: Lease<
            InfiniteQueries,
            QueryModel<ChunksOf<K>>,
            InfiniteQueryCommand<K::Data, K::Param>,
        >,
        key: Arc<K>,
    ) -> Self {
        Self { lease, key }
    }

    ref_common!(
        brook_id::InfiniteQueryId,
        QueryModel<ChunksOf<K>>,
        InfiniteQueryCommand<K::Data, K::Param>
    );

    pub fn key(&self) -> &K {
        &self.key
    }

    pub async fn resume(&self) -> Result<Arc<ChunksOf<K>>, CommandError> {
        self.connect(None).await
    }

    pub async fn connect(
        &self,
        revision: Option<Revision>,
    ) -> Result<Arc<ChunksOf<K>>, CommandError> {
        request(&self.lease.live().handle, |reply_to| {
            InfiniteQueryCommand::Connect {
                revision,
                reply_to: Some(reply_to),
            }
        })
        .await
    }

    /// Refetch every loaded chunk.
    pub async fn invalidate(&self) -> Result<Arc<ChunksOf<K>>, CommandError> {
        let revision = self.state().revision;
        request(&self.lease.live().handle, |reply_to| {
            InfiniteQueryCommand::Invalidate {
                revision,
                reply_to: Some(reply_to),
            }
        })
        .await
    }

    /// Parameter of the next chunk, if there is one.
    pub fn next_param(&self) -> Option<K::Param> {
        let chunks = self.state().reply?;
        self.key.load_more_param(&chunks)
    }

    pub fn has_more(&self) -> bool {
        self.next_param().is_some()
    }

    /// Append the next chunk.
    pub async fn load_more(&self) -> Result<Arc<ChunksOf<K>>, CommandError> {
        let param = self
            .next_param()
            .ok_or(CommandError::Skipped(SkipReason::NoData))?;
        self.load_more_with(param).await
    }

    /// Append the chunk for `param`, skipped unless it is the next one.
    pub async fn load_more_with(&self, param: K::Param) -> Result<Arc<ChunksOf<K>>, CommandError> {
        request(&self.lease.live().handle, |reply_to| {
            InfiniteQueryCommand::LoadMore {
                param,
                reply_to: Some(reply_to),
            }
        })
        .await
    }

    pub async fn force_update<F>(&self, edit: F) -> Result<(), ActorError>
    where
        F: FnOnce(&ChunksOf<K>) -> ChunksOf<K> + Send + 'static,
    {
        self.send(InfiniteQueryCommand::ForceUpdate {
            edit: Box::new(edit),
        })
        .await
    }
}

impl<K: InfiniteQueryKey> fmt::Debug for InfiniteQueryRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQueryRef").field("id", self.id()).finish()
    }
}

// =============================================================================
// Mutation
// =============================================================================

/// Reference to a mutation.
pub struct MutationRef<K: MutationKey> {
    lease: Lease<Mutations, MutationModel<K::Data>, MutationCommand<K::Data, K::Variable>>,
}

impl<K: MutationKey> MutationRef<K> {
    pub(crate) fn new(
        lease: Lease<Mutations, MutationModel<K::Data>, MutationCommand<K::Data, K::Variable>>,
    ) -> Self {
        Self { lease }
    }

    ref_common!(
        brook_id::MutationId,
        MutationModel<K::Data>,
        MutationCommand<K::Data, K::Variable>
    );

    /// Run the mutation against the state observed now.
    pub async fn mutate(&self, variable: K::Variable) -> Result<Arc<K::Data>, CommandError> {
        let revision = self.state().revision;
        self.mutate_at(variable, revision).await
    }

    /// Run the mutation; strict mutations skip it unless `revision` is current.
    pub async fn mutate_at(
        &self,
        variable: K::Variable,
        revision: Revision,
    ) -> Result<Arc<K::Data>, CommandError> {
        request(&self.lease.live().handle, |reply_to| MutationCommand::Mutate {
            variable,
            revision,
            reply_to: Some(reply_to),
        })
        .await
    }

    /// Return to idle, clearing data, error and the mutation count.
    pub async fn reset(&self) -> Result<(), ActorError> {
        self.send(MutationCommand::Reset).await
    }
}

impl<K: MutationKey> fmt::Debug for MutationRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRef").field("id", self.id()).finish()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Reference to a subscription.
pub struct SubscriptionRef<K: SubscriptionKey> {
    lease: Lease<Subscriptions, SubscriptionModel<K::Data>, SubscriptionCommand<K::Data>>,
}

impl<K: SubscriptionKey> SubscriptionRef<K> {
    pub(crate) fn new(
        lease: Lease<Subscriptions, SubscriptionModel<K::Data>, SubscriptionCommand<K::Data>>,
    ) -> Self {
        Self { lease }
    }

    ref_common!(
        brook_id::SubscriptionId,
        SubscriptionModel<K::Data>,
        SubscriptionCommand<K::Data>
    );

    /// Start the source unless it is already running.
    pub async fn resume(&self) -> Result<(), ActorError> {
        self.send(SubscriptionCommand::Connect).await
    }

    /// Push a value from outside the source.
    pub async fn receive(&self, data: K::Data) -> Result<(), ActorError> {
        let revision = self.state().revision;
        self.send(SubscriptionCommand::Receive {
            result: Ok(data),
            revision: Some(revision),
        })
        .await
    }

    /// Clear the model and restart a running source.
    pub async fn reset(&self) -> Result<(), ActorError> {
        self.send(SubscriptionCommand::Reset).await
    }
}

impl<K: SubscriptionKey> fmt::Debug for SubscriptionRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRef").field("id", self.id()).finish()
    }
}
