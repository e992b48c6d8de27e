//! Infinite query actor.
//!
//! The model's reply is an ordered list of chunks. A fetch either loads the
//! first chunk (no data yet) or revalidates every loaded chunk from the first
//! parameter on; load-more appends exactly one chunk.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use brook_id::InfiniteQueryId;
use brook_model::{Instant, QueryAction, QueryChunk, QueryChunks, QueryModel, Revision};

use super::query::{connect_gate, run_fetch};
use super::{complete, Actor, ActorContext, Completion, DataEdit};
use crate::deps::Dependencies;
use crate::error::{CommandError, SkipReason};
use crate::key::InfiniteQueryKey;
use crate::options::QueryOptions;
use crate::resource::ResourceKey;

/// Commands accepted by an [`InfiniteQueryActor`].
pub enum InfiniteQueryCommand<T, S> {
    /// Fetch if the state is stale, invalidated or pending.
    Connect {
        revision: Option<Revision>,
        reply_to: Option<Completion<QueryChunks<T, S>>>,
    },

    /// Mark the chunks invalid and revalidate if the state is at `revision`.
    Invalidate {
        revision: Revision,
        reply_to: Option<Completion<QueryChunks<T, S>>>,
    },

    /// Append the chunk for `param`, which must be the next page parameter.
    LoadMore {
        param: S,
        reply_to: Option<Completion<QueryChunks<T, S>>>,
    },

    /// Replace the chunks with `edit(chunks)`. Ignored without data.
    ForceUpdate { edit: DataEdit<QueryChunks<T, S>> },
}

impl<T, S: fmt::Debug> fmt::Debug for InfiniteQueryCommand<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfiniteQueryCommand::Connect { revision, .. } => f
                .debug_struct("Connect")
                .field("revision", revision)
                .finish_non_exhaustive(),
            InfiniteQueryCommand::Invalidate { revision, .. } => f
                .debug_struct("Invalidate")
                .field("revision", revision)
                .finish_non_exhaustive(),
            InfiniteQueryCommand::LoadMore { param, .. } => f
                .debug_struct("LoadMore")
                .field("param", param)
                .finish_non_exhaustive(),
            InfiniteQueryCommand::ForceUpdate { .. } => f.write_str("ForceUpdate"),
        }
    }
}

type Model<K> =
    QueryModel<QueryChunks<<K as InfiniteQueryKey>::Data, <K as InfiniteQueryKey>::Param>>;
type Command<K> =
    InfiniteQueryCommand<<K as InfiniteQueryKey>::Data, <K as InfiniteQueryKey>::Param>;

/// Actor owning one infinite query.
pub struct InfiniteQueryActor<K: InfiniteQueryKey> {
    key: Arc<K>,
    resource: ResourceKey,
    options: QueryOptions,
    deps: Dependencies,
}

impl<K: InfiniteQueryKey> InfiniteQueryActor<K> {
    pub fn new(
        key: Arc<K>,
        id: InfiniteQueryId,
        options: QueryOptions,
        deps: Dependencies,
    ) -> Self {
        Self {
            key,
            resource: id.into(),
            options,
            deps,
        }
    }

    /// Load the first chunk, or revalidate the loaded ones.
    async fn fetch(
        &self,
        ctx: &ActorContext<Model<K>, Command<K>>,
    ) -> Result<Arc<QueryChunks<K::Data, K::Param>>, CommandError> {
        let key = self.key.as_ref();
        let deps = &self.deps;
        let current = ctx.snapshot().reply;
        run_fetch(
            ctx,
            &self.options,
            &self.resource,
            || revalidate(key, deps, current.as_deref()),
            |a, b| key.content_equals(a, b),
            |err| key.recover(err),
        )
        .await
    }

    async fn load_more(
        &self,
        ctx: &ActorContext<Model<K>, Command<K>>,
        param: K::Param,
    ) -> Result<Arc<QueryChunks<K::Data, K::Param>>, CommandError> {
        let Some(chunks) = ctx.snapshot().reply else {
            return Err(CommandError::Skipped(SkipReason::NoData));
        };
        if self.key.load_more_param(&chunks).as_ref() != Some(&param) {
            return Err(CommandError::Skipped(SkipReason::ParamMismatch));
        }

        let key = self.key.as_ref();
        let deps = &self.deps;
        run_fetch(
            ctx,
            &self.options,
            &self.resource,
            || {
                let param = param.clone();
                let chunks = Arc::clone(&chunks);
                async move {
                    let data = key.fetch(param.clone(), deps).await?;
                    let mut next = chunks.as_ref().clone();
                    next.push(QueryChunk::new(data, param));
                    Ok(next)
                }
            },
            |a, b| key.content_equals(a, b),
            |err| key.recover(err),
        )
        .await
    }
}

/// Fetch chunks again from the first parameter.
///
/// Stops after as many chunks as `current` holds, or as soon as the key
/// reports no further page. Without current data, only the first chunk is
/// fetched. Any failure fails the whole revalidation.
async fn revalidate<K: InfiniteQueryKey>(
    key: &K,
    deps: &Dependencies,
    current: Option<&QueryChunks<K::Data, K::Param>>,
) -> anyhow::Result<QueryChunks<K::Data, K::Param>> {
    let first = current.and_then(|chunks| chunks.first().map(|c| (c, chunks.len())));
    let (mut param, limit) = match first {
        Some((first, len)) => (Some(first.param.clone()), len),
        None => (Some(key.initial_param()), 1),
    };

    let mut next = Vec::with_capacity(limit);
    while let Some(p) = param {
        let data = key.fetch(p.clone(), deps).await?;
        next.push(QueryChunk::new(data, p));
        if next.len() >= limit {
            break;
        }
        param = key.load_more_param(&next);
    }
    Ok(next)
}

#[async_trait]
impl<K: InfiniteQueryKey> Actor for InfiniteQueryActor<K> {
    type Model = Model<K>;
    type Message = Command<K>;

    fn name(&self) -> &str {
        "infinite_query"
    }

    async fn handle(
        &mut self,
        msg: Command<K>,
        ctx: &mut ActorContext<Self::Model, Self::Message>,
    ) -> Result<(), CommandError> {
        match msg {
            InfiniteQueryCommand::Connect { revision, reply_to } => {
                let gate = connect_gate(&ctx.snapshot(), revision, Instant::now());
                let result = match gate {
                    Some(skip) => skip,
                    None => self.fetch(ctx).await,
                };
                complete(reply_to, &result);
                result.map(drop)
            }
            InfiniteQueryCommand::Invalidate { revision, reply_to } => {
                let result = if ctx.snapshot().revision != revision {
                    Err(CommandError::Skipped(SkipReason::RevisionMismatch))
                } else {
                    ctx.dispatch(QueryAction::Invalidate);
                    self.fetch(ctx).await
                };
                complete(reply_to, &result);
                result.map(drop)
            }
            InfiniteQueryCommand::LoadMore { param, reply_to } => {
                let result = self.load_more(ctx, param).await;
                complete(reply_to, &result);
                result.map(drop)
            }
            InfiniteQueryCommand::ForceUpdate { edit } => {
                let Some(current) = ctx.snapshot().reply else {
                    return Err(CommandError::Skipped(SkipReason::NoData));
                };
                ctx.dispatch(QueryAction::ForceUpdate {
                    data: Arc::new(edit(&current)),
                    updated_at: Instant::now(),
                });
                Ok(())
            }
        }
    }
}
