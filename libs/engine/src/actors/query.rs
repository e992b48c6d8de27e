//! Query actor.
//!
//! Connects gate on freshness, invalidations force a fetch, and every fetch
//! runs under the key's retry policy with the actor's cancellation token.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use brook_id::QueryId;
use brook_model::{Instant, QueryAction, QueryModel, ResourceError, Revision};
use brook_retry::RetryError;
use tracing::debug;

use super::{complete, report_failure, Actor, ActorContext, Completion, DataEdit};
use crate::deps::Dependencies;
use crate::error::{CommandError, SkipReason};
use crate::key::QueryKey;
use crate::options::QueryOptions;
use crate::resource::ResourceKey;

/// Commands accepted by a [`QueryActor`].
pub enum QueryCommand<T> {
    /// Fetch if the state is stale, invalidated or pending.
    ///
    /// With `revision`, the command is skipped unless the state is still at
    /// that revision.
    Connect {
        revision: Option<Revision>,
        reply_to: Option<Completion<T>>,
    },

    /// Mark the reply invalid and refetch if the state is at `revision`.
    Invalidate {
        revision: Revision,
        reply_to: Option<Completion<T>>,
    },

    /// Replace the current reply with `edit(reply)`. Ignored without a reply.
    ForceUpdate { edit: DataEdit<T> },
}

impl<T> fmt::Debug for QueryCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryCommand::Connect { revision, .. } => f
                .debug_struct("Connect")
                .field("revision", revision)
                .finish_non_exhaustive(),
            QueryCommand::Invalidate { revision, .. } => f
                .debug_struct("Invalidate")
                .field("revision", revision)
                .finish_non_exhaustive(),
            QueryCommand::ForceUpdate { .. } => f.write_str("ForceUpdate"),
        }
    }
}

/// Actor owning one query.
pub struct QueryActor<K: QueryKey> {
    key: Arc<K>,
    resource: ResourceKey,
    options: QueryOptions,
    deps: Dependencies,
}

impl<K: QueryKey> QueryActor<K> {
    pub fn new(key: Arc<K>, id: QueryId, options: QueryOptions, deps: Dependencies) -> Self {
        Self {
            key,
            resource: id.into(),
            options,
            deps,
        }
    }

    async fn fetch(
        &self,
        ctx: &ActorContext<QueryModel<K::Data>, QueryCommand<K::Data>>,
    ) -> Result<Arc<K::Data>, CommandError> {
        let key = &self.key;
        let deps = &self.deps;
        run_fetch(
            ctx,
            &self.options,
            &self.resource,
            || key.fetch(deps),
            |a, b| key.content_equals(a, b),
            |err| key.recover(err),
        )
        .await
    }
}

#[async_trait]
impl<K: QueryKey> Actor for QueryActor<K> {
    type Model = QueryModel<K::Data>;
    type Message = QueryCommand<K::Data>;

    fn name(&self) -> &str {
        "query"
    }

    async fn handle(
        &mut self,
        msg: QueryCommand<K::Data>,
        ctx: &mut ActorContext<Self::Model, Self::Message>,
    ) -> Result<(), CommandError> {
        match msg {
            QueryCommand::Connect { revision, reply_to } => {
                let model = ctx.snapshot();
                let now = Instant::now();
                let result = match connect_gate(&model, revision, now) {
                    Some(skip) => skip,
                    None => self.fetch(ctx).await,
                };
                complete(reply_to, &result);
                result.map(drop)
            }
            QueryCommand::Invalidate { revision, reply_to } => {
                let result = if ctx.snapshot().revision != revision {
                    Err(CommandError::Skipped(SkipReason::RevisionMismatch))
                } else {
                    ctx.dispatch(QueryAction::Invalidate);
                    self.fetch(ctx).await
                };
                complete(reply_to, &result);
                result.map(drop)
            }
            QueryCommand::ForceUpdate { edit } => {
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

/// Returns the outcome of a connect that must not fetch, or `None` to fetch.
///
/// A fresh reply is handed back as a success.
pub(super) fn connect_gate<T>(
    model: &QueryModel<T>,
    revision: Option<Revision>,
    now: Instant,
) -> Option<Result<Arc<T>, CommandError>> {
    if model.should_fetch(revision, now) {
        return None;
    }
    let reason = if revision.is_some_and(|r| r != model.revision) {
        SkipReason::RevisionMismatch
    } else if model.is_paused_at(now) {
        SkipReason::Paused
    } else {
        SkipReason::Fresh
    };
    Some(match (reason, &model.reply) {
        (SkipReason::Fresh, Some(data)) => Ok(Arc::clone(data)),
        _ => Err(CommandError::Skipped(reason)),
    })
}

/// Run one fetch and record its outcome.
///
/// Shared by single and infinite queries: marks the model as fetching, runs
/// `fetch` under the retry policy, then applies success, recovery or failure.
pub(super) async fn run_fetch<T, C, F, Fut, E, R>(
    ctx: &ActorContext<QueryModel<T>, C>,
    options: &QueryOptions,
    resource: &ResourceKey,
    fetch: F,
    equals: E,
    recover: R,
) -> Result<Arc<T>, CommandError>
where
    T: Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    E: Fn(&T, &T) -> bool,
    R: Fn(&ResourceError) -> Option<T>,
{
    ctx.dispatch(QueryAction::Fetching {
        is_invalidated: None,
    });

    let result = options.retry.run(ctx.cancel_token(), fetch).await;
    let now = Instant::now();
    let error = match result {
        Ok(data) => return apply_success(ctx, options, data, now, &equals),
        Err(RetryError::Cancelled) => return Err(CommandError::Cancelled),
        Err(RetryError::Failed { error, attempts }) => {
            debug!(key = %resource, attempts, "Fetch failed");
            ResourceError::new(error)
        }
    };

    if let Some(data) = recover(&error) {
        debug!(key = %resource, "Recovered from fetch failure");
        return apply_success(ctx, options, data, now, &equals);
    }

    let model = ctx.snapshot();
    let paused_until = options.pause_until(&error, now);
    ctx.dispatch(model.failure_action(
        error.clone(),
        now,
        paused_until,
        Some(|a: &ResourceError, b: &ResourceError| options.errors_equal(a, b)),
    ));
    report_failure(ctx, resource, &error, options.suppresses(&error));
    Err(CommandError::Failed(error))
}

fn apply_success<T, C, E>(
    ctx: &ActorContext<QueryModel<T>, C>,
    options: &QueryOptions,
    data: T,
    now: Instant,
    equals: &E,
) -> Result<Arc<T>, CommandError>
where
    E: Fn(&T, &T) -> bool,
{
    let action = ctx
        .snapshot()
        .success_action(data, now, options.stale_time, equals);
    ctx.dispatch(action);
    ctx.snapshot()
        .reply
        .ok_or(CommandError::Skipped(SkipReason::NoData))
}
