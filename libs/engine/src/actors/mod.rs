//! Resource actors.
//!
//! Every active resource is owned by exactly one actor: a task that drains a
//! bounded command queue in arrival order and is the only writer of the
//! resource's model.
//!
//! ## Design Principles
//!
//! - **One actor per resource**: an actor owns the state and side effects
//!   of a single query, infinite query, mutation or subscription
//! - **Serialized commands**: no two commands for the same key ever run
//!   concurrently; state dispatched by one is visible to the next
//! - **Revision guards**: commands carrying a stale revision are skipped
//! - **Owned cancellation**: tearing an actor down cancels exactly the work
//!   it started (retries, sleeps, subscription sources)
//!
//! ## Actor Types
//!
//! - `QueryActor`: fetches a single value
//! - `InfiniteQueryActor`: fetches and revalidates ordered chunks
//! - `MutationActor`: runs mutations and notifies dependent queries
//! - `SubscriptionActor`: runs a subscription source and applies its items

mod framework;
mod infinite;
mod mutation;
mod query;
mod subscription;

use std::sync::Arc;

use brook_model::{Instant, Reduce, ResourceError, ResourceView};
use tokio::sync::oneshot;
use tracing::debug;

pub use framework::{
    spawn_actor, Actor, ActorContext, ActorError, ActorHandle, ActorRef, ActorState, Message,
    SpawnOptions, Spawned,
};
pub use infinite::{InfiniteQueryActor, InfiniteQueryCommand};
pub use mutation::{MutationActor, MutationCommand, Notifier};
pub use query::{QueryActor, QueryCommand};
pub use subscription::{SubscriptionActor, SubscriptionCommand};

use crate::error::CommandError;
use crate::relay::ErrorRecord;
use crate::resource::ResourceKey;

/// Receives the outcome of one command.
pub type Completion<T> = oneshot::Sender<Result<Arc<T>, CommandError>>;

/// Edits the current data of a resource.
pub type DataEdit<T> = Box<dyn FnOnce(&T) -> T + Send>;

/// Deliver `result` to the caller waiting on the command, if any.
fn complete<T>(reply_to: Option<Completion<T>>, result: &Result<Arc<T>, CommandError>) {
    if let Some(tx) = reply_to {
        // The caller may have stopped waiting.
        let _ = tx.send(result.clone());
    }
}

/// Forward a terminal failure to the error relay.
fn report_failure<M, C>(
    ctx: &ActorContext<M, C>,
    key: &ResourceKey,
    error: &ResourceError,
    suppressed: bool,
) where
    M: Reduce + Clone + ResourceView + 'static,
{
    if suppressed {
        debug!(key = %key, "Error relay suppressed");
        return;
    }
    if let Some(relay) = ctx.relay() {
        relay.report(ErrorRecord {
            error: error.clone(),
            key: key.clone(),
            model: Arc::new(ctx.snapshot()),
            reported_at: Instant::now(),
        });
    }
}
