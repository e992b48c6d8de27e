//! Subscription actor.
//!
//! The actor runs the key's source in a task of its own, under a child of the
//! actor's cancellation token. Every item the source yields comes back
//! through the mailbox, so applying it is serialized with all other commands.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use brook_id::SubscriptionId;
use brook_model::{
    Instant, ResourceError, Revision, SubscriberStatus, SubscriptionAction, SubscriptionModel,
};
use brook_retry::{Cancelled, RetryError, RetryPolicy};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{report_failure, Actor, ActorContext, ActorHandle};
use crate::deps::Dependencies;
use crate::error::{CommandError, SkipReason};
use crate::key::SubscriptionKey;
use crate::options::SubscriptionOptions;
use crate::resource::ResourceKey;

/// Commands accepted by a [`SubscriptionActor`].
pub enum SubscriptionCommand<T> {
    /// Start the source unless it is already running.
    Connect,

    /// Apply a value or a terminal failure.
    ///
    /// With `revision`, the command is skipped unless the state is still at
    /// that revision.
    Receive {
        result: Result<T, ResourceError>,
        revision: Option<Revision>,
    },

    /// Clear the state and restart the source.
    Reset,

    /// An item from the source started as `generation`.
    SourceItem {
        result: Result<T, ResourceError>,
        generation: u64,
    },

    /// The source started as `generation` ended.
    SourceStopped { generation: u64 },
}

impl<T> fmt::Debug for SubscriptionCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionCommand::Connect => f.write_str("Connect"),
            SubscriptionCommand::Receive { result, revision } => f
                .debug_struct("Receive")
                .field("ok", &result.is_ok())
                .field("revision", revision)
                .finish(),
            SubscriptionCommand::Reset => f.write_str("Reset"),
            SubscriptionCommand::SourceItem { result, generation } => f
                .debug_struct("SourceItem")
                .field("ok", &result.is_ok())
                .field("generation", generation)
                .finish(),
            SubscriptionCommand::SourceStopped { generation } => f
                .debug_struct("SourceStopped")
                .field("generation", generation)
                .finish(),
        }
    }
}

/// The running source task.
struct Source {
    generation: u64,
    cancel: CancellationToken,
}

/// Actor owning one subscription.
pub struct SubscriptionActor<K: SubscriptionKey> {
    key: Arc<K>,
    resource: ResourceKey,
    options: SubscriptionOptions,
    deps: Dependencies,
    source: Option<Source>,
    generation: u64,
}

impl<K: SubscriptionKey> SubscriptionActor<K> {
    pub fn new(
        key: Arc<K>,
        id: SubscriptionId,
        options: SubscriptionOptions,
        deps: Dependencies,
    ) -> Self {
        Self {
            key,
            resource: id.into(),
            options,
            deps,
            source: None,
            generation: 0,
        }
    }

    fn start_source(
        &mut self,
        ctx: &ActorContext<SubscriptionModel<K::Data>, SubscriptionCommand<K::Data>>,
    ) -> Result<(), CommandError> {
        let Some(mailbox) = ctx.mailbox() else {
            return Err(CommandError::Cancelled);
        };
        self.generation += 1;
        let generation = self.generation;
        let cancel = ctx.cancel_token().child_token();

        ctx.spawn(run_source(
            Arc::clone(&self.key),
            self.deps.clone(),
            self.options.retry.clone(),
            cancel.clone(),
            mailbox,
            generation,
        ));
        self.source = Some(Source { generation, cancel });
        ctx.dispatch(SubscriptionAction::SubscriberChanged {
            status: SubscriberStatus::Active,
        });
        info!(key = %self.resource, generation, "Subscription source started");
        Ok(())
    }

    fn stop_source(&mut self) {
        if let Some(source) = self.source.take() {
            source.cancel.cancel();
            debug!(
                key = %self.resource,
                generation = source.generation,
                "Subscription source stopped"
            );
        }
    }

    fn apply(
        &self,
        ctx: &ActorContext<SubscriptionModel<K::Data>, SubscriptionCommand<K::Data>>,
        result: Result<K::Data, ResourceError>,
    ) -> Result<(), CommandError> {
        let model = ctx.snapshot();
        let now = Instant::now();
        let error = match result {
            Ok(data) => {
                ctx.dispatch(model.receive_action(data, now, |a, b| self.key.content_equals(a, b)));
                return Ok(());
            }
            Err(error) => error,
        };

        if let Some(data) = self.key.recover(&error) {
            debug!(key = %self.resource, "Recovered from subscription failure");
            ctx.dispatch(model.receive_action(data, now, |a, b| self.key.content_equals(a, b)));
            return Ok(());
        }

        ctx.dispatch(model.failure_action(
            error.clone(),
            now,
            Some(|a: &ResourceError, b: &ResourceError| self.options.errors_equal(a, b)),
        ));
        report_failure(ctx, &self.resource, &error, self.options.suppresses(&error));
        Err(CommandError::Failed(error))
    }
}

/// Drive the source until it ends, fails terminally or is cancelled.
///
/// Each attempt opens a new stream; an item error ends the attempt and goes
/// through the retry policy.
async fn run_source<K: SubscriptionKey>(
    key: Arc<K>,
    deps: Dependencies,
    retry: RetryPolicy,
    cancel: CancellationToken,
    mailbox: ActorHandle<SubscriptionCommand<K::Data>>,
    generation: u64,
) {
    let result = retry
        .run(&cancel, || {
            let key = Arc::clone(&key);
            let deps = deps.clone();
            let mailbox = mailbox.clone();
            async move {
                let mut stream = key.subscribe(&deps).await?;
                while let Some(item) = stream.next().await {
                    let command = SubscriptionCommand::SourceItem {
                        result: Ok(item?),
                        generation,
                    };
                    mailbox
                        .send(command)
                        .await
                        .map_err(|_| anyhow::Error::new(Cancelled))?;
                }
                Ok(())
            }
        })
        .await;

    match result {
        Ok(()) => {}
        Err(RetryError::Cancelled) => return,
        Err(RetryError::Failed { error, .. }) => {
            let command = SubscriptionCommand::SourceItem {
                result: Err(ResourceError::new(error)),
                generation,
            };
            if mailbox.send(command).await.is_err() {
                return;
            }
        }
    }
    // The actor may already be gone.
    let _ = mailbox
        .send(SubscriptionCommand::SourceStopped { generation })
        .await;
}

#[async_trait]
impl<K: SubscriptionKey> Actor for SubscriptionActor<K> {
    type Model = SubscriptionModel<K::Data>;
    type Message = SubscriptionCommand<K::Data>;

    fn name(&self) -> &str {
        "subscription"
    }

    async fn handle(
        &mut self,
        msg: Self::Message,
        ctx: &mut ActorContext<Self::Model, Self::Message>,
    ) -> Result<(), CommandError> {
        match msg {
            SubscriptionCommand::Connect => {
                if self.source.is_some() {
                    return Err(CommandError::Skipped(SkipReason::Fresh));
                }
                self.start_source(ctx)
            }
            SubscriptionCommand::Receive { result, revision } => {
                if revision.is_some_and(|r| r != ctx.snapshot().revision) {
                    return Err(CommandError::Skipped(SkipReason::RevisionMismatch));
                }
                self.apply(ctx, result)
            }
            SubscriptionCommand::Reset => {
                ctx.dispatch(SubscriptionAction::Reset);
                if self.source.is_some() {
                    self.stop_source();
                    self.start_source(ctx)?;
                }
                Ok(())
            }
            SubscriptionCommand::SourceItem { result, generation } => {
                if self.source.as_ref().map(|s| s.generation) != Some(generation) {
                    return Err(CommandError::Skipped(SkipReason::RevisionMismatch));
                }
                self.apply(ctx, result)
            }
            SubscriptionCommand::SourceStopped { generation } => {
                if self.source.as_ref().map(|s| s.generation) != Some(generation) {
                    return Ok(());
                }
                self.source = None;
                ctx.dispatch(SubscriptionAction::SubscriberChanged {
                    status: SubscriberStatus::NoSubscribers,
                });
                info!(key = %self.resource, generation, "Subscription source ended");
                Ok(())
            }
        }
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext<Self::Model, Self::Message>) {
        self.stop_source();
        ctx.dispatch(SubscriptionAction::SubscriberChanged {
            status: SubscriberStatus::NoSubscribers,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{spawn_actor, SpawnOptions, Spawned};
    use brook_model::{ResourceView, SubscriptionStatus};
    use futures_util::stream::BoxStream;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Hands out one pre-made stream per subscribe call.
    struct Feed {
        streams: Mutex<Vec<mpsc::UnboundedReceiver<anyhow::Result<u32>>>>,
    }

    #[async_trait]
    impl SubscriptionKey for Feed {
        type Data = u32;

        fn id(&self) -> SubscriptionId {
            SubscriptionId::new("feed")
        }

        async fn subscribe(
            &self,
            _deps: &Dependencies,
        ) -> anyhow::Result<BoxStream<'static, anyhow::Result<u32>>> {
            let rx = self
                .streams
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no more streams"))?;
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }
    }

    fn spawn(
        streams: Vec<mpsc::UnboundedReceiver<anyhow::Result<u32>>>,
        retry: RetryPolicy,
    ) -> Spawned<SubscriptionModel<u32>, SubscriptionCommand<u32>> {
        let key = Arc::new(Feed {
            streams: Mutex::new(streams),
        });
        let options = SubscriptionOptions::default().with_retry(retry);
        let actor =
            SubscriptionActor::new(key, SubscriptionId::new("feed"), options, Dependencies::new());
        spawn_actor(
            actor,
            SubscriptionModel::default(),
            SpawnOptions {
                mailbox_size: 16,
                parent: CancellationToken::new(),
                relay: None,
                runtime: tokio::runtime::Handle::current(),
            },
        )
    }

    /// Records the thread its source was opened on.
    struct ThreadRecorder {
        thread: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl SubscriptionKey for ThreadRecorder {
        type Data = u32;

        fn id(&self) -> SubscriptionId {
            SubscriptionId::new("thread")
        }

        async fn subscribe(
            &self,
            _deps: &Dependencies,
        ) -> anyhow::Result<BoxStream<'static, anyhow::Result<u32>>> {
            let name = std::thread::current().name().map(str::to_string);
            *self.thread.lock().unwrap() = name;
            Ok(futures_util::stream::pending().boxed())
        }
    }

    #[test]
    fn test_source_runs_on_actor_runtime() {
        let actors = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("brook-actors")
            .enable_all()
            .build()
            .unwrap();
        let caller = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let thread = Arc::new(Mutex::new(None));

        let key = Arc::new(ThreadRecorder {
            thread: Arc::clone(&thread),
        });
        let actor = SubscriptionActor::new(
            key,
            SubscriptionId::new("thread"),
            SubscriptionOptions::default(),
            Dependencies::new(),
        );
        let runtime = actors.handle().clone();
        caller.block_on(async {
            let spawned = spawn_actor(
                actor,
                SubscriptionModel::default(),
                SpawnOptions {
                    mailbox_size: 4,
                    parent: CancellationToken::new(),
                    relay: None,
                    runtime,
                },
            );
            spawned.handle.send(SubscriptionCommand::Connect).await.unwrap();
            for _ in 0..100 {
                if thread.lock().unwrap().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            spawned.actor_ref.stop();
        });

        assert_eq!(thread.lock().unwrap().as_deref(), Some("brook-actors"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_are_applied_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = spawn(vec![rx], RetryPolicy::disabled());
        spawned.handle.send(SubscriptionCommand::Connect).await.unwrap();

        tx.send(Ok(1)).unwrap();
        tx.send(Ok(2)).unwrap();
        tx.send(Ok(3)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let model = spawned.state.borrow().clone();
        assert_eq!(model.reply.as_deref(), Some(&3));
        assert_eq!(model.status, SubscriptionStatus::Success);
        assert_eq!(model.subscriber_status, SubscriberStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_is_skipped() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let spawned = spawn(vec![rx], RetryPolicy::disabled());
        spawned.handle.send(SubscriptionCommand::Connect).await.unwrap();
        spawned.handle.send(SubscriptionCommand::Connect).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A second subscribe would have failed: only one stream exists.
        assert!(!spawned.state.borrow().is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_is_recorded() {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = spawn(vec![rx], RetryPolicy::disabled());
        spawned.handle.send(SubscriptionCommand::Connect).await.unwrap();

        tx.send(Ok(7)).unwrap();
        tx.send(Err(anyhow::anyhow!("socket closed"))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let model = spawned.state.borrow().clone();
        assert!(model.is_failure());
        assert_eq!(model.reply.as_deref(), Some(&7));
        assert_eq!(model.subscriber_status, SubscriberStatus::NoSubscribers);
        assert!(model.error.unwrap().to_string().contains("socket closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_revision_receive_is_skipped() {
        let spawned = spawn(Vec::new(), RetryPolicy::disabled());
        let initial = spawned.state.borrow().revision;
        spawned
            .handle
            .send(SubscriptionCommand::Receive {
                result: Ok(1),
                revision: Some(initial),
            })
            .await
            .unwrap();
        spawned
            .handle
            .send(SubscriptionCommand::Receive {
                result: Ok(2),
                revision: Some(initial),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(spawned.state.borrow().reply.as_deref(), Some(&1));
    }
}
