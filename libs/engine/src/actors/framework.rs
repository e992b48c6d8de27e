//! Core actor framework types and traits.
//!
//! Provides the building blocks every resource actor shares:
//! - `Actor` trait for defining command handling over a reducible model
//! - `ActorContext` exposing state, dispatch, cancellation and the relay
//! - `ActorHandle` for sending commands to an actor's bounded mailbox
//! - `ActorRef` for stopping an actor and observing when it goes idle

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use brook_model::{Instant, Reduce};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::CommandError;
use crate::relay::ErrorRelay;

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines how commands for one resource are executed.
///
/// Actors:
/// - Process commands one at a time, in arrival order
/// - Own the only writer of their model; state changes go through `dispatch`
/// - Report failures through state, never across the send boundary
#[async_trait]
pub trait Actor: Send + 'static {
    /// The model published by this actor.
    type Model: Reduce + Clone + Send + Sync + 'static;

    /// The command type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single command.
    async fn handle(
        &mut self,
        msg: Self::Message,
        ctx: &mut ActorContext<Self::Model, Self::Message>,
    ) -> Result<(), CommandError>;

    /// Called when the actor starts.
    async fn on_start(
        &mut self,
        _ctx: &mut ActorContext<Self::Model, Self::Message>,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self, _ctx: &mut ActorContext<Self::Model, Self::Message>) {
        // Default: no cleanup
    }
}

/// Context provided to actors during command handling.
pub struct ActorContext<M: Reduce, C> {
    /// Actor's unique ID.
    pub actor_id: String,

    /// Message counter for metrics.
    pub messages_processed: u64,

    /// Last message processing time.
    pub last_message_at: Option<Instant>,

    /// Current actor state (for introspection).
    pub state: ActorState,

    cell: watch::Sender<M>,
    cancel: CancellationToken,
    relay: Option<ErrorRelay>,
    mailbox: WeakActorHandle<C>,
    runtime: tokio::runtime::Handle,
}

impl<M, C> ActorContext<M, C>
where
    M: Reduce + Clone,
{
    /// Returns a copy of the current model.
    pub fn snapshot(&self) -> M {
        self.cell.borrow().clone()
    }

    /// Apply `action` through the reducer and publish the result.
    pub fn dispatch(&self, action: M::Action) {
        let next = self.cell.borrow().reduce(action);
        self.cell.send_replace(next);
    }

    /// Token cancelled when the actor is torn down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn relay(&self) -> Option<&ErrorRelay> {
        self.relay.as_ref()
    }

    /// A receiver for the published model.
    pub fn subscribe_state(&self) -> watch::Receiver<M> {
        self.cell.subscribe()
    }

    /// A handle to this actor's own mailbox, while it is still open.
    pub fn mailbox(&self) -> Option<ActorHandle<C>> {
        self.mailbox.upgrade()
    }

    /// Spawn a child task on the runtime the actor was spawned on.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(task)
    }
}

/// Actor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Actor is starting up.
    Starting,
    /// Actor is waiting for commands.
    Idle,
    /// Actor is executing a command.
    Processing,
    /// Actor is discarding its remaining commands.
    Draining,
    /// Actor has stopped.
    Closed,
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur when talking to actors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActorError {
    /// Actor mailbox is full.
    #[error("mailbox full")]
    MailboxFull,

    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,

    /// Actor refused to start.
    #[error("actor failed to start: {0}")]
    StartFailed(String),
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending commands to an actor.
pub struct ActorHandle<C> {
    /// Sender for the actor's mailbox.
    tx: mpsc::Sender<C>,

    /// Commands sent but not yet handled.
    pending: Arc<watch::Sender<usize>>,

    /// Actor ID for logging.
    actor_id: Arc<str>,
}

impl<C> Clone for ActorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            actor_id: Arc::clone(&self.actor_id),
        }
    }
}

impl<C> Debug for ActorHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("actor_id", &self.actor_id)
            .field("pending", &*self.pending.borrow())
            .finish()
    }
}

impl<C: Message> ActorHandle<C> {
    /// Send a command to the actor, waiting for mailbox capacity.
    pub async fn send(&self, msg: C) -> Result<(), ActorError> {
        self.pending.send_modify(|n| *n += 1);
        self.tx.send(msg).await.map_err(|_| {
            self.leave();
            ActorError::ActorStopped
        })
    }

    /// Try to send a command without blocking.
    pub fn try_send(&self, msg: C) -> Result<(), ActorError> {
        self.pending.send_modify(|n| *n += 1);
        self.tx.try_send(msg).map_err(|e| {
            self.leave();
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(actor_id = %self.actor_id, "Actor mailbox full, dropping command");
                    ActorError::MailboxFull
                }
                mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
            }
        })
    }
}

impl<C> ActorHandle<C> {
    /// Get the actor ID.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Returns true once the actor stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn leave(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn downgrade(&self) -> WeakActorHandle<C> {
        WeakActorHandle {
            tx: self.tx.downgrade(),
            pending: Arc::clone(&self.pending),
            actor_id: Arc::clone(&self.actor_id),
        }
    }
}

/// Mailbox handle that does not keep the actor's queue open.
struct WeakActorHandle<C> {
    tx: mpsc::WeakSender<C>,
    pending: Arc<watch::Sender<usize>>,
    actor_id: Arc<str>,
}

impl<C> WeakActorHandle<C> {
    fn upgrade(&self) -> Option<ActorHandle<C>> {
        self.tx.upgrade().map(|tx| ActorHandle {
            tx,
            pending: Arc::clone(&self.pending),
            actor_id: Arc::clone(&self.actor_id),
        })
    }
}

/// Type-erased actor reference for supervision.
#[derive(Debug)]
pub struct ActorRef {
    /// Actor ID.
    pub actor_id: String,

    /// Process-wide serial number, distinct for every spawned actor.
    pub serial: u64,

    /// Task handle.
    task_handle: JoinHandle<()>,

    /// Cancelled to stop the actor and everything it started.
    cancel: CancellationToken,

    /// Commands sent but not yet handled.
    pending: watch::Receiver<usize>,
}

impl ActorRef {
    /// Signal the actor to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Abort the actor task immediately.
    pub fn abort(&self) {
        self.task_handle.abort();
    }

    /// Returns true if no command is queued or executing.
    pub fn is_idle(&self) -> bool {
        *self.pending.borrow() == 0
    }

    /// Resolves once no command is queued or executing.
    pub fn wait_idle(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut pending = self.pending.clone();
        async move {
            let _ = pending.wait_for(|n| *n == 0).await;
        }
    }

    /// Resolves once the actor task finished.
    pub async fn join(self) {
        if let Err(e) = self.task_handle.await {
            if e.is_panic() {
                error!(actor_id = %self.actor_id, "Actor task panicked");
            }
        }
    }
}

// =============================================================================
// Spawning
// =============================================================================

/// Settings for spawning one actor.
pub struct SpawnOptions {
    pub mailbox_size: usize,

    /// Parent token; the actor's own token is a child of it.
    pub parent: CancellationToken,

    pub relay: Option<ErrorRelay>,

    /// Runtime the actor task is spawned on.
    pub runtime: tokio::runtime::Handle,
}

/// A freshly spawned actor.
pub struct Spawned<M, C> {
    pub handle: ActorHandle<C>,
    pub state: watch::Receiver<M>,
    pub actor_ref: ActorRef,
}

/// Spawn `actor` with `model` as its initial state.
pub fn spawn_actor<A>(
    actor: A,
    model: A::Model,
    options: SpawnOptions,
) -> Spawned<A::Model, A::Message>
where
    A: Actor,
{
    let serial = generate_actor_id();
    let actor_id = format!("{}_{}", actor.name(), serial);
    let (tx, rx) = mpsc::channel(options.mailbox_size.max(1));
    let (cell, state) = watch::channel(model);
    let (pending_tx, pending_rx) = watch::channel(0usize);
    let cancel = options.parent.child_token();

    let handle = ActorHandle {
        tx,
        pending: Arc::new(pending_tx),
        actor_id: Arc::from(actor_id.as_str()),
    };

    let ctx = ActorContext {
        actor_id: actor_id.clone(),
        messages_processed: 0,
        last_message_at: None,
        state: ActorState::Starting,
        cell,
        cancel: cancel.clone(),
        relay: options.relay,
        mailbox: handle.downgrade(),
        runtime: options.runtime.clone(),
    };

    let pending = Arc::clone(&handle.pending);
    let task_handle = options.runtime.spawn(run_actor_loop(actor, rx, ctx, pending));

    debug!(actor_id = %actor_id, "Spawned actor");

    Spawned {
        handle,
        state,
        actor_ref: ActorRef {
            actor_id,
            serial,
            task_handle,
            cancel,
            pending: pending_rx,
        },
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

/// Run the main actor loop.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut ctx: ActorContext<A::Model, A::Message>,
    pending: Arc<watch::Sender<usize>>,
) {
    let actor_id = ctx.actor_id.clone();
    let cancel = ctx.cancel.clone();

    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor_id = %actor_id, error = %e, "Actor failed to start");
        rx.close();
        pending.send_replace(0);
        ctx.state = ActorState::Closed;
        return;
    }

    ctx.state = ActorState::Idle;

    loop {
        tokio::select! {
            biased;

            // Check cancellation first
            _ = cancel.cancelled() => {
                debug!(actor_id = %actor_id, "Actor cancelled");
                break;
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %actor_id, "Actor mailbox closed");
                    break;
                };

                ctx.state = ActorState::Processing;
                ctx.messages_processed += 1;
                ctx.last_message_at = Some(Instant::now());

                match actor.handle(msg, &mut ctx).await {
                    Ok(()) => {}
                    Err(CommandError::Skipped(reason)) => {
                        debug!(actor_id = %actor_id, %reason, "Command skipped");
                    }
                    Err(CommandError::Cancelled) => {
                        debug!(actor_id = %actor_id, "Command cancelled");
                    }
                    Err(e) => {
                        warn!(actor_id = %actor_id, error = %e, "Command failed");
                    }
                }

                pending.send_modify(|n| *n = n.saturating_sub(1));
                ctx.state = ActorState::Idle;
            }
        }
    }

    ctx.state = ActorState::Draining;
    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    pending.send_replace(0);

    actor.on_stop(&mut ctx).await;
    ctx.state = ActorState::Closed;

    debug!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        dropped,
        "Actor stopped"
    );
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================
