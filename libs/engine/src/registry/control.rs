//! [`Control`] implementations for each resource kind.

use std::sync::Arc;
use std::time::Duration;

use brook_model::{
    MutationModel, MutationView, QueryChunks, QueryModel, QueryView, SubscriptionModel,
    SubscriptionView,
};
use tokio::sync::watch;
use tracing::debug;

use super::store::{freeze_subscription, Control, Frozen};
use crate::actors::{
    ActorHandle, InfiniteQueryCommand, MutationCommand, QueryCommand, SubscriptionCommand,
};
use crate::options::{MutationOptions, QueryOptions, SubscriptionOptions};

fn send_or_log<C: crate::actors::Message>(handle: &ActorHandle<C>, command: C) {
    if let Err(e) = handle.try_send(command) {
        debug!(actor_id = handle.actor_id(), error = %e, "Coordinator command dropped");
    }
}

fn freeze_query<T: Send + Sync + 'static>(
    model: QueryModel<T>,
    options: &QueryOptions,
) -> Option<(Arc<dyn Frozen<dyn QueryView>>, Duration)> {
    options
        .is_cacheable(&model)
        .then(|| (Arc::new(model) as Arc<dyn Frozen<dyn QueryView>>, options.gc_time))
}

// =============================================================================
// Queries
// =============================================================================

pub(crate) struct QueryControl<T> {
    pub handle: ActorHandle<QueryCommand<T>>,
    pub state: watch::Receiver<QueryModel<T>>,
    pub options: QueryOptions,
}

impl<T: Send + Sync + 'static> Control<dyn QueryView> for QueryControl<T> {
    fn view(&self) -> Arc<dyn QueryView> {
        Arc::new(self.state.borrow().clone())
    }

    fn freeze(&self) -> Option<(Arc<dyn Frozen<dyn QueryView>>, Duration)> {
        freeze_query(self.state.borrow().clone(), &self.options)
    }

    fn keep_alive(&self) -> Duration {
        self.options.keep_alive_time
    }

    fn invalidate(&self) {
        let revision = self.state.borrow().revision;
        send_or_log(
            &self.handle,
            QueryCommand::Invalidate {
                revision,
                reply_to: None,
            },
        );
    }

    fn resume(&self) {
        send_or_log(
            &self.handle,
            QueryCommand::Connect {
                revision: None,
                reply_to: None,
            },
        );
    }

    fn revalidates_on_reconnect(&self) -> bool {
        self.options.revalidate_on_reconnect
    }

    fn revalidates_on_focus(&self) -> bool {
        self.options.revalidate_on_focus
    }
}

pub(crate) struct InfiniteQueryControl<T, S> {
    pub handle: ActorHandle<InfiniteQueryCommand<T, S>>,
    pub state: watch::Receiver<QueryModel<QueryChunks<T, S>>>,
    pub options: QueryOptions,
}

impl<T, S> Control<dyn QueryView> for InfiniteQueryControl<T, S>
where
    T: Send + Sync + 'static,
    S: Clone + std::fmt::Debug + Send + Sync + 'static,
{
    fn view(&self) -> Arc<dyn QueryView> {
        Arc::new(self.state.borrow().clone())
    }

    fn freeze(&self) -> Option<(Arc<dyn Frozen<dyn QueryView>>, Duration)> {
        freeze_query(self.state.borrow().clone(), &self.options)
    }

    fn keep_alive(&self) -> Duration {
        self.options.keep_alive_time
    }

    fn invalidate(&self) {
        let revision = self.state.borrow().revision;
        send_or_log(
            &self.handle,
            InfiniteQueryCommand::Invalidate {
                revision,
                reply_to: None,
            },
        );
    }

    fn resume(&self) {
        send_or_log(
            &self.handle,
            InfiniteQueryCommand::Connect {
                revision: None,
                reply_to: None,
            },
        );
    }

    fn revalidates_on_reconnect(&self) -> bool {
        self.options.revalidate_on_reconnect
    }

    fn revalidates_on_focus(&self) -> bool {
        self.options.revalidate_on_focus
    }
}

// =============================================================================
// Mutations
// =============================================================================

pub(crate) struct MutationControl<T> {
    pub state: watch::Receiver<MutationModel<T>>,
    pub options: MutationOptions,
}

impl<T: Send + Sync + 'static> Control<dyn MutationView> for MutationControl<T> {
    fn view(&self) -> Arc<dyn MutationView> {
        Arc::new(self.state.borrow().clone())
    }

    /// Mutations are never cached.
    fn freeze(&self) -> Option<(Arc<dyn Frozen<dyn MutationView>>, Duration)> {
        None
    }

    fn keep_alive(&self) -> Duration {
        self.options.keep_alive_time
    }

    fn invalidate(&self) {}

    fn resume(&self) {}
}

// =============================================================================
// Subscriptions
// =============================================================================

pub(crate) struct SubscriptionControl<T> {
    pub handle: ActorHandle<SubscriptionCommand<T>>,
    pub state: watch::Receiver<SubscriptionModel<T>>,
    pub options: SubscriptionOptions,
}

impl<T: Send + Sync + 'static> Control<dyn SubscriptionView> for SubscriptionControl<T> {
    fn view(&self) -> Arc<dyn SubscriptionView> {
        Arc::new(self.state.borrow().clone())
    }

    fn freeze(&self) -> Option<(Arc<dyn Frozen<dyn SubscriptionView>>, Duration)> {
        let model = freeze_subscription(&self.state.borrow());
        self.options
            .is_cacheable(&model)
            .then(|| {
                let frozen: Arc<dyn Frozen<dyn SubscriptionView>> = Arc::new(model);
                (frozen, self.options.gc_time)
            })
    }

    fn keep_alive(&self) -> Duration {
        self.options.keep_alive_time
    }

    /// Subscriptions have nothing to invalidate; the source pushes updates.
    fn invalidate(&self) {}

    fn resume(&self) {
        send_or_log(&self.handle, SubscriptionCommand::Connect);
    }

    fn revalidates_on_reconnect(&self) -> bool {
        true
    }
}
