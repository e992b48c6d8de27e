//! Mutation actor.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use brook_id::MutationId;
use brook_model::{
    Instant, MutationAction, MutationModel, MutationStatus, ResourceError, Revision,
};
use brook_retry::RetryError;
use tracing::debug;

use super::{complete, report_failure, Actor, ActorContext, Completion};
use crate::deps::Dependencies;
use crate::effects::QueryEffect;
use crate::error::{CommandError, SkipReason};
use crate::key::MutationKey;
use crate::options::MutationOptions;
use crate::resource::ResourceKey;

/// Runs query effects produced by successful mutations.
pub type Notifier = Arc<dyn Fn(QueryEffect) + Send + Sync>;

/// Commands accepted by a [`MutationActor`].
pub enum MutationCommand<T, V> {
    /// Run the mutation with `variable`.
    ///
    /// `revision` is the state the caller observed; strict mode skips the
    /// command if the state moved on.
    Mutate {
        variable: V,
        revision: Revision,
        reply_to: Option<Completion<T>>,
    },

    /// Return to the idle state.
    Reset,
}

impl<T, V> fmt::Debug for MutationCommand<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationCommand::Mutate { revision, .. } => f
                .debug_struct("Mutate")
                .field("revision", revision)
                .finish_non_exhaustive(),
            MutationCommand::Reset => f.write_str("Reset"),
        }
    }
}

/// Actor owning one mutation.
pub struct MutationActor<K: MutationKey> {
    key: Arc<K>,
    resource: ResourceKey,
    options: MutationOptions,
    deps: Dependencies,
    notifier: Option<Notifier>,
}

impl<K: MutationKey> MutationActor<K> {
    pub fn new(
        key: Arc<K>,
        id: MutationId,
        options: MutationOptions,
        deps: Dependencies,
        notifier: Option<Notifier>,
    ) -> Self {
        Self {
            key,
            resource: id.into(),
            options,
            deps,
            notifier,
        }
    }

    async fn mutate(
        &self,
        ctx: &ActorContext<MutationModel<K::Data>, MutationCommand<K::Data, K::Variable>>,
        variable: K::Variable,
        revision: Revision,
    ) -> Result<Arc<K::Data>, CommandError> {
        if let Some(reason) = mutate_gate(&ctx.snapshot(), &self.options, revision) {
            return Err(CommandError::Skipped(reason));
        }

        ctx.dispatch(MutationAction::Mutating);

        let key = &self.key;
        let deps = &self.deps;
        let result = self
            .options
            .retry
            .run(ctx.cancel_token(), || key.mutate(&variable, deps))
            .await;

        let error = match result {
            Ok(data) => {
                let data = Arc::new(data);
                ctx.dispatch(MutationAction::MutateSuccess {
                    data: Arc::clone(&data),
                    updated_at: Instant::now(),
                });
                self.notify(&variable, &data);
                return Ok(data);
            }
            Err(RetryError::Cancelled) => return Err(CommandError::Cancelled),
            Err(RetryError::Failed { error, attempts }) => {
                debug!(key = %self.resource, attempts, "Mutation failed");
                ResourceError::new(error)
            }
        };

        ctx.dispatch(MutationAction::MutateFailure {
            error: error.clone(),
            updated_at: Instant::now(),
        });
        report_failure(ctx, &self.resource, &error, self.options.suppresses(&error));
        Err(CommandError::Failed(error))
    }

    fn notify(&self, variable: &K::Variable, data: &K::Data) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Some(effect) = self.key.on_query_update(variable, data) {
            debug!(key = %self.resource, "Applying query effect");
            notifier(effect);
        }
    }
}

/// Returns why a mutate must not run, if it must not.
fn mutate_gate<T>(
    model: &MutationModel<T>,
    options: &MutationOptions,
    revision: Revision,
) -> Option<SkipReason> {
    if options.is_one_shot && model.mutated_count > 0 {
        return Some(SkipReason::AlreadyMutated);
    }
    if options.is_strict_mode && model.revision != revision {
        return Some(SkipReason::RevisionMismatch);
    }
    if model.status == MutationStatus::Pending {
        return Some(SkipReason::Pending);
    }
    None
}

#[async_trait]
impl<K: MutationKey> Actor for MutationActor<K> {
    type Model = MutationModel<K::Data>;
    type Message = MutationCommand<K::Data, K::Variable>;

    fn name(&self) -> &str {
        "mutation"
    }

    async fn handle(
        &mut self,
        msg: Self::Message,
        ctx: &mut ActorContext<Self::Model, Self::Message>,
    ) -> Result<(), CommandError> {
        match msg {
            MutationCommand::Mutate {
                variable,
                revision,
                reply_to,
            } => {
                let result = self.mutate(ctx, variable, revision).await;
                complete(reply_to, &result);
                result.map(drop)
            }
            MutationCommand::Reset => {
                ctx.dispatch(MutationAction::Reset);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_model::{Reduce, ResourceView};
    use rstest::rstest;

    fn mutated() -> MutationModel<u32> {
        MutationModel::default().reduce(MutationAction::MutateSuccess {
            data: Arc::new(1),
            updated_at: Instant::now(),
        })
    }

    #[test]
    fn test_idle_mutation_runs() {
        let model = MutationModel::<u32>::default();
        assert_eq!(mutate_gate(&model, &MutationOptions::default(), model.revision), None);
    }

    #[rstest]
    #[case::one_shot(MutationOptions::default().one_shot(), Some(SkipReason::AlreadyMutated))]
    #[case::strict(MutationOptions::default().strict(), Some(SkipReason::RevisionMismatch))]
    #[case::relaxed(MutationOptions::default(), None)]
    fn test_gate_after_success(
        #[case] options: MutationOptions,
        #[case] expected: Option<SkipReason>,
    ) {
        let model = mutated();
        assert_eq!(mutate_gate(&model, &options, Revision::INITIAL), expected);
    }

    #[test]
    fn test_pending_mutation_is_rejected() {
        let model = MutationModel::<u32>::default().reduce(MutationAction::Mutating);
        assert!(model.is_pending());
        assert_eq!(
            mutate_gate(&model, &MutationOptions::default(), model.revision),
            Some(SkipReason::Pending)
        );
    }

    #[test]
    fn test_reset_allows_one_shot_again() {
        let model = mutated().reduce(MutationAction::Reset);
        let options = MutationOptions::default().one_shot();
        assert_eq!(mutate_gate(&model, &options, model.revision), None);
    }
}
