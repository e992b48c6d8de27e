//! Infinite queries, mutations and subscriptions through the client.

mod common;

use std::time::Duration;

use brook_engine::model::{MutationStatus, QueryChunk, SubscriberStatus, SubscriptionStatus};
use brook_engine::{CommandError, SkipReason};
use brook_testing::ManualSource;

use common::{client, settle, test_config, Backend, Feed, SaveTodo, Ticker};

const LINGER: Duration = Duration::from_secs(2);

fn pages() -> Backend {
    Backend::new()
        .with("page/1", 10)
        .with("page/2", 20)
        .with("page/3", 30)
}

fn params<T, S: Clone>(chunks: &[QueryChunk<T, S>]) -> Vec<S> {
    chunks.iter().map(|chunk| chunk.param.clone()).collect()
}

// =============================================================================
// Infinite query
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_load_more_appends_until_exhausted() {
    let backend = pages();
    let client = client(test_config(), &backend);

    let feed = client.infinite_query(Feed { last_page: 3 }).unwrap();
    assert!(!feed.has_more());

    let chunks = feed.resume().await.unwrap();
    assert_eq!(params(&chunks), vec![1]);
    assert!(feed.has_more());

    feed.load_more().await.unwrap();
    let chunks = feed.load_more().await.unwrap();
    assert_eq!(params(&chunks), vec![1, 2, 3]);
    assert_eq!(*chunks[2].data, 30);

    assert!(!feed.has_more());
    let err = feed.load_more().await.unwrap_err();
    assert!(matches!(err, CommandError::Skipped(SkipReason::NoData)));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_load_more_with_wrong_param_is_skipped() {
    let backend = pages();
    let client = client(test_config(), &backend);

    let feed = client.infinite_query(Feed { last_page: 3 }).unwrap();
    feed.resume().await.unwrap();

    let err = feed.load_more_with(3).await.unwrap_err();
    assert!(matches!(err, CommandError::Skipped(SkipReason::ParamMismatch)));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_refetches_every_loaded_chunk() {
    let backend = pages();
    let client = client(test_config(), &backend);

    let feed = client.infinite_query(Feed { last_page: 3 }).unwrap();
    feed.resume().await.unwrap();
    feed.load_more().await.unwrap();
    feed.load_more().await.unwrap();

    backend.insert("page/2", 21);
    let chunks = feed.invalidate().await.unwrap();

    assert_eq!(params(&chunks), vec![1, 2, 3]);
    assert_eq!(*chunks[1].data, 21);
    assert_eq!(backend.calls_for("page/1"), 2);
    assert_eq!(backend.calls_for("page/3"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_update_infinite_query_data() {
    let backend = pages();
    let client = client(test_config(), &backend);

    let feed = client.infinite_query(Feed { last_page: 3 }).unwrap();
    feed.resume().await.unwrap();

    let applied = client.update_infinite_query_data::<u32, u32, _>(feed.id(), |chunks| {
        chunks
            .iter()
            .map(|chunk| QueryChunk::new(*chunk.data + 1, chunk.param))
            .collect()
    });
    assert!(applied);
    settle().await;

    let chunks = feed.state().reply.unwrap();
    assert_eq!(*chunks[0].data, 11);
}

// =============================================================================
// Mutation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_mutation_records_reply_and_count() {
    let backend = Backend::new();
    let client = client(test_config(), &backend);

    let save = client.mutation(SaveTodo { n: 1 }).unwrap();
    assert!(save.state().is_idle());

    assert_eq!(*save.mutate(5).await.unwrap(), 5);
    assert_eq!(*save.mutate(6).await.unwrap(), 6);

    let state = save.state();
    assert_eq!(state.status, MutationStatus::Success);
    assert_eq!(state.mutated_count, 2);
    assert_eq!(state.reply.as_deref(), Some(&6));
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_mutation_runs_once() {
    let backend = Backend::new();
    let mut config = test_config();
    config.mutation = config.mutation.one_shot();
    let client = client(config, &backend);

    let save = client.mutation(SaveTodo { n: 1 }).unwrap();
    save.mutate(5).await.unwrap();
    let err = save.mutate(6).await.unwrap_err();

    assert!(matches!(err, CommandError::Skipped(SkipReason::AlreadyMutated)));
    assert_eq!(backend.stats().writes, 1);

    save.reset().await.unwrap();
    settle().await;
    assert!(save.state().is_idle());
    save.mutate(7).await.unwrap();
    assert_eq!(backend.stats().writes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mutation_rejects_outdated_revision() {
    let backend = Backend::new();
    let mut config = test_config();
    config.mutation = config.mutation.strict();
    let client = client(config, &backend);

    let save = client.mutation(SaveTodo { n: 1 }).unwrap();
    let observed = save.state().revision;
    save.mutate_at(5, observed).await.unwrap();

    let err = save.mutate_at(6, observed).await.unwrap_err();
    assert!(matches!(err, CommandError::Skipped(SkipReason::RevisionMismatch)));
    assert_eq!(backend.stats().writes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_reports_error() {
    let backend = Backend::failing();
    let client = client(test_config(), &backend);

    let save = client.mutation(SaveTodo { n: 1 }).unwrap();
    let err = save.mutate(5).await.unwrap_err();

    assert!(err.failure().is_some());
    let state = save.state();
    assert_eq!(state.status, MutationStatus::Failure);
    assert_eq!(state.mutated_count, 0);
    assert_eq!(backend.stats().writes, 0);
}

// =============================================================================
// Subscription
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_subscription_receives_source_items() {
    let source = ManualSource::new();
    let client = client(test_config(), &Backend::new());

    let ticker = client
        .subscription(Ticker {
            source: source.clone(),
        })
        .unwrap();
    assert_eq!(source.listeners(), 0);

    ticker.resume().await.unwrap();
    settle().await;
    assert_eq!(source.listeners(), 1);
    assert_eq!(ticker.state().subscriber_status, SubscriberStatus::Active);

    source.emit(1);
    source.emit(2);
    settle().await;

    let state = ticker.state();
    assert_eq!(state.status, SubscriptionStatus::Success);
    assert_eq!(state.reply.as_deref(), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_pushed_value_updates_subscription() {
    let source = ManualSource::new();
    let client = client(test_config(), &Backend::new());

    let ticker = client.subscription(Ticker { source }).unwrap();
    ticker.receive(9).await.unwrap();
    settle().await;

    assert_eq!(ticker.state().reply.as_deref(), Some(&9));
}

#[tokio::test(start_paused = true)]
async fn test_deactivated_subscription_is_frozen() {
    let source = ManualSource::new();
    let client = client(test_config(), &Backend::new());

    let ticker = client
        .subscription(Ticker {
            source: source.clone(),
        })
        .unwrap();
    ticker.resume().await.unwrap();
    settle().await;
    source.emit(3);
    settle().await;
    drop(ticker);

    tokio::time::sleep(LINGER).await;
    assert_eq!(source.listeners(), 0);
    let stats = client.stats();
    assert_eq!(stats.active_subscriptions, 0);
    assert_eq!(stats.cached_subscriptions, 1);

    let ticker = client
        .subscription(Ticker {
            source: source.clone(),
        })
        .unwrap();
    let state = ticker.state();
    assert_eq!(state.reply.as_deref(), Some(&3));
    assert_eq!(state.subscriber_status, SubscriberStatus::NoSubscribers);

    // Rehydrated subscriptions restart their source on resume.
    ticker.resume().await.unwrap();
    settle().await;
    assert_eq!(source.listeners(), 1);
}
