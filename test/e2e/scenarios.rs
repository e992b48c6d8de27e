//! End-to-end scenarios through the public client API.
//!
//! Each scenario runs on a paused clock against an in-memory backend:
//!
//! - A: a query with zero stale time refetches on every connect
//! - B: revalidating a three-chunk infinite query refetches every page in order
//! - C: a one-shot mutation rejects its second run without calling the backend
//! - D: a released query is rehydrated from the cache until its gc time passes
//!
//! ## Running
//!
//! ```bash
//! cargo test -p brook-e2e --test scenarios
//! ```

use std::time::Duration;

use async_trait::async_trait;
use brook_engine::model::{MutationStatus, QueryChunks, QueryStatus, ResourceView};
use brook_engine::{
    Client, CommandError, Dependencies, EngineConfig, InfiniteQueryId, InfiniteQueryKey,
    MutationId, MutationKey, QueryId, QueryKey, SkipReason,
};
use brook_testing::FakeBackend;
use tracing::info;

type Numbers = FakeBackend<u32>;
type Pages = FakeBackend<Page>;

/// One page as the server sends it.
#[derive(Debug, Clone, PartialEq)]
struct Page {
    items: Vec<u32>,
    has_next: bool,
}

fn page_path(param: u32) -> String {
    format!("page/{param}")
}

/// Keep-alive plus the deactivation flush window.
fn linger(config: &EngineConfig) -> Duration {
    config.query.keep_alive_time + config.gc_flush_window * 2
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.query.keep_alive_time = Duration::from_secs(1);
    config.query.retry = config.query.retry.clone().with_count(0);
    config.gc_flush_window = Duration::from_millis(100);
    config
}

fn client(config: EngineConfig, deps: Dependencies) -> Client {
    brook_testing::init_tracing();
    Client::new(config, deps).unwrap()
}

// =============================================================================
// Keys
// =============================================================================

struct Counter;

#[async_trait]
impl QueryKey for Counter {
    type Data = u32;

    fn id(&self) -> QueryId {
        QueryId::new("counter")
    }

    async fn fetch(&self, deps: &Dependencies) -> anyhow::Result<u32> {
        deps.require::<Numbers>()?.get("counter").await
    }

    fn content_equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// Pages numbered from zero; the server says when there is no next page.
struct Catalog;

#[async_trait]
impl InfiniteQueryKey for Catalog {
    type Data = Page;
    type Param = u32;

    fn id(&self) -> InfiniteQueryId {
        InfiniteQueryId::new("catalog")
    }

    fn initial_param(&self) -> u32 {
        0
    }

    async fn fetch(&self, param: u32, deps: &Dependencies) -> anyhow::Result<Page> {
        deps.require::<Pages>()?.get(&page_path(param)).await
    }

    fn load_more_param(&self, chunks: &QueryChunks<Page, u32>) -> Option<u32> {
        let last = chunks.last()?;
        last.data.has_next.then_some(last.param + 1)
    }
}

struct Checkout;

#[async_trait]
impl MutationKey for Checkout {
    type Data = u32;
    type Variable = u32;

    fn id(&self) -> MutationId {
        MutationId::new("checkout")
    }

    async fn mutate(&self, order: &u32, deps: &Dependencies) -> anyhow::Result<u32> {
        deps.require::<Numbers>()?.put("order", *order).await
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scenario_a_zero_stale_time_refetches() {
    let backend = Numbers::new().with("counter", 1);
    let mut config = config();
    config.query.stale_time = Duration::ZERO;
    let client = client(config, Dependencies::new().with(backend.clone()));

    let counter = client.query(Counter).unwrap();
    assert_eq!(*counter.connect(None).await.unwrap(), 1);
    assert_eq!(backend.calls(), 1);
    assert_eq!(counter.state().status, QueryStatus::Success);

    let revision = counter.state().revision;
    assert_eq!(*counter.connect(Some(revision)).await.unwrap(), 1);
    assert_eq!(backend.calls(), 2);

    // Same content: the revision does not move.
    assert_eq!(counter.state().revision, revision);
    info!("scenario A passed");
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_infinite_revalidation_keeps_three_chunks() {
    let backend = Pages::new()
        .with(page_path(0), Page { items: vec![1, 2], has_next: true })
        .with(page_path(1), Page { items: vec![3, 4], has_next: true })
        .with(page_path(2), Page { items: vec![5], has_next: false });
    let client = client(config(), Dependencies::new().with(backend.clone()));

    let catalog = client.infinite_query(Catalog).unwrap();
    catalog.resume().await.unwrap();
    catalog.load_more().await.unwrap();
    let chunks = catalog.load_more().await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(!catalog.has_more());

    // The server now holds a fourth page, but page 2 still says it is last.
    backend.insert(page_path(3), Page { items: vec![6], has_next: false });
    backend.insert(page_path(1), Page { items: vec![3, 4, 4], has_next: true });

    let chunks = catalog.invalidate().await.unwrap();
    let params: Vec<u32> = chunks.iter().map(|chunk| chunk.param).collect();
    assert_eq!(params, vec![0, 1, 2]);
    assert_eq!(chunks[1].data.items, vec![3, 4, 4]);
    for param in 0..3 {
        assert_eq!(backend.calls_for(&page_path(param)), 2);
    }
    assert_eq!(backend.calls_for(&page_path(3)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_revalidation_stops_when_server_ends_early() {
    let backend = Pages::new()
        .with(page_path(0), Page { items: vec![1], has_next: true })
        .with(page_path(1), Page { items: vec![2], has_next: true })
        .with(page_path(2), Page { items: vec![3], has_next: false });
    let client = client(config(), Dependencies::new().with(backend.clone()));

    let catalog = client.infinite_query(Catalog).unwrap();
    catalog.resume().await.unwrap();
    catalog.load_more().await.unwrap();
    catalog.load_more().await.unwrap();

    // Page 1 is now the last one.
    backend.insert(page_path(1), Page { items: vec![2], has_next: false });
    let chunks = catalog.invalidate().await.unwrap();

    assert_eq!(chunks.len(), 2);
    assert_eq!(backend.calls_for(&page_path(2)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_one_shot_mutation() {
    let backend = Numbers::new();
    let mut config = config();
    config.mutation = config.mutation.one_shot();
    let client = client(config, Dependencies::new().with(backend.clone()));

    let checkout = client.mutation(Checkout).unwrap();
    assert_eq!(*checkout.mutate(7).await.unwrap(), 7);

    let err = checkout.mutate(8).await.unwrap_err();
    assert!(matches!(err, CommandError::Skipped(SkipReason::AlreadyMutated)));
    assert!(err.is_cancellation());

    let state = checkout.state();
    assert_eq!(state.status, MutationStatus::Success);
    assert_eq!(state.mutated_count, 1);
    assert_eq!(state.reply.as_deref(), Some(&7));
    assert_eq!(backend.stats().writes, 1);
    assert_eq!(backend.calls_for("order"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_freeze_and_rehydrate_within_gc_time() {
    let backend = Numbers::new().with("counter", 3);
    let mut config = config();
    config.query.stale_time = Duration::from_secs(60);
    config.query.gc_time = Duration::from_secs(5);
    let wait = linger(&config);
    let client = client(config, Dependencies::new().with(backend.clone()));

    let counter = client.query(Counter).unwrap();
    counter.resume().await.unwrap();
    let revision = counter.state().revision;
    drop(counter);

    // Deactivated and frozen.
    tokio::time::sleep(wait).await;
    let stats = client.stats();
    assert_eq!(stats.active_queries, 0);
    assert_eq!(stats.cached_queries, 1);

    // Within gc time: same data, no fetch.
    let counter = client.query(Counter).unwrap();
    let state = counter.state();
    assert_eq!(state.reply.as_deref(), Some(&3));
    assert_eq!(state.revision, revision);
    assert_eq!(*counter.resume().await.unwrap(), 3);
    assert_eq!(backend.calls(), 1);
    drop(counter);

    // Frozen again; let it expire.
    tokio::time::sleep(wait).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.evict(), 1);
    assert_eq!(client.stats().cached_queries, 0);

    let counter = client.query(Counter).unwrap();
    let state = counter.state();
    assert!(state.reply.is_none());
    assert!(state.is_pending());
    assert_eq!(*counter.resume().await.unwrap(), 3);
    assert_eq!(backend.calls(), 2);
}
