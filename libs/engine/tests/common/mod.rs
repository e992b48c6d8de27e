//! Keys and helpers shared by the engine integration tests.

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use brook_engine::model::QueryChunks;
use brook_engine::{
    query_effect, Client, Dependencies, EngineConfig, InfiniteQueryId, InfiniteQueryKey,
    MutationId, MutationKey, QueryEffect, QueryId, QueryKey, RetryPolicy, SubscriptionId,
    SubscriptionKey,
};
use brook_testing::{FakeBackend, ManualSource};
use futures_util::stream::{BoxStream, StreamExt};

pub type Backend = FakeBackend<u32>;

/// Config with fast retries and a short keep-alive.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    let retry = RetryPolicy::default()
        .with_count(0)
        .with_intervals(Duration::from_millis(10), Duration::from_millis(100));
    config.query.retry = retry.clone();
    config.subscription.retry = retry;
    config.query.keep_alive_time = Duration::from_secs(1);
    config.mutation.keep_alive_time = Duration::from_secs(1);
    config.subscription.keep_alive_time = Duration::from_secs(1);
    config.gc_flush_window = Duration::from_millis(100);
    config
}

pub fn client(config: EngineConfig, backend: &Backend) -> Client {
    brook_testing::init_tracing();
    Client::new(config, Dependencies::new().with(backend.clone())).unwrap()
}

/// Let every task run until it blocks on a timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =============================================================================
// Query
// =============================================================================

/// Reads `todo/{n}` from the backend.
pub struct Todo {
    pub n: u32,
    pub tag: &'static str,
}

impl Todo {
    pub fn new(n: u32) -> Self {
        Self { n, tag: "todo" }
    }

    pub fn tagged(n: u32, tag: &'static str) -> Self {
        Self { n, tag }
    }

    pub fn path(n: u32) -> String {
        format!("todo/{n}")
    }
}

#[async_trait]
impl QueryKey for Todo {
    type Data = u32;

    fn id(&self) -> QueryId {
        QueryId::new("todo").tag(self.n).tag(self.tag)
    }

    async fn fetch(&self, deps: &Dependencies) -> anyhow::Result<u32> {
        deps.require::<Backend>()?.get(&Self::path(self.n)).await
    }

    fn content_equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// Same id as [`Todo`] with a different data type.
pub struct TodoTitle(pub u32);

#[async_trait]
impl QueryKey for TodoTitle {
    type Data = String;

    fn id(&self) -> QueryId {
        Todo::new(self.0).id()
    }

    async fn fetch(&self, _deps: &Dependencies) -> anyhow::Result<String> {
        Ok(format!("todo {}", self.0))
    }
}

// =============================================================================
// Infinite query
// =============================================================================

/// Pages `page/{p}` from the backend; each page holds one number.
pub struct Feed {
    pub last_page: u32,
}

#[async_trait]
impl InfiniteQueryKey for Feed {
    type Data = u32;
    type Param = u32;

    fn id(&self) -> InfiniteQueryId {
        InfiniteQueryId::new("feed")
    }

    fn initial_param(&self) -> u32 {
        1
    }

    async fn fetch(&self, page: u32, deps: &Dependencies) -> anyhow::Result<u32> {
        deps.require::<Backend>()?.get(&format!("page/{page}")).await
    }

    fn load_more_param(&self, chunks: &QueryChunks<u32, u32>) -> Option<u32> {
        let last = chunks.last()?.param;
        (last < self.last_page).then_some(last + 1)
    }
}

// =============================================================================
// Mutation
// =============================================================================

/// Writes `todo/{n}` and invalidates the todo query.
pub struct SaveTodo {
    pub n: u32,
}

#[async_trait]
impl MutationKey for SaveTodo {
    type Data = u32;
    type Variable = u32;

    fn id(&self) -> MutationId {
        MutationId::new("save_todo").tag(self.n)
    }

    async fn mutate(&self, value: &u32, deps: &Dependencies) -> anyhow::Result<u32> {
        deps.require::<Backend>()?.put(&Todo::path(self.n), *value).await
    }

    fn on_query_update(&self, _value: &u32, _data: &u32) -> Option<QueryEffect> {
        let id = Todo::new(self.n).id();
        Some(query_effect(move |queries| {
            queries.invalidate_by(&[id.into()]);
        }))
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Streams numbers pushed into a [`ManualSource`].
pub struct Ticker {
    pub source: ManualSource<u32>,
}

#[async_trait]
impl SubscriptionKey for Ticker {
    type Data = u32;

    fn id(&self) -> SubscriptionId {
        SubscriptionId::new("ticker")
    }

    async fn subscribe(
        &self,
        _deps: &Dependencies,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<u32>>> {
        Ok(self.source.stream().map(Ok).boxed())
    }
}
