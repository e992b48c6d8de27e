//! Synthetic resources backed by an in-memory store.

use async_trait::async_trait;
use brook_engine::model::QueryChunks;
use brook_engine::{
    query_effect, Dependencies, InfiniteQueryId, InfiniteQueryKey, MutationId, MutationKey,
    QueryEffect, QueryId, QueryKey, SubscriptionId, SubscriptionKey,
};
use brook_testing::{FakeBackend, ManualSource};
use futures_util::stream::{BoxStream, StreamExt};

pub type Store = FakeBackend<u64>;

/// Number of buckets items are grouped into for batch invalidation.
pub const BUCKETS: u32 = 4;

pub fn item_path(n: u32) -> String {
    format!("item/{n}")
}

pub fn bucket_tag(bucket: u32) -> String {
    format!("bucket-{bucket}")
}

/// Seed `count` items and `pages` feed pages.
pub fn seeded_store(count: u32, pages: u32) -> Store {
    let store = Store::new();
    for n in 0..count {
        store.insert(item_path(n), u64::from(n));
    }
    for page in 1..=pages {
        store.insert(format!("page/{page}"), u64::from(page) * 100);
    }
    store
}

/// A single item.
#[derive(Debug, Clone, Copy)]
pub struct Item(pub u32);

#[async_trait]
impl QueryKey for Item {
    type Data = u64;

    fn id(&self) -> QueryId {
        QueryId::new("item")
            .tag(self.0)
            .tag(bucket_tag(self.0 % BUCKETS))
    }

    async fn fetch(&self, deps: &Dependencies) -> anyhow::Result<u64> {
        deps.require::<Store>()?.get(&item_path(self.0)).await
    }

    fn content_equals(&self, a: &u64, b: &u64) -> bool {
        a == b
    }
}

/// Pages of the feed, one number per page.
#[derive(Debug, Clone, Copy)]
pub struct Feed {
    pub pages: u32,
}

#[async_trait]
impl InfiniteQueryKey for Feed {
    type Data = u64;
    type Param = u32;

    fn id(&self) -> InfiniteQueryId {
        InfiniteQueryId::new("feed")
    }

    fn initial_param(&self) -> u32 {
        1
    }

    async fn fetch(&self, page: u32, deps: &Dependencies) -> anyhow::Result<u64> {
        deps.require::<Store>()?.get(&format!("page/{page}")).await
    }

    fn load_more_param(&self, chunks: &QueryChunks<u64, u32>) -> Option<u32> {
        let last = chunks.last()?.param;
        (last < self.pages).then_some(last + 1)
    }
}

/// Overwrites an item and invalidates its query.
#[derive(Debug, Clone, Copy)]
pub struct SetItem(pub u32);

#[async_trait]
impl MutationKey for SetItem {
    type Data = u64;
    type Variable = u64;

    fn id(&self) -> MutationId {
        MutationId::new("set_item").tag(self.0)
    }

    async fn mutate(&self, value: &u64, deps: &Dependencies) -> anyhow::Result<u64> {
        deps.require::<Store>()?.put(&item_path(self.0), *value).await
    }

    fn on_query_update(&self, _value: &u64, _data: &u64) -> Option<QueryEffect> {
        let id = Item(self.0).id();
        Some(query_effect(move |queries| {
            queries.invalidate_by(&[id.into()]);
        }))
    }
}

/// Ticks pushed by hand.
#[derive(Debug, Clone)]
pub struct Clock {
    pub ticks: ManualSource<u64>,
}

#[async_trait]
impl SubscriptionKey for Clock {
    type Data = u64;

    fn id(&self) -> SubscriptionId {
        SubscriptionId::new("clock")
    }

    async fn subscribe(
        &self,
        _deps: &Dependencies,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<u64>>> {
        Ok(self.ticks.stream().map(Ok).boxed())
    }

    fn content_equals(&self, a: &u64, b: &u64) -> bool {
        a == b
    }
}
