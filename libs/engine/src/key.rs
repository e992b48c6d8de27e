//! Key traits: how users declare resources.
//!
//! A key names a resource (through its typed id) and supplies the async
//! callable that produces its data. Callables receive the client's
//! [`Dependencies`] explicitly and may be invoked many times (retries,
//! revalidation), so they take `&self`.

use std::fmt::Debug;

use async_trait::async_trait;
use brook_id::{InfiniteQueryId, MutationId, QueryId, SubscriptionId};
use brook_model::{QueryChunks, ResourceError};
use futures_util::stream::BoxStream;

use crate::deps::Dependencies;
use crate::effects::QueryEffect;
use crate::options::{MutationOptions, QueryOptions, SubscriptionOptions};

/// A single-value query.
#[async_trait]
pub trait QueryKey: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    fn id(&self) -> QueryId;

    async fn fetch(&self, deps: &Dependencies) -> anyhow::Result<Self::Data>;

    /// Returns true if two replies carry the same content.
    ///
    /// Equal replies keep the existing value and its timestamp.
    fn content_equals(&self, _a: &Self::Data, _b: &Self::Data) -> bool {
        false
    }

    /// Placeholder data used when the query is created without cached state.
    fn initial_data(&self, _deps: &Dependencies) -> Option<Self::Data> {
        None
    }

    /// Turn a terminal failure into synthetic data.
    fn recover(&self, _error: &ResourceError) -> Option<Self::Data> {
        None
    }

    /// Adjust the resolved options for this key.
    fn on_configure(&self, options: QueryOptions) -> QueryOptions {
        options
    }
}

/// A paginated query made of ordered chunks.
#[async_trait]
pub trait InfiniteQueryKey: Send + Sync + 'static {
    type Data: Send + Sync + 'static;
    type Param: Clone + PartialEq + Debug + Send + Sync + 'static;

    fn id(&self) -> InfiniteQueryId;

    /// Parameter of the first page.
    fn initial_param(&self) -> Self::Param;

    async fn fetch(&self, param: Self::Param, deps: &Dependencies) -> anyhow::Result<Self::Data>;

    /// Parameter of the page after `chunks`, or `None` if there are no more.
    fn load_more_param(&self, chunks: &QueryChunks<Self::Data, Self::Param>) -> Option<Self::Param>;

    fn content_equals(
        &self,
        _a: &QueryChunks<Self::Data, Self::Param>,
        _b: &QueryChunks<Self::Data, Self::Param>,
    ) -> bool {
        false
    }

    fn initial_data(&self, _deps: &Dependencies) -> Option<QueryChunks<Self::Data, Self::Param>> {
        None
    }

    fn recover(&self, _error: &ResourceError) -> Option<QueryChunks<Self::Data, Self::Param>> {
        None
    }

    fn on_configure(&self, options: QueryOptions) -> QueryOptions {
        options
    }
}

/// A mutation.
#[async_trait]
pub trait MutationKey: Send + Sync + 'static {
    type Data: Send + Sync + 'static;
    type Variable: Send + Sync + 'static;

    fn id(&self) -> MutationId;

    async fn mutate(
        &self,
        variable: &Self::Variable,
        deps: &Dependencies,
    ) -> anyhow::Result<Self::Data>;

    /// Side effect on queries after a successful mutation.
    fn on_query_update(
        &self,
        _variable: &Self::Variable,
        _data: &Self::Data,
    ) -> Option<QueryEffect> {
        None
    }

    fn on_configure(&self, options: MutationOptions) -> MutationOptions {
        options
    }
}

/// A subscription to a stream of values.
#[async_trait]
pub trait SubscriptionKey: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    fn id(&self) -> SubscriptionId;

    /// Open the source. Item errors restart it under the retry policy.
    async fn subscribe(
        &self,
        deps: &Dependencies,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<Self::Data>>>;

    fn content_equals(&self, _a: &Self::Data, _b: &Self::Data) -> bool {
        false
    }

    fn initial_data(&self, _deps: &Dependencies) -> Option<Self::Data> {
        None
    }

    fn recover(&self, _error: &ResourceError) -> Option<Self::Data> {
        None
    }

    fn on_configure(&self, options: SubscriptionOptions) -> SubscriptionOptions {
        options
    }
}
