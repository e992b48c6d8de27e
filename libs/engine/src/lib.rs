//! # brook-engine
//!
//! Client-side resource engine: queries, infinite queries, mutations and
//! subscriptions, each owned by an actor and cached when no longer used.
//!
//! ## Architecture
//!
//! ```text
//! Client
//! ├── Registry        (active slots + frozen-model caches, one lock)
//! │   ├── QueryActor(id)
//! │   ├── InfiniteQueryActor(id)
//! │   ├── MutationActor(id)
//! │   └── SubscriptionActor(id)
//! ├── Collector       (batches deactivations)
//! ├── Triggers        (network / focus / memory observers)
//! └── ErrorRelay      (broadcast of terminal failures)
//! ```
//!
//! ## Design Principles
//!
//! - **Explicit context**: configuration and dependencies are passed to
//!   [`Client::new`]; there is no global client
//! - **Single writer**: only a resource's actor changes its model
//! - **Refs keep resources alive**: the last dropped ref arms a keep-alive,
//!   after which the model is frozen into a time-based cache
//! - **Failures are state**: a failed fetch is recorded in the model and
//!   additionally broadcast on the error relay
//!
//! ## Modules
//!
//! - `actors`: actor framework and the four resource actors
//! - `client`: [`Client`] and its builder
//! - `filter`: predicates for batch operations
//! - `key`: traits users implement to declare resources
//! - `refs`: typed references returned by the client
//! - `triggers`: network, focus and memory-pressure revalidation

pub mod actors;
pub mod client;
pub mod config;
pub mod deps;
pub mod effects;
pub mod error;
pub mod filter;
pub mod key;
pub mod options;
pub mod refs;
pub mod relay;
pub mod resource;
pub mod triggers;

mod registry;

pub use client::{Client, ClientBuilder};
pub use config::{ConfigError, EngineConfig};
pub use deps::Dependencies;
pub use effects::{query_effect, QueryEffect, QueryEffects};
pub use error::{CommandError, EngineError, SkipReason};
pub use filter::{Filter, FilterScope, QueryFilter, SubscriptionFilter};
pub use key::{InfiniteQueryKey, MutationKey, QueryKey, SubscriptionKey};
pub use options::{MutationOptions, QueryOptions, SubscriptionOptions};
pub use refs::{InfiniteQueryRef, MutationRef, QueryRef, SubscriptionRef};
pub use registry::RegistryStats;
pub use relay::{ErrorRecord, ErrorRelay, RelayPolicy};
pub use resource::{ResourceKey, ResourceKind};
pub use triggers::{
    EventSource, EventSources, MemoryPressure, MountGuard, NetworkEvent, TriggerConfig,
    WindowEvent,
};

pub use brook_id::{InfiniteQueryId, MutationId, QueryId, SubscriptionId, UniqueId};
pub use brook_model as model;
pub use brook_retry::RetryPolicy;
