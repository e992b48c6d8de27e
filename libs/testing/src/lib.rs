//! # brook-testing
//!
//! Test doubles shared by the brook crates.
//!
//! - [`FakeBackend`]: an in-memory store that counts calls and can be told
//!   to fail, flake or lag
//! - [`ManualSource`]: a hand-driven event stream for triggers and
//!   subscriptions
//! - [`init_tracing`]: installs a test subscriber once per process

mod backend;
mod source;

pub use backend::{BackendStats, FakeBackend};
pub use source::ManualSource;

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber, filtered by `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        // Another harness may have installed a subscriber already.
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
