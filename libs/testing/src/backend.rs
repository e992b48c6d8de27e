//! In-memory backend that records how it is called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Call counters of a [`FakeBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub calls: u64,
    pub failures: u64,
    pub writes: u64,
}

struct Inner<V> {
    values: HashMap<String, V>,
    per_key: HashMap<String, u64>,

    /// Calls that fail before the backend answers normally again.
    fail_next: u32,
    failing: bool,
    failure_rate: f64,
    latency: Duration,
}

/// Shared in-memory store standing in for a remote API.
///
/// Clones share state, so a key can hold one clone while the test holds
/// another and inspects the counters.
pub struct FakeBackend<V> {
    inner: Arc<Mutex<Inner<V>>>,
    calls: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl<V> Clone for FakeBackend<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            calls: Arc::clone(&self.calls),
            failures: Arc::clone(&self.failures),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl<V: Clone + Send + 'static> Default for FakeBackend<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + 'static> FakeBackend<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                values: HashMap::new(),
                per_key: HashMap::new(),
                fail_next: 0,
                failing: false,
                failure_rate: 0.0,
                latency: Duration::ZERO,
            })),
            calls: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A backend that fails every call.
    pub fn failing() -> Self {
        let backend = Self::new();
        backend.set_failing(true);
        backend
    }

    /// A backend that fails each call with probability `rate`.
    pub fn flaky(rate: f64) -> Self {
        let backend = Self::new();
        backend.lock().failure_rate = rate.clamp(0.0, 1.0);
        backend
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(self, key: impl Into<String>, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style latency applied to every call.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.lock().values.insert(key.into(), value);
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Fail the next `count` calls, then answer normally.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Read `key`.
    pub async fn get(&self, key: &str) -> anyhow::Result<V> {
        let latency = self.enter(key)?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.lock()
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("not found: {key}"))
    }

    /// Write `value` under `key`, returning it.
    pub async fn put(&self, key: &str, value: V) -> anyhow::Result<V> {
        let latency = self.enter(key)?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock().values.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Count the call and decide whether it fails.
    fn enter(&self, key: &str) -> anyhow::Result<Duration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        *inner.per_key.entry(key.to_string()).or_default() += 1;

        let scheduled = inner.fail_next > 0;
        if scheduled {
            inner.fail_next -= 1;
        }
        let random = inner.failure_rate > 0.0 && rand::rng().random_bool(inner.failure_rate);
        if scheduled || random || inner.failing {
            self.failures.fetch_add(1, Ordering::SeqCst);
            debug!(key, "[FAKE] Backend call failed");
            anyhow::bail!("backend unavailable: {key}");
        }
        Ok(inner.latency)
    }

    /// Calls made for `key`.
    pub fn calls_for(&self, key: &str) -> u64 {
        self.lock().per_key.get(key).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            calls: self.calls.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }
}
