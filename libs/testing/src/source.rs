//! Hand-driven event streams.

use std::fmt;

use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Broadcasts events to every stream opened from it.
///
/// Each call to [`stream`](Self::stream) sees the events emitted after it was
/// opened. Lagged receivers skip what they missed.
#[derive(Clone)]
pub struct ManualSource<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> Default for ManualSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> ManualSource<E> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Send `event` to every open stream. Returns how many received it.
    pub fn emit(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn stream(&self) -> BoxStream<'static, E> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| async move { item.ok() })
            .boxed()
    }

    /// A factory that opens a new stream per call.
    pub fn opener(&self) -> impl Fn() -> BoxStream<'static, E> + Send + Sync + Clone + 'static {
        let source = self.clone();
        move || source.stream()
    }

    /// Number of streams currently open.
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E> fmt::Debug for ManualSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSource")
            .field("listeners", &self.tx.receiver_count())
            .finish()
    }
}
