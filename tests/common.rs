#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tailstore::{
    EmbeddedEventStore, Error, EventData, EventStorage, EventStream, InMemoryStorage, Result,
    StoreConfig, TrackedEvent, TrackedEventStream, TrackingToken,
};

/// Installs a test-writer tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A config with delays short enough for tests: the producer retries every
/// 25 ms, the cleaner sweeps every 100 ms.
pub fn fast_config(cached_events: u64) -> StoreConfig {
    StoreConfig::new()
        .with_cached_events(cached_events)
        .with_fetch_delay(Duration::from_millis(25))
        .with_cleanup_delay(Duration::from_millis(100))
}

/// A store over a fresh in-memory engine whose blocking reads idle 20 ms.
pub fn in_memory_store(config: StoreConfig) -> EmbeddedEventStore {
    init_tracing();
    let storage = Arc::new(InMemoryStorage::with_block_wait(Duration::from_millis(20)));
    EmbeddedEventStore::with_config(storage, config)
}

/// Publishes `count` events in one batch.
pub async fn publish_batch(store: &EmbeddedEventStore, count: usize) -> Vec<TrackedEvent> {
    let events = (0..count)
        .map(|i| EventData::new(format!("event-{i}").into_bytes()))
        .collect();
    store.publish(events).await.expect("publish batch")
}

/// Publishes `count` events one commit at a time.
pub async fn publish_each(store: &EmbeddedEventStore, count: usize) {
    for i in 0..count {
        store
            .publish(vec![EventData::new(format!("event-{i}").into_bytes())])
            .await
            .expect("publish event");
    }
}

/// Consumes the next event, panicking if it does not arrive within 10 s.
pub async fn next_token(stream: &mut EventStream) -> u64 {
    tokio::time::timeout(Duration::from_secs(10), stream.next_available())
        .await
        .expect("event should arrive well before the guard timeout")
        .expect("stream should deliver an event")
        .token()
        .as_raw()
}

/// Consumes the next `count` events and returns their tokens.
pub async fn collect_tokens(stream: &mut EventStream, count: usize) -> Vec<u64> {
    let mut tokens = Vec::with_capacity(count);
    for _ in 0..count {
        tokens.push(next_token(stream).await);
    }
    tokens
}

/// Drives a fresh subscriber through its (empty) private catch-up so it
/// joins the tail. Returns whether an event was already waiting.
pub async fn attach(stream: &mut EventStream) -> bool {
    stream
        .has_next_available(Duration::from_millis(50))
        .await
        .expect("attach probe")
}

// =============================================================================
// Flaky Storage
// =============================================================================

/// A storage engine whose every other *blocking* read fails immediately.
/// Private (non-blocking) consumer reads and appends pass through, so the
/// failures land exactly on the producer's fetch path.
pub struct FlakyStorage {
    inner: InMemoryStorage,
    blocking_reads: AtomicU64,
}

impl FlakyStorage {
    pub fn new(block_wait: Duration) -> Self {
        Self {
            inner: InMemoryStorage::with_block_wait(block_wait),
            blocking_reads: AtomicU64::new(0),
        }
    }

    pub fn blocking_reads(&self) -> u64 {
        self.blocking_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStorage for FlakyStorage {
    fn read_events(&self, after: Option<TrackingToken>, may_block: bool) -> TrackedEventStream {
        if may_block {
            let attempt = self.blocking_reads.fetch_add(1, Ordering::SeqCst);
            if attempt % 2 == 1 {
                return Box::pin(stream::once(async {
                    Err(Error::storage("injected read failure"))
                }));
            }
        }
        self.inner.read_events(after, may_block)
    }

    async fn append_events(&self, events: Vec<EventData>) -> Result<Vec<TrackedEvent>> {
        self.inner.append_events(events).await
    }
}
