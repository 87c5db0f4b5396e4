//! # Embedded Event Store
//!
//! The public facade: it multiplexes any number of live event-stream
//! subscribers over a single backing [`EventStorage`] engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       EmbeddedEventStore                        │
//! │                                                                 │
//! │   publish ──▶ storage.append_events ──▶ after_commit            │
//! │                                             │ wake              │
//! │                                             ▼                   │
//! │   ┌──────────┐  read_events(tip, block)  ┌──────────┐           │
//! │   │ storage  │ ────────────────────────▶ │ producer │ (1 task)  │
//! │   └──────────┘                           └────┬─────┘           │
//! │        ▲                                      │ append + notify │
//! │        │ read_events(last, no block)          ▼                 │
//! │        │                         oldest ─▶ ▣ ─▶ ▣ ─▶ ▣ newest   │
//! │   ┌────┴─────┐                        ▲    tailing cache        │
//! │   │ consumer │ (private catch-up)     │                         │
//! │   └──────────┘ ──────────────────────▶ walks forward links      │
//! │                        rejoin                                   │
//! │                                          ┌─────────┐            │
//! │                                          │ cleaner │ (periodic) │
//! │                                          └─────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The producer task is started lazily, the first time a consumer joins the
//! tailing set (at subscription when its start token is still cached, or
//! when a private catch-up stream dries up and the consumer rejoins the
//! tail). The cleaner task starts alongside it.
//!
//! Nothing here persists anything: a crash loses cached nodes, never durable
//! events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::TailingCache;
use crate::cleaner;
use crate::consumer::{ConsumerState, EventStream};
use crate::error::{Error, Result};
use crate::producer;
use crate::storage::EventStorage;
use crate::types::{EventData, TrackedEvent, TrackingToken};

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs for an [`EmbeddedEventStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of events retained in the tailing cache.
    pub cached_events: u64,

    /// Maximum idle interval for the producer between storage probes. A
    /// commit wakes the producer sooner; this bounds the sleep when no
    /// wake-up arrives.
    pub fetch_delay: Duration,

    /// Period of the cleaner task that detaches consumers fallen behind the
    /// cache window.
    pub cleanup_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cached_events: 10_000,
            fetch_delay: Duration::from_millis(1000),
            cleanup_delay: Duration::from_millis(10_000),
        }
    }
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache capacity.
    pub fn with_cached_events(mut self, cached_events: u64) -> Self {
        self.cached_events = cached_events;
        self
    }

    /// Sets the producer's maximum idle interval.
    pub fn with_fetch_delay(mut self, fetch_delay: Duration) -> Self {
        self.fetch_delay = fetch_delay;
        self
    }

    /// Sets the cleaner period.
    pub fn with_cleanup_delay(mut self, cleanup_delay: Duration) -> Self {
        self.cleanup_delay = cleanup_delay;
        self
    }
}

// =============================================================================
// Shared Core
// =============================================================================

/// State shared between the store facade, the producer task, the cleaner
/// task, and every consumer handle.
///
/// Locking discipline: the tailing registry mutex guards only membership
/// reads and writes; it is never held across storage I/O or an await point.
/// The cache roots and per-consumer positions are lock-free snapshots.
pub(crate) struct Shared {
    storage: Arc<dyn EventStorage>,
    config: StoreConfig,
    cache: TailingCache,

    /// Consumers currently believed to be at or near the tail. Advisory:
    /// the authoritative tailing check also verifies the consumer has not
    /// fallen behind `oldest`.
    tailing: Mutex<Vec<Arc<ConsumerState>>>,

    /// Signalled by the producer after each appended node; awaited by
    /// consumers on the global path.
    consumer_wakeups: Notify,

    /// Signalled by `wake_producer`; awaited by the idle producer.
    producer_wakeups: Notify,

    /// Flag half of the producer's lost-wakeup protocol: set before the
    /// signal, re-checked after registering the wait.
    should_fetch: AtomicBool,

    producer_started: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<TaskHandles>,
}

#[derive(Default)]
struct TaskHandles {
    producer: Option<JoinHandle<()>>,
    cleaner: Option<JoinHandle<()>>,
}

impl Shared {
    fn new(storage: Arc<dyn EventStorage>, config: StoreConfig) -> Self {
        Self {
            cache: TailingCache::new(config.cached_events),
            storage,
            config,
            tailing: Mutex::new(Vec::new()),
            consumer_wakeups: Notify::new(),
            producer_wakeups: Notify::new(),
            should_fetch: AtomicBool::new(false),
            producer_started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(TaskHandles::default()),
        }
    }

    pub(crate) fn storage(&self) -> &dyn EventStorage {
        self.storage.as_ref()
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> &TailingCache {
        &self.cache
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Tailing registry
    // -------------------------------------------------------------------------

    pub(crate) fn join_tailing(&self, state: &Arc<ConsumerState>) {
        let mut tailing = self.tailing.lock();
        if !tailing.iter().any(|other| Arc::ptr_eq(other, state)) {
            tailing.push(Arc::clone(state));
        }
    }

    pub(crate) fn leave_tailing(&self, state: &Arc<ConsumerState>) {
        self.tailing.lock().retain(|other| !Arc::ptr_eq(other, state));
    }

    pub(crate) fn is_tailing_registered(&self, state: &Arc<ConsumerState>) -> bool {
        self.tailing.lock().iter().any(|other| Arc::ptr_eq(other, state))
    }

    pub(crate) fn has_tailing_consumers(&self) -> bool {
        !self.tailing.lock().is_empty()
    }

    /// Snapshot of the registry, for iteration without holding the lock.
    pub(crate) fn tailing_snapshot(&self) -> Vec<Arc<ConsumerState>> {
        self.tailing.lock().clone()
    }

    fn detach_all_tailing(&self) {
        let drained = std::mem::take(&mut *self.tailing.lock());
        for state in drained {
            state.clear_last_node();
        }
    }

    // -------------------------------------------------------------------------
    // Producer coordination
    // -------------------------------------------------------------------------

    /// The position the producer should read after: the cache tip, or, when
    /// nothing is cached yet, the slowest tailing consumer's position. A
    /// consumer that has seen nothing (`None`) sorts first and makes the
    /// producer read from the very beginning.
    pub(crate) fn last_token(&self) -> Option<TrackingToken> {
        if let Some(newest) = self.cache.newest() {
            return Some(newest.token());
        }
        self.tailing
            .lock()
            .iter()
            .map(|state| state.last_token())
            .min()
            .flatten()
    }

    /// Wakes the producer for an immediate fetch. Flag before signal, so a
    /// wake that races the producer's own re-check is never lost.
    pub(crate) fn wake_producer(&self) {
        self.should_fetch.store(true, Ordering::SeqCst);
        self.producer_wakeups.notify_waiters();
    }

    pub(crate) fn producer_wakeups(&self) -> &Notify {
        &self.producer_wakeups
    }

    pub(crate) fn take_should_fetch(&self) -> bool {
        self.should_fetch.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set_should_fetch(&self) {
        self.should_fetch.store(true, Ordering::SeqCst);
    }

    pub(crate) fn should_fetch(&self) -> bool {
        self.should_fetch.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Consumer coordination
    // -------------------------------------------------------------------------

    pub(crate) fn consumer_wakeups(&self) -> &Notify {
        &self.consumer_wakeups
    }

    pub(crate) fn notify_consumers(&self) {
        self.consumer_wakeups.notify_waiters();
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Starts the producer and cleaner tasks exactly once, on the first
    /// tailing join.
    pub(crate) fn ensure_producer_started(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        if self
            .producer_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("starting event producer and cleaner tasks");
            let producer = tokio::spawn(producer::run(Arc::clone(self)));
            let cleaner = tokio::spawn(cleaner::run(Arc::clone(self)));
            let mut tasks = self.tasks.lock();
            tasks.producer = Some(producer);
            tasks.cleaner = Some(cleaner);
        }
    }
}

// =============================================================================
// EmbeddedEventStore
// =============================================================================

/// An embedded event store facade over a single [`EventStorage`] engine.
///
/// Any number of concurrent subscribers can each read the global,
/// totally-ordered event stream from an arbitrary starting position,
/// including events appended after the subscription begins, without each
/// subscriber polling storage on its own. Subscribers near the tail share
/// one in-memory cache fed by a single background producer; subscribers far
/// behind catch up through a private storage stream and rejoin the tail.
///
/// # Example
///
/// ```rust,ignore
/// let store = EmbeddedEventStore::new(Arc::new(InMemoryStorage::new()));
///
/// let mut stream = store.stream_events(None);
/// store.publish(vec![EventData::new(b"hello".to_vec())]).await?;
///
/// let event = stream.next_available().await?;
/// assert_eq!(event.token().as_raw(), 1);
/// ```
///
/// The store must be used inside a tokio runtime; its background tasks are
/// spawned on the ambient runtime.
pub struct EmbeddedEventStore {
    pub(crate) shared: Arc<Shared>,
}

impl EmbeddedEventStore {
    /// Creates a store with the default configuration.
    pub fn new(storage: Arc<dyn EventStorage>) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    /// Creates a store with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if `config.cached_events` is zero.
    pub fn with_config(storage: Arc<dyn EventStorage>, config: StoreConfig) -> Self {
        assert!(config.cached_events >= 1, "cached_events must be at least 1");
        Self {
            shared: Arc::new(Shared::new(storage, config)),
        }
    }

    /// Opens a stream of every event positioned strictly after `start`
    /// (`None` reads from the very beginning), in token order, including
    /// events committed after this call.
    ///
    /// Lazy: no storage I/O happens here. If `start` is still inside the
    /// cache window the stream begins tailing immediately; otherwise its
    /// first read opens a private catch-up stream against storage.
    pub fn stream_events(&self, start: Option<TrackingToken>) -> EventStream {
        let shared = Arc::clone(&self.shared);
        match shared.cache().find_node(start) {
            Some(node) => {
                let state = Arc::new(ConsumerState::at_node(&node));
                shared.join_tailing(&state);
                shared.ensure_producer_started();
                EventStream::new(shared, state)
            }
            None => {
                let state = Arc::new(ConsumerState::from_token(start));
                EventStream::new(shared, state)
            }
        }
    }

    /// Appends events through the storage engine and notifies the producer
    /// of the commit. Returns the stored events with their assigned tokens.
    pub async fn publish(&self, events: Vec<EventData>) -> Result<Vec<TrackedEvent>> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }
        let stored = self.shared.storage().append_events(events).await?;
        self.after_commit();
        Ok(stored)
    }

    /// The commit notification edge: wakes the producer so freshly committed
    /// events reach tailing consumers without waiting out the fetch delay.
    ///
    /// Call this after appending through the storage engine directly. No-op
    /// on a closed store.
    pub fn after_commit(&self) {
        if self.shared.is_closed() {
            return;
        }
        self.shared.wake_producer();
    }

    /// Shuts the store down: detaches every tailing consumer, stops the
    /// producer (closing its in-flight storage stream), and cancels the
    /// cleaner. Idempotent.
    ///
    /// Consumers blocked in `next_available` are woken and observe
    /// [`Error::Closed`]; `peek` and `has_next_available` report empty.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("shutting down embedded event store");
        self.shared.detach_all_tailing();
        self.shared.notify_consumers();
        self.shared.wake_producer();

        let (producer, cleaner) = {
            let mut tasks = self.shared.tasks.lock();
            (tasks.producer.take(), tasks.cleaner.take())
        };
        if let Some(cleaner) = cleaner {
            cleaner.abort();
        }
        if let Some(producer) = producer {
            let _ = producer.await;
        }
    }
}

impl Drop for EmbeddedEventStore {
    fn drop(&mut self) {
        // Best effort for a store dropped without shutdown: flag closure and
        // cut the background tasks loose.
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify_consumers();
        self.shared.wake_producer();
        let mut tasks = self.shared.tasks.lock();
        if let Some(producer) = tasks.producer.take() {
            producer.abort();
        }
        if let Some(cleaner) = tasks.cleaner.take() {
            cleaner.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
