//! # Event Storage Interface
//!
//! The facade treats durable storage as an external collaborator behind the
//! [`EventStorage`] trait. Two operations are required:
//!
//! - `read_events(after, may_block)`: a lazy, ordered stream of every event
//!   positioned strictly after `after`. With `may_block == false` the stream
//!   covers only currently persisted events and then ends (used by consumer
//!   catch-up). With `may_block == true` the stream may idle briefly awaiting
//!   newly committed events before drying up (used by the producer, which
//!   reopens it on every fetch cycle).
//! - `append_events`: durably appends payloads and returns them with their
//!   assigned tokens, in token order.
//!
//! Streams are closed by dropping them; there is no explicit close call.
//!
//! [`InMemoryStorage`] is a complete, tokio-native engine used by the
//! integration tests and examples. It assigns tokens sequentially from 1 and
//! signals blocked readers on every commit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::error::Result;
use crate::types::{EventData, TrackedEvent, TrackingToken};

// =============================================================================
// Storage Trait
// =============================================================================

/// A lazy, ordered stream of tracked events read from storage.
pub type TrackedEventStream = BoxStream<'static, Result<TrackedEvent>>;

/// The durable event storage engine backing an
/// [`EmbeddedEventStore`](crate::EmbeddedEventStore).
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Opens a stream of events positioned strictly after `after` (`None`
    /// reads from the very beginning), in token order.
    ///
    /// When `may_block` is `true` the stream may wait briefly for new
    /// commits before ending; when `false` it ends as soon as the persisted
    /// suffix is exhausted. Dropping the stream releases its resources.
    fn read_events(&self, after: Option<TrackingToken>, may_block: bool) -> TrackedEventStream;

    /// Appends the given events and returns them with their assigned tokens,
    /// in append order.
    async fn append_events(&self, events: Vec<EventData>) -> Result<Vec<TrackedEvent>>;
}

// =============================================================================
// In-Memory Engine
// =============================================================================

/// How long a blocking read idles for new commits before its stream ends.
const DEFAULT_BLOCK_WAIT: Duration = Duration::from_millis(100);

/// An in-memory [`EventStorage`] engine.
///
/// Events live in a vector and tokens are the 1-based append positions.
/// Blocking reads wait on a commit signal for up to a configurable interval
/// before drying up, which is the behavior the producer's fetch loop is
/// built around.
///
/// # Example
///
/// ```rust,ignore
/// let storage = Arc::new(InMemoryStorage::new());
/// let stored = storage.append_events(vec![EventData::new(b"hello".to_vec())]).await?;
/// assert_eq!(stored[0].token().as_raw(), 1);
/// ```
pub struct InMemoryStorage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    events: RwLock<Vec<TrackedEvent>>,
    committed: Notify,
    block_wait: Duration,
}

impl InMemoryStorage {
    /// Creates an empty engine with the default blocking-read wait.
    pub fn new() -> Self {
        Self::with_block_wait(DEFAULT_BLOCK_WAIT)
    }

    /// Creates an empty engine whose blocking reads idle for `block_wait`
    /// before ending.
    pub fn with_block_wait(block_wait: Duration) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                events: RwLock::new(Vec::new()),
                committed: Notify::new(),
                block_wait,
            }),
        }
    }

    /// Number of events persisted so far.
    pub fn len(&self) -> usize {
        self.inner.events.read().len()
    }

    /// Returns `true` if nothing has been persisted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageInner {
    fn event_at(&self, offset: u64) -> Option<TrackedEvent> {
        self.events.read().get(offset as usize).cloned()
    }
}

#[async_trait]
impl EventStorage for InMemoryStorage {
    fn read_events(&self, after: Option<TrackingToken>, may_block: bool) -> TrackedEventStream {
        let inner = Arc::clone(&self.inner);
        // Tokens are 1-based append positions, so the event after token `t`
        // sits at vector offset `t`.
        let start = after.map(|token| token.as_raw()).unwrap_or(0);
        Box::pin(stream::unfold(start, move |offset| {
            let inner = Arc::clone(&inner);
            async move {
                loop {
                    // Register for the commit signal before checking, so an
                    // append between the check and the wait still wakes us.
                    let committed = inner.committed.notified();
                    tokio::pin!(committed);
                    committed.as_mut().enable();

                    if let Some(event) = inner.event_at(offset) {
                        return Some((Ok(event), offset + 1));
                    }
                    if !may_block {
                        return None;
                    }
                    if tokio::time::timeout(inner.block_wait, committed)
                        .await
                        .is_err()
                    {
                        return None;
                    }
                }
            }
        }))
    }

    async fn append_events(&self, events: Vec<EventData>) -> Result<Vec<TrackedEvent>> {
        let mut stored = Vec::with_capacity(events.len());
        {
            let mut guard = self.inner.events.write();
            for data in events {
                let token = TrackingToken::from_raw(guard.len() as u64 + 1);
                let event = TrackedEvent::from_data(token, data);
                guard.push(event.clone());
                stored.push(event);
            }
        }
        self.inner.committed.notify_waiters();
        Ok(stored)
    }
}

// =============================================================================
// Tests
// =============================================================================
