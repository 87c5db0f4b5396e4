//! # Event Stream Consumers
//!
//! A consumer delivers every event at or after its subscription's start
//! position exactly once, in token order, until closed. It runs in one of
//! two modes and transitions between them:
//!
//! ```text
//!            start token cached          catch-up stream dries up
//!  ┌─────────┐ ───────────────▶ ┌─────────┐ ◀─────────────── ┌─────────┐
//!  │ created │                  │ tailing │                  │ private │
//!  └─────────┘ ───────────────▶ └────┬────┘ ───────────────▶ └─────────┘
//!            start token gone        │       fell behind window
//!            (private first)         │       (cleaner detach, or the
//!                                    ▼        tailing check itself)
//!                              walks cache nodes,
//!                              waits on the shared signal
//! ```
//!
//! *Tailing* consumers walk the shared cache by following forward links and
//! park on the consumer signal when they reach the tip. *Private* consumers
//! read a direct, non-blocking storage stream; when it dries up they look
//! for their position in the cache, join the tailing set, make sure the
//! producer is running, and continue on the global path.
//!
//! A consumer that falls behind the cache window is detached (by the cleaner,
//! or by the authoritative tailing check on its next read) and recovers
//! through a fresh private stream. Nothing is lost either way: the private
//! stream resumes from the last delivered token.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::cache::Node;
use crate::error::{Error, Result};
use crate::storage::TrackedEventStream;
use crate::store::Shared;
use crate::types::{token_is_after, TrackedEvent, TrackingToken};

/// Per-round wait used by `next_available` to emulate an unbounded block.
/// Each expiry just re-enters the fetch loop; actual wake-ups come from the
/// consumer signal.
const UNBOUNDED_WAIT_SLICE: Duration = Duration::from_secs(60);

// =============================================================================
// Shared Consumer State
// =============================================================================

/// The registry-visible part of a consumer.
///
/// The owning [`EventStream`] writes both fields; the cleaner clears
/// `last_node` when detaching a laggard; the producer reads `last_token` to
/// decide how far back to read when the cache is empty. Each field is
/// independently readable without coordination.
pub(crate) struct ConsumerState {
    last_token: Mutex<Option<TrackingToken>>,
    last_node: ArcSwapOption<Node>,
}

impl ConsumerState {
    /// A consumer starting at `start`, not yet anchored to a cache node.
    pub(crate) fn from_token(start: Option<TrackingToken>) -> Self {
        Self {
            last_token: Mutex::new(start),
            last_node: ArcSwapOption::const_empty(),
        }
    }

    /// A consumer seeded on a cache node whose token equals its start
    /// position.
    pub(crate) fn at_node(node: &Arc<Node>) -> Self {
        Self {
            last_token: Mutex::new(Some(node.token())),
            last_node: ArcSwapOption::from(Some(Arc::clone(node))),
        }
    }

    /// Token of the last delivered event (or the start token).
    pub(crate) fn last_token(&self) -> Option<TrackingToken> {
        *self.last_token.lock()
    }

    fn set_last_token(&self, token: Option<TrackingToken>) {
        *self.last_token.lock() = token;
    }

    pub(crate) fn last_node(&self) -> Option<Arc<Node>> {
        self.last_node.load_full()
    }

    fn store_last_node(&self, node: Option<Arc<Node>>) {
        self.last_node.store(node);
    }

    /// Drops the anchor into the cache chain so an evicted prefix becomes
    /// fully unreachable. Called by the cleaner when detaching a laggard.
    pub(crate) fn clear_last_node(&self) {
        self.last_node.store(None);
    }
}

/// Outcome of advancing the private catch-up stream by one step.
enum PrivateAdvance {
    /// The stream produced the next event.
    Event(TrackedEvent),

    /// The stream dried up; the consumer has rejoined the tailing set.
    CaughtUp,
}

// =============================================================================
// EventStream
// =============================================================================

/// A live subscription to the store's global event stream.
///
/// Obtained from [`stream_events`](crate::EmbeddedEventStore::stream_events).
/// Delivers every event strictly after the start position exactly once, in
/// token order, including events committed after the subscription began.
///
/// # Example
///
/// ```rust,ignore
/// let mut stream = store.stream_events(None);
/// while let Some(event) = stream.peek().await? {
///     process(&event);
///     stream.next_available().await?;
/// }
/// ```
///
/// Closing (explicitly or by dropping) releases the private storage stream
/// and removes the consumer from the tailing set.
pub struct EventStream {
    shared: Arc<Shared>,
    state: Arc<ConsumerState>,

    /// At most one buffered event awaiting consumption; makes `peek`
    /// idempotent.
    peeked: Option<TrackedEvent>,

    /// Present iff the consumer is in private catch-up mode.
    private_stream: Option<TrackedEventStream>,

    closed: bool,
}

impl EventStream {
    pub(crate) fn new(shared: Arc<Shared>, state: Arc<ConsumerState>) -> Self {
        Self {
            shared,
            state,
            peeked: None,
            private_stream: None,
            closed: false,
        }
    }

    /// Returns the next event without consuming it, or `None` when nothing
    /// is immediately available.
    ///
    /// Idempotent: repeated peeks without an intervening
    /// [`next_available`](Self::next_available) return the same event.
    pub async fn peek(&mut self) -> Result<Option<TrackedEvent>> {
        if self.peeked.is_none() {
            self.peeked = self.fetch(Duration::ZERO).await?;
        }
        Ok(self.peeked.clone())
    }

    /// Waits up to `timeout` for an event to become available. A buffered
    /// event is kept for the next [`next_available`](Self::next_available).
    ///
    /// Returns `false` on timeout, with no state change, and on a closed
    /// store.
    pub async fn has_next_available(&mut self, timeout: Duration) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.fetch(timeout).await?;
        }
        Ok(self.peeked.is_some())
    }

    /// Blocks until the next event is available and consumes it.
    ///
    /// Only new data, a storage failure on the private path, or closure can
    /// unblock this; a closed store or stream yields [`Error::Closed`].
    pub async fn next_available(&mut self) -> Result<TrackedEvent> {
        loop {
            if let Some(event) = self.peeked.take() {
                return Ok(event);
            }
            if self.closed || self.shared.is_closed() {
                return Err(Error::Closed);
            }
            self.peeked = self.fetch(UNBOUNDED_WAIT_SLICE).await?;
        }
    }

    /// Closes the subscription: drops any private storage stream and leaves
    /// the tailing set. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.private_stream = None;
        self.shared.leave_tailing(&self.state);
    }

    // -------------------------------------------------------------------------
    // Mode selection
    // -------------------------------------------------------------------------

    /// One fetch attempt, dispatched to the mode the consumer is currently
    /// in. A private stream that dries up rejoins the tail and, given a
    /// timeout, continues on the global path within the same call.
    async fn fetch(&mut self, timeout: Duration) -> Result<Option<TrackedEvent>> {
        loop {
            if self.closed || self.shared.is_closed() {
                return Ok(None);
            }
            if self.is_tailing() {
                return self.peek_global(timeout).await;
            }
            match self.advance_private().await? {
                PrivateAdvance::Event(event) => return Ok(Some(event)),
                PrivateAdvance::CaughtUp if timeout.is_zero() => return Ok(None),
                PrivateAdvance::CaughtUp => continue,
            }
        }
    }

    /// The authoritative tailing check: registry membership is advisory, so
    /// also verify this consumer's position is still covered by the cache
    /// window.
    fn is_tailing(&self) -> bool {
        if !self.shared.is_tailing_registered(&self.state) {
            return false;
        }
        let last_token = self.state.last_token();
        match (last_token, self.shared.cache().oldest()) {
            (None, _) | (_, None) => true,
            (Some(last), Some(oldest)) => token_is_after(Some(last), oldest.previous_token),
        }
    }

    // -------------------------------------------------------------------------
    // Global (tailing) path
    // -------------------------------------------------------------------------

    async fn peek_global(&mut self, timeout: Duration) -> Result<Option<TrackedEvent>> {
        // Register for the producer's signal before looking at the chain, so
        // an append between the look and the wait still wakes us.
        let notified = self.shared.consumer_wakeups().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let mut next = self.next_node();
        if next.is_none() && !timeout.is_zero() {
            let _ = tokio::time::timeout(timeout, notified).await;
            next = self.next_node();
        }

        match next {
            Some(node) => {
                // A consumer detached while we waited must not re-anchor into
                // the chain, but its token still advances past this event.
                if self.shared.is_tailing_registered(&self.state) {
                    self.state.store_last_node(Some(Arc::clone(&node)));
                }
                self.state.set_last_token(Some(node.token()));
                Ok(Some(node.event.clone()))
            }
            None => Ok(None),
        }
    }

    /// The node holding this consumer's next event, if it is cached.
    ///
    /// With an anchor (`last_node`) that is just the forward link. Without
    /// one (right after a rejoin, or after the cleaner cleared it), scan
    /// from `oldest` for the node whose predecessor token matches the last
    /// delivered token.
    fn next_node(&self) -> Option<Arc<Node>> {
        if let Some(node) = self.state.last_node() {
            return node.next();
        }
        let last_token = self.state.last_token();
        let mut cursor = self.shared.cache().oldest();
        while let Some(node) = cursor {
            if node.previous_token == last_token {
                return Some(node);
            }
            cursor = node.next();
        }
        None
    }

    // -------------------------------------------------------------------------
    // Private (catch-up) path
    // -------------------------------------------------------------------------

    async fn advance_private(&mut self) -> Result<PrivateAdvance> {
        let mut stream = match self.private_stream.take() {
            Some(stream) => stream,
            None => self
                .shared
                .storage()
                .read_events(self.state.last_token(), false),
        };

        match stream.next().await {
            Some(Ok(event)) => {
                self.state.set_last_token(Some(event.token()));
                self.private_stream = Some(stream);
                Ok(PrivateAdvance::Event(event))
            }
            Some(Err(err)) => {
                // The broken stream is dropped; a retried read reopens
                // storage from the last delivered token.
                Err(err)
            }
            None => {
                // Caught up with storage: anchor to the cache if our position
                // is inside the window, rejoin the tail, and make sure the
                // producer is running.
                let node = self.shared.cache().find_node(self.state.last_token());
                self.state.store_last_node(node);
                self.shared.join_tailing(&self.state);
                self.shared.ensure_producer_started();
                Ok(PrivateAdvance::CaughtUp)
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Tests
// =============================================================================
