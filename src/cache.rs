//! # Tailing Cache
//!
//! The singly-linked chain of the most recently fetched events, shared
//! between the producer (sole writer), every tailing consumer, and the
//! cleaner.
//!
//! ## Pointer discipline
//!
//! Nodes are reference counted. The chain keeps each node alive through its
//! predecessor's `next` link plus the `oldest` root; consumers keep at most
//! one extra reference (their last delivered node). Trimming advances
//! `oldest` forward, dropping the chain's references to the evicted prefix;
//! the nodes themselves are freed as soon as the last consumer holding one
//! advances past it or is detached by the cleaner.
//!
//! A node's `next` link is written exactly once, by the producer, going from
//! unset to set. `OnceLock` gives that write release semantics and every
//! reader's load acquire semantics, so a consumer that observes a link also
//! observes the fully initialized node behind it. `oldest` and `newest` are
//! `ArcSwapOption` so readers take lock-free snapshots while the producer
//! advances them.

use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;

use crate::types::{TrackedEvent, TrackingToken};

// =============================================================================
// Node
// =============================================================================

/// One link in the cache chain. Immutable except for the forward link.
pub(crate) struct Node {
    /// Monotonically increasing position assigned by the producer; used only
    /// for cache-size arithmetic, never for ordering semantics.
    pub(crate) index: u64,

    /// Token of the event cached immediately before this one (possibly one
    /// that has since been evicted). `None` only for the first event the
    /// producer ever cached.
    pub(crate) previous_token: Option<TrackingToken>,

    /// The cached event.
    pub(crate) event: TrackedEvent,

    /// Forward link, set exactly once by the producer.
    next: OnceLock<Arc<Node>>,
}

impl Node {
    fn new(index: u64, previous_token: Option<TrackingToken>, event: TrackedEvent) -> Self {
        Self {
            index,
            previous_token,
            event,
            next: OnceLock::new(),
        }
    }

    /// The successor node, if the producer has appended one.
    pub(crate) fn next(&self) -> Option<Arc<Node>> {
        self.next.get().cloned()
    }

    /// The cached event's tracking token.
    pub(crate) fn token(&self) -> TrackingToken {
        self.event.token()
    }
}

// =============================================================================
// Cache Chain
// =============================================================================

/// The bounded chain of cached events, rooted at `oldest`, tipped at
/// `newest`.
///
/// Only the producer appends and trims. Everyone else takes snapshots of the
/// roots and walks forward links.
pub(crate) struct TailingCache {
    oldest: ArcSwapOption<Node>,
    newest: ArcSwapOption<Node>,
    capacity: u64,
}

impl TailingCache {
    pub(crate) fn new(capacity: u64) -> Self {
        Self {
            oldest: ArcSwapOption::const_empty(),
            newest: ArcSwapOption::const_empty(),
            capacity,
        }
    }

    /// Snapshot of the oldest retained node.
    pub(crate) fn oldest(&self) -> Option<Arc<Node>> {
        self.oldest.load_full()
    }

    /// Snapshot of the newest node.
    pub(crate) fn newest(&self) -> Option<Arc<Node>> {
        self.newest.load_full()
    }

    /// Appends an event at the tip and returns its node.
    ///
    /// Producer only. `previous_token` is the producer's view of the last
    /// cached token, captured before this append.
    pub(crate) fn append(
        &self,
        previous_token: Option<TrackingToken>,
        event: TrackedEvent,
    ) -> Arc<Node> {
        let tip = self.newest.load_full();
        let index = tip.as_ref().map_or(0, |node| node.index + 1);
        let node = Arc::new(Node::new(index, previous_token, event));
        if let Some(tip) = tip {
            let linked = tip.next.set(Arc::clone(&node));
            debug_assert!(linked.is_ok(), "producer is the only writer of next links");
        }
        self.newest.store(Some(Arc::clone(&node)));
        if self.oldest.load().is_none() {
            self.oldest.store(Some(Arc::clone(&node)));
        }
        node
    }

    /// Advances `oldest` until the retained window is within capacity.
    ///
    /// Producer only. A consumer still pointing into the evicted prefix is
    /// not touched here; the tailing check and the cleaner handle it.
    pub(crate) fn trim(&self) {
        let newest = match self.newest.load_full() {
            Some(node) => node,
            None => return,
        };
        let mut cursor = self.oldest.load_full();
        while let Some(node) = cursor.as_ref() {
            if newest.index - node.index < self.capacity {
                break;
            }
            cursor = node.next();
        }
        self.oldest.store(cursor);
    }

    /// Locates the cached node holding exactly `token`.
    ///
    /// Returns `None` for a null token, an empty cache, or a token that has
    /// already been evicted from the window.
    pub(crate) fn find_node(&self, token: Option<TrackingToken>) -> Option<Arc<Node>> {
        let token = token?;
        let oldest = self.oldest.load_full()?;
        if oldest.token().is_after(token) {
            return None;
        }
        let mut cursor = Some(oldest);
        while let Some(node) = cursor {
            if node.token() == token {
                return Some(node);
            }
            cursor = node.next();
        }
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
