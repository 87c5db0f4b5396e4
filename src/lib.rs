//! # tailstore: Embedded Event Store Facade
//!
//! tailstore multiplexes any number of live event-stream subscribers over a
//! single backing event-storage engine. Every subscriber reads the global,
//! totally-ordered stream of persisted events from an arbitrary starting
//! position, including events appended after the subscription began,
//! without each subscriber polling storage on its own.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     EmbeddedEventStore                          │
//! │                 (publish / stream_events)                       │
//! └───────────────┬────────────────────────────┬────────────────────┘
//!                 │ append + after_commit      │ subscribe
//!                 ▼                            ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────────┐
//! │      Producer Task        │   │          EventStream            │
//! │ (single reader of storage,│   │  tailing: walks cache links     │
//! │  feeds the tailing cache) │   │  private: direct storage read   │
//! └─────────────┬─────────────┘   └───────────────┬─────────────────┘
//!               │ append nodes, signal            │
//!               ▼                                 │
//!     oldest ─▶ ▣ ─▶ ▣ ─▶ ▣ ─▶ ▣ newest  ◀────────┘
//!          tailing cache (bounded window)
//!               ▲
//!               │ detach laggards
//!     ┌─────────┴─────────┐
//!     │   Cleaner Task    │
//!     └───────────────────┘
//! ```
//!
//! Subscribers near the tail share the in-memory cache, fed by one
//! background producer. A subscriber whose position is no longer cached
//! reads a *private* stream straight from storage until it catches up, then
//! rejoins the shared tail. A subscriber that falls behind the cache window
//! is detached by the cleaner and recovers the same way.
//!
//! ## Core Invariants
//!
//! 1. **Total order**: every subscriber observes events in the storage
//!    engine's token order; all subscribers see the same sequence.
//! 2. **Exactly once per subscriber**: no event is delivered to the same
//!    subscriber twice, and none after its start position is skipped.
//! 3. **Bounded memory**: the cache never retains more than the configured
//!    number of events (trimming may lag a single append).
//! 4. **Single writer**: only the producer mutates the chain; consumers and
//!    the cleaner read snapshots.
//! 5. **Nothing persisted**: a crash loses cached nodes, never durable
//!    events.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tailstore::{EmbeddedEventStore, EventData, InMemoryStorage};
//!
//! let store = EmbeddedEventStore::new(Arc::new(InMemoryStorage::new()));
//!
//! let mut subscriber = store.stream_events(None);
//! store.publish(vec![EventData::new(b"hello".to_vec())]).await?;
//!
//! let event = subscriber.next_available().await?;
//! assert_eq!(event.token().as_raw(), 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for tailstore operations.
pub mod error;

/// The storage engine interface and the in-memory test engine.
pub mod storage;

/// The store facade, its configuration, and lifecycle management.
pub mod store;

/// Domain types: tracking tokens and events.
pub mod types;

mod cache;
mod cleaner;
mod consumer;
mod producer;

// =============================================================================
// Re-exports
// =============================================================================

pub use consumer::EventStream;
pub use error::{Error, Result};
pub use storage::{EventStorage, InMemoryStorage, TrackedEventStream};
pub use store::{EmbeddedEventStore, StoreConfig};
pub use types::{EventData, TrackedEvent, TrackingToken};
