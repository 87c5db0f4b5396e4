//! # Error Handling
//!
//! A single error enum covers every failure mode of the facade. The surface
//! is deliberately small: the store itself never corrupts shared state (the
//! cache protocol prevents it rather than rolling it back), so the only
//! errors a caller can see are storage failures bubbling out of a private
//! catch-up stream or the publish path, and operations that require data on
//! a closed store.
//!
//! Producer-side storage failures never surface here: the producer logs them
//! and retries on its next cycle, keeping every attached subscriber alive.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in tailstore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing event storage engine failed.
    ///
    /// Reaches the caller from a consumer's private catch-up stream or from
    /// [`publish`](crate::EmbeddedEventStore::publish). The affected consumer
    /// stays usable: its broken stream is dropped, and the next read reopens
    /// storage from the last delivered position.
    #[error("event storage failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The store (or this event stream) has been closed.
    ///
    /// Returned only where "no event" cannot express closure:
    /// `next_available` would otherwise block forever. `peek` and
    /// `has_next_available` report closure as empty instead.
    #[error("event store is closed")]
    Closed,
}

impl Error {
    /// Wraps any error as a storage failure.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Storage(source.into())
    }
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
