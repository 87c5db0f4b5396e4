//! # Domain Types
//!
//! Core types for the tailing event store: tracking tokens, submitted event
//! payloads, and tracked (stored) events.
//!
//! ## Tracking Tokens
//!
//! A [`TrackingToken`] identifies a position in the global event stream. The
//! storage engine assigns tokens on append; the facade never inspects their
//! meaning beyond total order. "Before everything" is expressed as
//! `Option<TrackingToken>` being `None`, which sorts before every concrete
//! token. Consumers, the producer, and the cleaner all compare positions
//! through [`TrackingToken::is_after`] and the null-aware
//! [`token_is_after`] helper.
//!
//! ## Events
//!
//! [`EventData`] is the input form (what a caller publishes), [`TrackedEvent`]
//! the output form (what a subscriber receives). The tracked payload is held
//! behind an `Arc` so fanning one event out to many subscribers clones a
//! pointer, not the bytes.

use std::fmt;
use std::sync::Arc;

// =============================================================================
// Tracking Token
// =============================================================================

/// A position in the global event stream.
///
/// Tokens are totally ordered and assigned by the storage engine; within this
/// crate they are only ever compared, never computed with. A subscription's
/// starting point is an `Option<TrackingToken>` where `None` means "before
/// the first event".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackingToken(u64);

impl TrackingToken {
    /// Creates a token from its raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the token immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns `true` if this token is strictly after `other`.
    pub fn is_after(&self, other: TrackingToken) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for TrackingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Null-aware ordering over optional tokens.
///
/// `None` means "before everything": a concrete token is after `None`, and
/// `None` is after nothing.
pub(crate) fn token_is_after(token: Option<TrackingToken>, other: Option<TrackingToken>) -> bool {
    match (token, other) {
        (Some(token), Some(other)) => token.is_after(other),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

// =============================================================================
// Events
// =============================================================================

/// An event payload submitted for publication.
///
/// This is the input form: it carries no position because the storage engine
/// assigns the tracking token during append.
#[derive(Debug, Clone)]
pub struct EventData {
    /// Optional classification (e.g. `"OrderCreated"`), for consumers that
    /// route on type.
    pub event_type: Option<String>,

    /// The payload. The store is payload-agnostic; callers choose the
    /// serialization format.
    pub data: Vec<u8>,
}

impl EventData {
    /// Creates an event with just a payload.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: None,
            data: data.into(),
        }
    }

    /// Creates an event with a type and a payload.
    pub fn with_type(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            data: data.into(),
        }
    }
}

/// A stored event together with its position in the global stream.
///
/// Cloning is cheap: the payload is shared behind an `Arc`, so one cached
/// event can be handed to any number of subscribers without copying bytes.
#[derive(Debug, Clone)]
pub struct TrackedEvent {
    token: TrackingToken,
    event_type: Option<String>,
    data: Arc<Vec<u8>>,
}

impl TrackedEvent {
    /// Creates a tracked event with just a payload.
    pub fn new(token: TrackingToken, data: impl Into<Vec<u8>>) -> Self {
        Self {
            token,
            event_type: None,
            data: Arc::new(data.into()),
        }
    }

    /// Creates a tracked event from submitted [`EventData`] and the token the
    /// storage engine assigned to it.
    pub fn from_data(token: TrackingToken, data: EventData) -> Self {
        Self {
            token,
            event_type: data.event_type,
            data: Arc::new(data.data),
        }
    }

    /// The token identifying this event's position in the global stream.
    pub fn token(&self) -> TrackingToken {
        self.token
    }

    /// The event type, if one was provided.
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// The event payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

// =============================================================================
// Tests
// =============================================================================
