//! # Event Producer
//!
//! The single background task feeding the tailing cache. While the store is
//! open it alternates between fetching (drain the storage stream into cache
//! nodes, signalling consumers after each append) and idling (a bounded
//! sleep on the producer signal, cut short by any commit wake-up).
//!
//! ## Wake-up protocol
//!
//! `wake_producer` sets the `should_fetch` flag *before* signalling, and
//! `wait_for_data` re-checks the flag *after* registering for the signal.
//! Whichever side loses the race, the flag is observed and the sleep is
//! skipped, so a wake-up is never lost.
//!
//! ## Read position
//!
//! Each fetch reads storage strictly after the cache tip. With an empty
//! cache the producer instead starts after the slowest tailing consumer's
//! position (a consumer that has seen nothing sorts first and pulls the read
//! back to the very beginning). Consumers that start behind a seeded cache
//! never drag the producer backwards: they catch up privately and rejoin.
//!
//! ## Failure
//!
//! A storage failure ends the current fetch with whatever progress was made,
//! is logged, and the loop carries on; attached consumers never notice
//! beyond added latency.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error};

use crate::store::Shared;

/// The producer task body. Runs until the store is closed.
pub(crate) async fn run(shared: Arc<Shared>) {
    debug!("event producer started");
    while !shared.is_closed() {
        shared.set_should_fetch();
        let mut data_found = false;
        while shared.take_should_fetch() {
            data_found = fetch_data(&shared).await;
        }
        if !data_found {
            wait_for_data(&shared).await;
        }
    }
    debug!("event producer stopped");
}

/// Bounded idle: sleeps on the producer signal for up to the fetch delay.
/// Skipped entirely if a wake-up already arrived.
async fn wait_for_data(shared: &Shared) {
    let wakeup = shared.producer_wakeups().notified();
    tokio::pin!(wakeup);
    wakeup.as_mut().enable();

    if shared.should_fetch() || shared.is_closed() {
        return;
    }
    let _ = tokio::time::timeout(shared.config().fetch_delay, wakeup).await;
}

/// One fetch cycle: drain a fresh storage stream into the cache. Returns
/// `true` iff the cache tip advanced.
async fn fetch_data(shared: &Shared) -> bool {
    if !shared.has_tailing_consumers() {
        return false;
    }

    let tip_before = shared.cache().newest();
    let mut stream = shared.storage().read_events(shared.last_token(), true);

    loop {
        // Race the (possibly blocking) storage stream against the producer
        // signal so a close or an explicit wake is seen promptly. Register
        // for the signal before the closed check: a close landing in between
        // still fires the already-registered waiter.
        let wakeup = shared.producer_wakeups().notified();
        tokio::pin!(wakeup);
        wakeup.as_mut().enable();
        if shared.is_closed() {
            break;
        }
        let next = tokio::select! {
            biased;
            next = stream.next() => next,
            _ = wakeup => continue,
        };

        match next {
            Some(Ok(event)) => {
                let previous_token = shared.last_token();
                shared.cache().append(previous_token, event);
                shared.notify_consumers();
                shared.cache().trim();
            }
            Some(Err(err)) => {
                error!(error = %err, "failed to read events from the event storage engine");
                break;
            }
            None => break,
        }
    }

    tip_changed(tip_before, shared.cache().newest())
}

fn tip_changed(
    before: Option<Arc<crate::cache::Node>>,
    after: Option<Arc<crate::cache::Node>>,
) -> bool {
    match (before, after) {
        (None, None) => false,
        (Some(before), Some(after)) => !Arc::ptr_eq(&before, &after),
        _ => true,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::store::{EmbeddedEventStore, StoreConfig};
    use crate::types::{EventData, TrackedEvent, TrackingToken};
    use std::time::Duration;

    fn store(cached_events: u64) -> EmbeddedEventStore {
        EmbeddedEventStore::with_config(
            Arc::new(InMemoryStorage::with_block_wait(Duration::from_millis(10))),
            StoreConfig::new()
                .with_cached_events(cached_events)
                .with_fetch_delay(Duration::from_millis(20)),
        )
    }

    #[tokio::test]
    async fn test_fetch_without_tailing_consumers_makes_no_progress() {
        let store = store(10);
        store
            .publish(vec![EventData::new(b"a".to_vec())])
            .await
            .unwrap();

        assert!(!fetch_data(&store.shared).await);
        assert!(store.shared.cache().newest().is_none());
    }

    #[tokio::test]
    async fn test_fetch_drains_storage_into_cache_and_trims() {
        let store = store(3);
        let state = Arc::new(crate::consumer::ConsumerState::from_token(None));
        store.shared.join_tailing(&state);

        let events = (0..5)
            .map(|i| EventData::new(format!("event-{i}").into_bytes()))
            .collect();
        store.publish(events).await.unwrap();

        assert!(fetch_data(&store.shared).await);

        let newest = store.shared.cache().newest().unwrap();
        let oldest = store.shared.cache().oldest().unwrap();
        assert_eq!(newest.token().as_raw(), 5);
        assert_eq!(oldest.token().as_raw(), 3);
        assert!(newest.index - oldest.index < 3);

        // Chain previous_token links mirror the append order.
        assert_eq!(oldest.previous_token, Some(TrackingToken::from_raw(2)));
    }

    #[tokio::test]
    async fn test_fetch_resumes_after_cache_tip() {
        let store = store(10);
        let shared = &store.shared;
        shared.cache().append(
            None,
            TrackedEvent::new(TrackingToken::from_raw(1), b"cached".to_vec()),
        );
        let state = Arc::new(crate::consumer::ConsumerState::from_token(None));
        shared.join_tailing(&state);

        // Storage holds 1..=3; only 2 and 3 are after the tip.
        let events = (0..3)
            .map(|i| EventData::new(format!("event-{i}").into_bytes()))
            .collect();
        store.publish(events).await.unwrap();

        assert!(fetch_data(shared).await);
        let newest = shared.cache().newest().unwrap();
        assert_eq!(newest.token().as_raw(), 3);
        assert_eq!(newest.index, 2);

        let second = shared.cache().oldest().unwrap().next().unwrap();
        assert_eq!(second.token().as_raw(), 2);
        assert_eq!(second.previous_token, Some(TrackingToken::from_raw(1)));
    }

    #[test]
    fn test_tip_changed() {
        let cache = crate::cache::TailingCache::new(1);
        let node = cache.append(None, TrackedEvent::new(TrackingToken::from_raw(1), b"x".to_vec()));
        assert!(!tip_changed(None, None));
        assert!(tip_changed(None, Some(Arc::clone(&node))));
        assert!(!tip_changed(Some(Arc::clone(&node)), Some(node)));
    }
}
