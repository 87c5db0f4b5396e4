//! Storage Failure Recovery Tests
//!
//! The producer treats a storage read failure as a skipped fetch: it logs,
//! keeps every subscriber attached, and retries on its next cycle. With a
//! storage engine that fails every other blocking read, subscribers must
//! still receive every committed event in order.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{attach, collect_tokens, next_token, FlakyStorage};
use tailstore::{EmbeddedEventStore, EventData, StoreConfig};

fn flaky_store() -> (EmbeddedEventStore, Arc<FlakyStorage>) {
    common::init_tracing();
    let storage = Arc::new(FlakyStorage::new(Duration::from_millis(10)));
    let store = EmbeddedEventStore::with_config(
        Arc::clone(&storage) as Arc<dyn tailstore::EventStorage>,
        StoreConfig::new()
            .with_cached_events(100)
            .with_fetch_delay(Duration::from_millis(20)),
    );
    (store, storage)
}

/// Every committed event reaches the subscriber even though half of the
/// producer's fetches blow up.
#[tokio::test]
async fn subscriber_survives_intermittent_storage_failures() {
    let (store, storage) = flaky_store();
    let mut stream = store.stream_events(None);
    assert!(!attach(&mut stream).await);

    for _ in 0..6 {
        store
            .publish(
                (0..5)
                    .map(|i| EventData::new(format!("event-{i}").into_bytes()))
                    .collect(),
            )
            .await
            .expect("publish");
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert_eq!(
        collect_tokens(&mut stream, 30).await,
        (1..=30).collect::<Vec<_>>()
    );

    // The producer kept retrying across failures rather than dying on the
    // first one.
    assert!(
        storage.blocking_reads() >= 4,
        "expected several producer fetch attempts, saw {}",
        storage.blocking_reads()
    );

    store.shutdown().await;
}

/// The producer stays alive across failures: a commit made after many
/// failed fetches still reaches a tailing subscriber promptly.
#[tokio::test]
async fn producer_keeps_running_after_failures() {
    let (store, _storage) = flaky_store();
    let mut stream = store.stream_events(None);
    assert!(!attach(&mut stream).await);

    // Let several (partly failing) idle fetch cycles pass.
    tokio::time::sleep(Duration::from_millis(300)).await;

    store
        .publish(vec![EventData::new(b"still-alive".to_vec())])
        .await
        .expect("publish");
    assert_eq!(next_token(&mut stream).await, 1);

    store.shutdown().await;
}
