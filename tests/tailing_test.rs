//! Tailing Consumer Tests
//!
//! Behavior of subscribers reading from the shared cache:
//! - A caught-up subscriber receives committed events in token order
//! - A commit wakes a blocked subscriber far faster than its wait bound
//! - `peek` is idempotent and `next_available` consumes the buffered event
//! - No event is delivered to the same subscriber twice

mod common;

use std::time::{Duration, Instant};

use common::{attach, collect_tokens, fast_config, in_memory_store, next_token, publish_batch};

/// A subscriber attached to an empty store sees tokens 1, 2, 3 after they
/// are committed.
#[tokio::test]
async fn caught_up_subscriber_receives_commits_in_order() {
    let store = in_memory_store(fast_config(4));
    let mut stream = store.stream_events(None);
    assert!(!attach(&mut stream).await);

    publish_batch(&store, 3).await;

    assert_eq!(collect_tokens(&mut stream, 3).await, vec![1, 2, 3]);
    store.shutdown().await;
}

/// A commit unblocks a waiting subscriber in milliseconds, not after the
/// wait bound expires.
#[tokio::test]
async fn commit_wakes_blocked_subscriber() {
    let store = std::sync::Arc::new(in_memory_store(fast_config(10)));
    let mut stream = store.stream_events(None);
    assert!(!attach(&mut stream).await);

    let publisher = std::sync::Arc::clone(&store);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        publisher
            .publish(vec![tailstore::EventData::new(b"wake".to_vec())])
            .await
            .expect("publish");
    });

    let started = Instant::now();
    let available = stream
        .has_next_available(Duration::from_secs(60))
        .await
        .expect("wait for wake-up");
    let elapsed = started.elapsed();

    assert!(available);
    assert!(
        elapsed < Duration::from_secs(5),
        "wake-up took {elapsed:?}, expected milliseconds"
    );
    assert_eq!(next_token(&mut stream).await, 1);

    handle.await.expect("publisher task");
    store.shutdown().await;
}

/// Repeated peeks return the same event until it is consumed.
#[tokio::test]
async fn peek_is_idempotent() {
    let store = in_memory_store(fast_config(10));
    let mut stream = store.stream_events(None);
    assert!(!attach(&mut stream).await);

    publish_batch(&store, 2).await;

    // Wait until the first event is buffered, then peek repeatedly.
    assert!(stream
        .has_next_available(Duration::from_secs(10))
        .await
        .unwrap());
    let first = stream.peek().await.unwrap().expect("buffered event");
    let again = stream.peek().await.unwrap().expect("buffered event");
    assert_eq!(first.token(), again.token());
    assert_eq!(first.token().as_raw(), 1);

    assert_eq!(next_token(&mut stream).await, 1);
    assert_eq!(
        stream
            .peek()
            .await
            .unwrap()
            .map(|event| event.token().as_raw()),
        Some(2)
    );
    store.shutdown().await;
}

/// `peek` on a subscriber with nothing pending returns empty without
/// consuming anything.
#[tokio::test]
async fn peek_on_drained_subscriber_is_empty() {
    let store = in_memory_store(fast_config(10));
    let mut stream = store.stream_events(None);
    assert!(!attach(&mut stream).await);

    publish_batch(&store, 1).await;
    assert_eq!(next_token(&mut stream).await, 1);

    assert!(stream.peek().await.unwrap().is_none());
    assert!(!stream
        .has_next_available(Duration::from_millis(50))
        .await
        .unwrap());
    store.shutdown().await;
}

/// Two subscribers each get their own full copy of the stream, in the same
/// order, with no duplicates.
#[tokio::test]
async fn subscribers_see_the_same_sequence() {
    let store = in_memory_store(fast_config(100));
    let mut first = store.stream_events(None);
    let mut second = store.stream_events(None);
    attach(&mut first).await;
    attach(&mut second).await;

    publish_batch(&store, 10).await;

    let expected: Vec<u64> = (1..=10).collect();
    assert_eq!(collect_tokens(&mut first, 10).await, expected);
    assert_eq!(collect_tokens(&mut second, 10).await, expected);
    store.shutdown().await;
}
