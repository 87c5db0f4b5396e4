//! # Laggard Cleaner
//!
//! Trimming the cache drops the chain's own references to evicted nodes, but
//! a consumer that fell behind still anchors the evicted prefix through its
//! `last_node`. The cleaner runs periodically, detaches every tailing
//! consumer whose position predates what the cache retains, and clears its
//! anchor so the prefix becomes fully reclaimable. The detached consumer
//! recovers on its next read through a private catch-up stream.

use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

use crate::store::Shared;
use crate::types::token_is_after;

/// The cleaner task body. Cancelled (aborted) on store shutdown.
pub(crate) async fn run(shared: Arc<Shared>) {
    let delay = shared.config().cleanup_delay;
    let mut ticks = interval_at(Instant::now() + delay, delay);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        if shared.is_closed() {
            return;
        }
        sweep(&shared);
    }
}

/// One cleaning pass over the tailing set.
fn sweep(shared: &Shared) {
    let oldest = match shared.cache().oldest() {
        Some(node) => node,
        None => return,
    };
    // Until the first eviction the cache covers the whole stream; nobody can
    // be behind it.
    let horizon = match oldest.previous_token {
        Some(token) => token,
        None => return,
    };

    for state in shared.tailing_snapshot() {
        // Strictly behind the horizon, which includes a consumer that never
        // delivered anything (`None` sorts before everything). A consumer
        // exactly at the horizon is about to read the oldest cached node; it
        // stays.
        if token_is_after(Some(horizon), state.last_token()) {
            warn!(
                last_token = ?state.last_token(),
                cache_horizon = %horizon,
                "event consumer fell behind the tail end of the event cache; \
                 detaching it so it catches up from storage"
            );
            shared.leave_tailing(&state);
            state.clear_last_node();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
