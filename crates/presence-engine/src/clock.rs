//! Projection tickers.
//!
//! ```text
//!   media poll / presence event ──► store ──► watch rev ──┐
//!                                                         ▼
//!                                  drive_projection: tick every `period`
//!                                  while the tick reports "active",
//!                                  otherwise sleep until the next rev
//! ```
//!
//! With nothing to project the tickers hold no timer at all.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::AggregationStore;

/// Call `tick` every `period` for as long as it returns `true`.  Once it
/// returns `false` wait for `changes` to move before ticking again.
pub async fn drive_projection<F, Fut>(
    period: Duration,
    mut changes: watch::Receiver<u64>,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    'outer: loop {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        changes.borrow_and_update();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'outer,
                _ = ticker.tick() => {
                    if !tick().await {
                        break;
                    }
                }
            }
        }

        // idle until the source changes
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Re-projects media progress every `period` (500 ms by default) while a
/// track with a known duration is stored.
pub struct MediaClock {
    store: Arc<AggregationStore>,
    period: Duration,
}

impl MediaClock {
    pub fn new(store: Arc<AggregationStore>, period: Duration) -> Self {
        Self { store, period }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let changes = self.store.watch_media();
        let store = self.store;
        drive_projection(self.period, changes, cancel, move || {
            let store = Arc::clone(&store);
            async move { store.tick_media(Utc::now()).await }
        })
        .await;
        debug!("MediaClock: stopped");
    }
}
