//! AggregationStore: the single source of truth for the widget.
//!
//! Three writers feed it: the gateway (presence + link state), the media
//! poller (media status) and the tickers (derived labels).  Every write runs
//! inside one lock section, bumps `rev`, and produces a complete
//! [`Snapshot`]; subscribers are invoked with that snapshot after the lock is
//! released.  A subscriber therefore never sees a half-applied presence or
//! media status, and may freely call back into the store.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use presence_proto::media::{MediaSnapshot, MediaStatus, Reconciliation};
use presence_proto::presence::Presence;
use presence_proto::view::{derive_media_view, derive_presence_view, MediaView, ViewState};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::drive_projection;
use crate::gateway::GatewayState;

/// Everything a consumer needs to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Incremented on every committed change.
    pub rev: u64,
    pub presence: Presence,
    pub media: MediaStatus,
    pub view: ViewState,
    pub gateway: GatewayState,
    /// Reconnect attempts exhausted; presence should read as unknown.
    pub gateway_lost: bool,
}

type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

struct StoreState {
    snapshot: Snapshot,
    disposed: bool,
}

pub struct AggregationStore {
    state: RwLock<StoreState>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    /// Rev last delivered to subscribers.  Held for the whole delivery.
    delivered: tokio::sync::Mutex<u64>,
    next_subscriber: AtomicU64,
    presence_rev: watch::Sender<u64>,
    media_rev: watch::Sender<u64>,
    search_url: String,
}

impl AggregationStore {
    /// `search_url` is the base for fallback media links.
    pub fn new(search_url: impl Into<String>) -> Arc<Self> {
        let (presence_rev, _) = watch::channel(0);
        let (media_rev, _) = watch::channel(0);
        Arc::new(Self {
            state: RwLock::new(StoreState {
                snapshot: Snapshot::default(),
                disposed: false,
            }),
            subscribers: Mutex::new(Vec::new()),
            delivered: tokio::sync::Mutex::new(0),
            next_subscriber: AtomicU64::new(1),
            presence_rev,
            media_rev,
            search_url: search_url.into(),
        })
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.snapshot.clone()
    }

    /// Register `callback`; it runs after every committed change until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().push((id, Arc::new(callback)));
        debug!("AggregationStore: subscriber {} registered", id);
        Subscription {
            id,
            store: Arc::downgrade(self),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Replace the presence wholesale.
    pub async fn set_presence(&self, presence: Presence, now: DateTime<Utc>) -> bool {
        let committed = self
            .commit(|state| {
                state.snapshot.view.presence = derive_presence_view(&presence, now);
                state.snapshot.presence = presence;
                Some(())
            })
            .await;
        if let Some(rev) = committed.map(|(rev, _)| rev) {
            self.presence_rev.send_replace(rev);
        }
        committed.is_some()
    }

    /// Apply a polled media snapshot against the media currently stored.
    /// `None` once the store is disposed.
    pub async fn apply_media(
        &self,
        snapshot: MediaSnapshot,
        now: DateTime<Utc>,
    ) -> Option<Reconciliation> {
        let search_url = self.search_url.as_str();
        let mut outcome = None;
        let committed = self
            .commit(|state| {
                let before = state.snapshot.media.clone();
                let result = state.snapshot.media.reconcile(snapshot, now);
                outcome = Some(result);

                let media = &state.snapshot.media;
                let mut view = derive_media_view(media, now, search_url);
                let same_projection = result == Reconciliation::AnchorKept
                    && media.total_duration == before.total_duration;
                if same_projection {
                    hold_position(&mut view, &state.snapshot.view.media);
                }
                if *media == before && view == state.snapshot.view.media {
                    return None;
                }
                state.snapshot.view.media = view;
                Some(())
            })
            .await;

        if let Some((rev, ())) = committed {
            self.media_rev.send_replace(rev);
        }
        outcome
    }

    /// Re-project media progress at `now`.  Returns whether a projection is
    /// possible at all (anchor and duration known).
    pub async fn tick_media(&self, now: DateTime<Utc>) -> bool {
        let search_url = self.search_url.as_str();
        let mut active = false;
        self.commit(|state| {
            let media = &state.snapshot.media;
            active = media.start_anchor.is_some() && media.total_duration.is_some();
            if !active {
                return None;
            }
            let mut view = derive_media_view(media, now, search_url);
            hold_position(&mut view, &state.snapshot.view.media);
            if view == state.snapshot.view.media {
                return None;
            }
            state.snapshot.view.media = view;
            Some(())
        })
        .await;
        active
    }

    /// Recompute the activity elapsed label at `now`.  Returns whether the
    /// presence has a start time to count from.
    pub async fn tick_presence(&self, now: DateTime<Utc>) -> bool {
        let mut active = false;
        self.commit(|state| {
            active = state.snapshot.presence.activity_start.is_some();
            if !active {
                return None;
            }
            let view = derive_presence_view(&state.snapshot.presence, now);
            if view == state.snapshot.view.presence {
                return None;
            }
            state.snapshot.view.presence = view;
            Some(())
        })
        .await;
        active
    }

    pub async fn set_gateway_state(&self, gateway: GatewayState) {
        self.commit(|state| {
            let lost = state.snapshot.gateway_lost && gateway != GatewayState::Heartbeating;
            if state.snapshot.gateway == gateway && state.snapshot.gateway_lost == lost {
                return None;
            }
            state.snapshot.gateway = gateway;
            state.snapshot.gateway_lost = lost;
            Some(())
        })
        .await;
    }

    /// Persistent-disconnect signal from the gateway supervisor.
    pub async fn mark_gateway_lost(&self) {
        self.commit(|state| {
            if state.snapshot.gateway_lost {
                return None;
            }
            state.snapshot.gateway = GatewayState::Disconnected;
            state.snapshot.gateway_lost = true;
            Some(())
        })
        .await;
    }

    /// Stop accepting writes and drop every subscriber.  Idempotent.
    pub async fn dispose(&self) {
        {
            let mut state = self.state.write().await;
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        // waits out a delivery already in progress
        let _delivered = self.delivered.lock().await;
        self.lock_subscribers().clear();
        info!("AggregationStore: disposed");
    }

    pub async fn is_disposed(&self) -> bool {
        self.state.read().await.disposed
    }

    pub fn watch_presence(&self) -> watch::Receiver<u64> {
        self.presence_rev.subscribe()
    }

    pub fn watch_media(&self) -> watch::Receiver<u64> {
        self.media_rev.subscribe()
    }

    /// The store's own 1 s tick: keeps the activity elapsed label current.
    /// Idles while the presence has no start time.
    pub async fn run_label_ticker(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let changes = self.watch_presence();
        let store = self;
        drive_projection(period, changes, cancel, move || {
            let store = Arc::clone(&store);
            async move { store.tick_presence(Utc::now()).await }
        })
        .await;
        debug!("AggregationStore: label ticker stopped");
    }

    // ── internals ─────────────────────────────────────────────────────────────

    /// Run `mutate` under the write lock.  When it reports a change, bump
    /// `rev` and notify subscribers with the resulting snapshot.
    ///
    /// The delivery lock is taken before the write lock is released, so
    /// subscribers see snapshots in commit order even when writers run on
    /// different worker threads.
    async fn commit<R>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> Option<R>,
    ) -> Option<(u64, R)> {
        let (snapshot, result, mut delivered) = {
            let mut state = self.state.write().await;
            if state.disposed {
                return None;
            }
            let result = mutate(&mut state)?;
            state.snapshot.rev += 1;
            let delivered = self.delivered.lock().await;
            (state.snapshot.clone(), result, delivered)
        };
        if snapshot.rev > *delivered {
            self.notify(&snapshot);
            *delivered = snapshot.rev;
        }
        Some((snapshot.rev, result))
    }

    fn notify(&self, snapshot: &Snapshot) {
        let callbacks: Vec<Callback> = self
            .lock_subscribers()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(snapshot);
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        if subscribers.len() != before {
            debug!("AggregationStore: subscriber {} removed", id);
        }
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Callback)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Between anchor resets the displayed progress never moves backwards: a
/// wall clock stepping back holds the last position.
fn hold_position(next: &mut MediaView, current: &MediaView) {
    if next.completion_fraction < current.completion_fraction {
        next.completion_fraction = current.completion_fraction;
        next.elapsed_label.clone_from(&current.elapsed_label);
        next.timeline_label.clone_from(&current.timeline_label);
    }
}

/// Handle returned by [`AggregationStore::subscribe`].  Dropping it
/// unsubscribes.
pub struct Subscription {
    id: u64,
    store: Weak<AggregationStore>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}
