//! MediaPoller: fetches the "now playing" snapshot on a fixed cadence.
//!
//! At most one request is in flight.  When the next cycle fires before the
//! current request has answered, the stale request is dropped and a fresh one
//! started, so a late response can never overwrite newer state.  Failed
//! cycles leave the stored media untouched.
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use presence_proto::config::MediaConfig;
use presence_proto::media::{MediaSnapshot, Reconciliation};
use presence_proto::protocol::ProtocolError;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PollError;
use crate::store::AggregationStore;

pub struct MediaPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    store: Arc<AggregationStore>,
}

impl MediaPoller {
    pub fn new(config: &MediaConfig, store: Arc<AggregationStore>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            interval: config.poll_interval(),
            store,
        })
    }

    /// GET the endpoint once.  `null` (or an empty track) means nothing is
    /// playing.
    pub async fn fetch(&self) -> Result<MediaSnapshot, PollError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status));
        }
        let body = response.bytes().await?;
        let snapshot: Option<MediaSnapshot> =
            serde_json::from_slice(&body).map_err(ProtocolError::from)?;
        Ok(snapshot.unwrap_or_default().validate()?)
    }

    /// One full cycle: fetch and fold into the store.
    pub async fn poll_once(&self) -> Result<Option<Reconciliation>, PollError> {
        let snapshot = self.fetch().await?;
        Ok(self.store.apply_media(snapshot, Utc::now()).await)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("MediaPoller: polling {} every {}ms", self.url, self.interval.as_millis());

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        'cycles: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut fetch = pin!(self.fetch());
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'cycles,
                    result = &mut fetch => {
                        self.absorb(result, &mut failures).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        debug!("MediaPoller: request superseded by next cycle");
                        fetch.set(self.fetch());
                    }
                }
            }
        }
        debug!("MediaPoller: stopped");
    }

    async fn absorb(&self, result: Result<MediaSnapshot, PollError>, failures: &mut u32) {
        match result {
            Ok(snapshot) => {
                if *failures > 0 {
                    info!("MediaPoller: recovered after {} failed polls", failures);
                    *failures = 0;
                }
                match self.store.apply_media(snapshot, Utc::now()).await {
                    Some(Reconciliation::AnchorReset) => debug!("MediaPoller: anchor reset"),
                    Some(Reconciliation::Cleared) => debug!("MediaPoller: nothing playing"),
                    Some(Reconciliation::AnchorKept) | None => {}
                }
            }
            Err(e) => {
                *failures += 1;
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                if *failures == 1 {
                    warn!("MediaPoller: poll {}: {}", kind, e);
                } else {
                    debug!("MediaPoller: poll {} ({} in a row): {}", kind, failures, e);
                }
            }
        }
    }
}
