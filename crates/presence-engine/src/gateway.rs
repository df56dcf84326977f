//! GatewayClient: the persistent presence subscription.
//!
//! ```text
//!   Disconnected ──connect──► Connecting ──open──► AwaitingHello
//!        ▲                        │                     │ hello{interval}
//!        │  backoff (base·2ⁿ⁻¹,   │ error               ▼
//!        │  capped, + jitter)     ▼                Heartbeating ──► op 3 every interval
//!        └───────────────── Disconnected ◄──────── close / error
//! ```
//!
//! One supervisor task per `connect`.  Each connection runs in its own
//! session loop which owns the heartbeat interval, so the timer is gone
//! before the supervisor even starts counting down to the next attempt.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use presence_proto::config::GatewayConfig;
use presence_proto::presence::normalize;
use presence_proto::protocol::{ClientFrame, ServerFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::AggregationStore;
use crate::transport::{Connection, Connector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    Heartbeating,
}

impl GatewayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Disconnected => "disconnected",
            GatewayState::Connecting => "connecting",
            GatewayState::AwaitingHello => "awaiting_hello",
            GatewayState::Heartbeating => "heartbeating",
        }
    }
}

// ── backoff ───────────────────────────────────────────────────────────────────

/// Reconnect schedule: `min(base · 2^(n-1), max) + uniform(0..=jitter)` for
/// attempt `n`, giving up after `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            base: config.reconnect_base(),
            max: config.reconnect_max(),
            jitter: config.reconnect_jitter(),
            max_attempts: config.reconnect_max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).  `None` once the
    /// attempts are used up.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let exp = self.base.saturating_mul(factor).min(self.max);

        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=jitter_ms))
        };
        Some(exp + jitter)
    }
}

// ── client ────────────────────────────────────────────────────────────────────

pub struct GatewayClient {
    store: Arc<AggregationStore>,
    backoff: Backoff,
    state_tx: Arc<watch::Sender<GatewayState>>,
    session: Option<(CancellationToken, JoinHandle<()>)>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig, store: Arc<AggregationStore>) -> Self {
        Self::with_backoff(Backoff::from_config(config), store)
    }

    pub fn with_backoff(backoff: Backoff, store: Arc<AggregationStore>) -> Self {
        let (state_tx, _) = watch::channel(GatewayState::Disconnected);
        Self {
            store,
            backoff,
            state_tx: Arc::new(state_tx),
            session: None,
        }
    }

    pub fn state(&self) -> GatewayState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<GatewayState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Open the subscription for `subscription_id`.  A running connection is
    /// torn down first, so at most one heartbeat timer exists at any time.
    pub async fn connect<C: Connector>(&mut self, connector: C, subscription_id: impl Into<String>) {
        self.disconnect().await;

        let subscription_id = subscription_id.into();
        info!("Gateway: connecting (subscription {})", subscription_id);

        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            connector,
            subscription_id,
            backoff: self.backoff,
            link: Link {
                store: Arc::clone(&self.store),
                state_tx: Arc::clone(&self.state_tx),
                cancel: cancel.clone(),
            },
        };
        let handle = tokio::spawn(supervisor.run());
        self.session = Some((cancel, handle));
    }

    /// Tear the connection down.  Returns once the heartbeat timer and any
    /// pending reconnect are gone.  Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        let Some((cancel, handle)) = self.session.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!("Gateway: supervisor task failed: {}", e);
        }
        self.state_tx.send_replace(GatewayState::Disconnected);
        self.store.set_gateway_state(GatewayState::Disconnected).await;
        info!("Gateway: disconnected");
    }
}

// ── supervisor ────────────────────────────────────────────────────────────────

/// Shared by the supervisor and its sessions.
struct Link {
    store: Arc<AggregationStore>,
    state_tx: Arc<watch::Sender<GatewayState>>,
    cancel: CancellationToken,
}

impl Link {
    async fn set_state(&self, state: GatewayState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            debug!("Gateway: {} -> {}", prev.as_str(), state.as_str());
        }
        self.store.set_gateway_state(state).await;
    }
}

enum SessionEnd {
    Cancelled,
    Dropped { handshaken: bool },
}

struct Supervisor<C> {
    connector: C,
    subscription_id: String,
    backoff: Backoff,
    link: Link,
}

impl<C: Connector> Supervisor<C> {
    async fn run(self) {
        let mut rng = StdRng::from_entropy();
        let mut attempt: u32 = 0;

        loop {
            self.link.set_state(GatewayState::Connecting).await;

            let opened = tokio::select! {
                biased;
                _ = self.link.cancel.cancelled() => break,
                opened = self.connector.connect() => opened,
            };

            let handshaken = match opened {
                Ok(conn) => {
                    info!("Gateway: connection open");
                    match self.run_session(conn).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Dropped { handshaken } => handshaken,
                    }
                }
                Err(e) => {
                    warn!("Gateway: connect failed: {}", e);
                    false
                }
            };
            self.link.set_state(GatewayState::Disconnected).await;

            // a connection that got as far as heartbeating starts a fresh schedule
            if handshaken {
                attempt = 0;
            }
            attempt += 1;

            let Some(delay) = self.backoff.delay(attempt, &mut rng) else {
                error!(
                    "Gateway: giving up after {} reconnect attempts",
                    self.backoff.max_attempts
                );
                self.link.store.mark_gateway_lost().await;
                return;
            };
            info!(
                "Gateway: reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                attempt,
                self.backoff.max_attempts
            );
            tokio::select! {
                biased;
                _ = self.link.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Gateway: supervisor stopped");
    }

    async fn run_session(&self, mut conn: C::Conn) -> SessionEnd {
        let subscribe = ClientFrame::Subscribe {
            subscription_id: self.subscription_id.clone(),
        };
        if let Err(e) = conn.send(subscribe.encode()).await {
            warn!("Gateway: subscribe failed: {}", e);
            return SessionEnd::Dropped { handshaken: false };
        }
        self.link.set_state(GatewayState::AwaitingHello).await;

        let mut heartbeat: Option<Interval> = None;
        loop {
            tokio::select! {
                biased;
                _ = self.link.cancel.cancelled() => {
                    conn.close().await;
                    return SessionEnd::Cancelled;
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    if let Err(e) = conn.send(ClientFrame::Heartbeat.encode()).await {
                        warn!("Gateway: heartbeat failed: {}", e);
                        return SessionEnd::Dropped { handshaken: true };
                    }
                    debug!("Gateway: heartbeat sent");
                }
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text, &mut heartbeat).await,
                    Some(Err(e)) => {
                        warn!("Gateway: transport error: {}", e);
                        return SessionEnd::Dropped { handshaken: heartbeat.is_some() };
                    }
                    None => {
                        info!("Gateway: connection closed by server");
                        return SessionEnd::Dropped { handshaken: heartbeat.is_some() };
                    }
                },
            }
        }
    }

    async fn handle_frame(&self, text: &str, heartbeat: &mut Option<Interval>) {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Gateway: dropping malformed frame: {}", e);
                return;
            }
        };

        match frame {
            ServerFrame::Hello { heartbeat_interval } => {
                info!(
                    "Gateway: hello, heartbeat every {}ms",
                    heartbeat_interval.as_millis()
                );
                // first beat one full interval after hello
                let mut ticker = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *heartbeat = Some(ticker);
                self.link.set_state(GatewayState::Heartbeating).await;
            }
            ServerFrame::State { event, payload } => {
                if !payload.has_identity() {
                    debug!("Gateway: {} without identity, ignored", event.as_str());
                    return;
                }
                let presence = normalize(&payload);
                debug!(
                    "Gateway: {} -> {} / {}",
                    event.as_str(),
                    presence.status.as_str(),
                    presence.activity_name
                );
                self.link.store.set_presence(presence, Utc::now()).await;
            }
            ServerFrame::Ignored { op, t } => {
                debug!("Gateway: ignoring frame op={:?} t={:?}", op, t);
            }
        }
    }
}

/// Next heartbeat tick, or never before the hello has arrived.
async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
