use presence_proto::protocol::ProtocolError;
use thiserror::Error;

/// Connection-level failures.  Never fatal: the gateway supervisor backs off
/// and reconnects.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
}

/// A skipped media poll cycle.  The stored media status is left untouched.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid snapshot: {0}")]
    Invalid(#[from] ProtocolError),
}

impl PollError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Http(e) if e.is_timeout())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no subscription id configured (set gateway.subscription_id or pass --subscription-id)")]
    MissingSubscription,
    #[error("failed to build media client: {0}")]
    MediaClient(#[from] reqwest::Error),
}
