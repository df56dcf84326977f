//! Gateway wire format.
//!
//! Every frame is a JSON text message:
//!
//! ```text
//!   client → gateway   {"op":2,"d":{"subscribe_to_id":"<id>"}}      subscribe
//!                      {"op":3}                                       heartbeat
//!   gateway → client   {"op":1,"d":{"heartbeat_interval":<ms>}}      hello
//!                      {"op":0,"t":"INIT_STATE","d":{…}}             state event
//!                      {"op":0,"t":"PRESENCE_UPDATE","d":{…}}        state event
//! ```
//!
//! Inbound frames are validated into [`ServerFrame`]; anything that does not
//! fit is rejected with a [`ProtocolError`] instead of being defaulted.
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::presence::PresencePayload;

pub const OP_EVENT: u64 = 0;
pub const OP_HELLO: u64 = 1;
pub const OP_INITIALIZE: u64 = 2;
pub const OP_HEARTBEAT: u64 = 3;

pub const EVENT_INIT_STATE: &str = "INIT_STATE";
pub const EVENT_PRESENCE_UPDATE: &str = "PRESENCE_UPDATE";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Frames sent from the client to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Subscribe { subscription_id: String },
    Heartbeat,
}

impl ClientFrame {
    pub fn encode(&self) -> String {
        match self {
            ClientFrame::Subscribe { subscription_id } => json!({
                "op": OP_INITIALIZE,
                "d": { "subscribe_to_id": subscription_id },
            })
            .to_string(),
            ClientFrame::Heartbeat => json!({ "op": OP_HEARTBEAT }).to_string(),
        }
    }
}

/// The two state events that carry a presence payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    InitState,
    PresenceUpdate,
}

impl StateEvent {
    fn from_type(t: &str) -> Option<Self> {
        match t {
            EVENT_INIT_STATE => Some(Self::InitState),
            EVENT_PRESENCE_UPDATE => Some(Self::PresenceUpdate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitState => EVENT_INIT_STATE,
            Self::PresenceUpdate => EVENT_PRESENCE_UPDATE,
        }
    }
}

/// Frames received from the gateway.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Hello {
        heartbeat_interval: Duration,
    },
    State {
        event: StateEvent,
        payload: PresencePayload,
    },
    /// Well-formed but irrelevant to presence (other ops or event types).
    Ignored {
        op: Option<u64>,
        t: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    op: Option<u64>,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: Option<Value>,
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)?;

        if let Some(event) = raw.t.as_deref().and_then(StateEvent::from_type) {
            let d = raw.d.ok_or(ProtocolError::MissingField("d"))?;
            if !d.is_object() {
                return Err(ProtocolError::InvalidField {
                    field: "d",
                    reason: "expected an object".to_string(),
                });
            }
            let payload: PresencePayload = serde_json::from_value(d)?;
            return Ok(ServerFrame::State { event, payload });
        }

        if raw.op == Some(OP_HELLO) {
            let d = raw.d.ok_or(ProtocolError::MissingField("d"))?;
            let interval = d
                .get("heartbeat_interval")
                .ok_or(ProtocolError::MissingField("heartbeat_interval"))?;
            let ms = interval.as_u64().ok_or_else(|| ProtocolError::InvalidField {
                field: "heartbeat_interval",
                reason: format!("expected a positive integer, got {}", interval),
            })?;
            if ms == 0 {
                return Err(ProtocolError::InvalidField {
                    field: "heartbeat_interval",
                    reason: "must be greater than zero".to_string(),
                });
            }
            return Ok(ServerFrame::Hello {
                heartbeat_interval: Duration::from_millis(ms),
            });
        }

        Ok(ServerFrame::Ignored {
            op: raw.op,
            t: raw.t,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceStatus;

    #[test]
    fn test_subscribe_encoding() {
        let frame = ClientFrame::Subscribe {
            subscription_id: "959873990430720065".into(),
        };
        let value: Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["subscribe_to_id"], "959873990430720065");
    }

    #[test]
    fn test_heartbeat_encoding() {
        let value: Value = serde_json::from_str(&ClientFrame::Heartbeat.encode()).unwrap();
        assert_eq!(value, json!({ "op": 3 }));
    }

    #[test]
    fn test_decode_hello() {
        let frame = ServerFrame::decode(r#"{"op":1,"d":{"heartbeat_interval":30000}}"#).unwrap();
        match frame {
            ServerFrame::Hello { heartbeat_interval } => {
                assert_eq!(heartbeat_interval, Duration::from_millis(30_000))
            }
            other => panic!("expected hello, got {:?}", other),
        }
    }

    #[test]
    fn test_hello_without_interval_is_rejected() {
        let err = ServerFrame::decode(r#"{"op":1,"d":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("heartbeat_interval")));

        let err = ServerFrame::decode(r#"{"op":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("d")));
    }

    #[test]
    fn test_hello_with_bad_interval_is_rejected() {
        for bad in [r#""soon""#, "-5", "0", "1.5"] {
            let text = format!(r#"{{"op":1,"d":{{"heartbeat_interval":{}}}}}"#, bad);
            let err = ServerFrame::decode(&text).unwrap_err();
            assert!(
                matches!(err, ProtocolError::InvalidField { field: "heartbeat_interval", .. }),
                "{} should be rejected, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_decode_state_events() {
        let text = r#"{"op":0,"t":"PRESENCE_UPDATE","d":{"discord_user":{"id":"1"},"discord_status":"dnd","activities":[]}}"#;
        match ServerFrame::decode(text).unwrap() {
            ServerFrame::State { event, payload } => {
                assert_eq!(event, StateEvent::PresenceUpdate);
                assert!(payload.has_identity());
                assert_eq!(payload.discord_status, Some(PresenceStatus::Dnd));
            }
            other => panic!("expected state, got {:?}", other),
        }

        let text = r#"{"op":0,"t":"INIT_STATE","d":{"discord_status":"online"}}"#;
        match ServerFrame::decode(text).unwrap() {
            ServerFrame::State { event, payload } => {
                assert_eq!(event, StateEvent::InitState);
                assert!(!payload.has_identity());
            }
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frames_are_ignored() {
        let frame = ServerFrame::decode(r#"{"op":0,"t":"KV_UPDATE","d":{}}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Ignored { op: Some(0), .. }));

        let frame = ServerFrame::decode(r#"{"op":7}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Ignored { op: Some(7), t: None }));
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        assert!(matches!(
            ServerFrame::decode("not json").unwrap_err(),
            ProtocolError::Json(_)
        ));
        assert!(matches!(
            ServerFrame::decode("[1,2,3]").unwrap_err(),
            ProtocolError::Json(_)
        ));
        assert!(matches!(
            ServerFrame::decode(r#"{"t":"INIT_STATE"}"#).unwrap_err(),
            ProtocolError::MissingField("d")
        ));
        assert!(matches!(
            ServerFrame::decode(r#"{"t":"INIT_STATE","d":"x"}"#).unwrap_err(),
            ProtocolError::InvalidField { field: "d", .. }
        ));
        // unknown status values are not silently mapped to offline
        assert!(matches!(
            ServerFrame::decode(r#"{"t":"PRESENCE_UPDATE","d":{"discord_status":"away"}}"#)
                .unwrap_err(),
            ProtocolError::Json(_)
        ));
        assert!(matches!(
            ServerFrame::decode(r#"{"t":"PRESENCE_UPDATE","d":{"activities":{}}}"#).unwrap_err(),
            ProtocolError::Json(_)
        ));
    }
}
