use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Activity name used when the payload carries no activity.
pub const NO_ACTIVITY: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    #[default]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Offline => "offline",
        }
    }
}

/// Normalized presence of the monitored identity.  Replaced wholesale on
/// every accepted state event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub status: PresenceStatus,
    pub activity_name: String,
    pub activity_details: String,
    pub activity_start: Option<DateTime<Utc>>,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            status: PresenceStatus::Offline,
            activity_name: NO_ACTIVITY.to_string(),
            activity_details: String::new(),
            activity_start: None,
        }
    }
}

impl Presence {
    pub fn has_activity(&self) -> bool {
        self.activity_name != NO_ACTIVITY
    }
}

// ── wire payload ──────────────────────────────────────────────────────────────

/// `d` of an `INIT_STATE` / `PRESENCE_UPDATE` frame.  Unknown fields are
/// ignored; known fields must have the right shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Identity block.  Its contents are opaque; only presence matters.
    #[serde(default)]
    pub discord_user: Option<Value>,
    #[serde(default)]
    pub discord_status: Option<PresenceStatus>,
    #[serde(default)]
    pub activities: Option<Vec<ActivityPayload>>,
}

impl PresencePayload {
    pub fn has_identity(&self) -> bool {
        self.discord_user.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub timestamps: Option<ActivityTimestamps>,
}

/// Epoch milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityTimestamps {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

// ── normalizer ────────────────────────────────────────────────────────────────

/// Map a state payload to a [`Presence`].  The first activity in server
/// order is canonical.
pub fn normalize(payload: &PresencePayload) -> Presence {
    let activity = payload.activities.as_deref().and_then(|list| list.first());

    Presence {
        status: payload.discord_status.unwrap_or_default(),
        activity_name: activity
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| NO_ACTIVITY.to_string()),
        activity_details: activity.and_then(|a| a.details.clone()).unwrap_or_default(),
        activity_start: activity
            .and_then(|a| a.timestamps.as_ref())
            .and_then(|t| t.start)
            .and_then(DateTime::from_timestamp_millis),
    }
}
