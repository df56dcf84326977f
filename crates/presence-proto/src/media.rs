//! "Now playing" snapshot and the anchor-reconciliation rule.
//!
//! The poller sees a snapshot roughly once a second.  Progress is not read
//! from each snapshot directly: instead the wall-clock instant at which the
//! track was at zero (the *anchor*) is stored, and the displayed position is
//! projected from it.  The anchor moves only when
//!
//!   1. the track changes, or
//!   2. the snapshot carries an explicit `elapsed` value,
//!
//! so polling jitter never shows up as a jump in the progress bar.
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Paused,
    /// Also stands in for any state the endpoint reports that is not `paused`.
    #[default]
    #[serde(other)]
    Playing,
}

/// Body of the media snapshot endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaSnapshot {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    /// Seconds.
    #[serde(default, rename = "totalDuration")]
    pub total_duration: Option<f64>,
    /// Seconds into the track, when the source reports it.
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub status: Option<PlaybackState>,
}

impl MediaSnapshot {
    /// Reject numeric fields that cannot describe a position or length.
    /// An unparseable `link` is dropped rather than failing the snapshot.
    pub fn validate(mut self) -> Result<Self, ProtocolError> {
        check_seconds("totalDuration", self.total_duration)?;
        check_seconds("elapsed", self.elapsed)?;

        if let Some(link) = self.link.as_deref() {
            if reqwest::Url::parse(link).is_err() {
                debug!("media snapshot: dropping unparseable link {:?}", link);
                self.link = None;
            }
        }
        Ok(self)
    }

    /// The reported track, if any.  An empty title means nothing is playing.
    pub fn active_track(&self) -> Option<&str> {
        self.track.as_deref().filter(|t| !t.is_empty())
    }
}

fn check_seconds(field: &'static str, value: Option<f64>) -> Result<(), ProtocolError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ProtocolError::InvalidField {
            field,
            reason: format!("expected a non-negative number of seconds, got {}", v),
        }),
        _ => Ok(()),
    }
}

/// Stored media state.  `start_anchor` is present iff `track` is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaStatus {
    pub track: Option<String>,
    pub artist: Option<String>,
    pub link: Option<String>,
    /// Seconds.
    pub total_duration: Option<f64>,
    /// Wall-clock instant corresponding to elapsed = 0.
    pub start_anchor: Option<DateTime<Utc>>,
    pub playback_state: PlaybackState,
}

/// What [`MediaStatus::reconcile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing playing; every field cleared.
    Cleared,
    /// Anchor recomputed (new track or authoritative elapsed).
    AnchorReset,
    /// Same track, no elapsed: anchor untouched.
    AnchorKept,
}

impl MediaStatus {
    pub fn is_playing(&self) -> bool {
        self.track.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.is_playing() && self.playback_state == PlaybackState::Paused
    }

    /// Fold a validated snapshot into the stored state at `now`.
    pub fn reconcile(&mut self, snapshot: MediaSnapshot, now: DateTime<Utc>) -> Reconciliation {
        let Some(track) = snapshot.active_track().map(str::to_string) else {
            *self = MediaStatus::default();
            return Reconciliation::Cleared;
        };

        let track_changed = self.track.as_deref() != Some(track.as_str());
        let reset = track_changed || snapshot.elapsed.is_some() || self.start_anchor.is_none();

        if reset {
            let elapsed_ms = (snapshot.elapsed.unwrap_or(0.0) * 1000.0).round() as i64;
            let anchor = TimeDelta::try_milliseconds(elapsed_ms)
                .and_then(|delta| now.checked_sub_signed(delta))
                .unwrap_or(now);
            self.start_anchor = Some(anchor);
        }

        if let Some(total) = snapshot.total_duration {
            self.total_duration = Some(total);
        }

        self.track = Some(track);
        self.artist = snapshot.artist;
        self.link = snapshot.link;
        self.playback_state = snapshot.status.unwrap_or_default();

        if reset {
            Reconciliation::AnchorReset
        } else {
            Reconciliation::AnchorKept
        }
    }
}
