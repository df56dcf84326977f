//! Display-ready fields derived from the stored model plus "now".
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaStatus;
use crate::presence::Presence;
use crate::timeline::{activity_elapsed_label, format_clock, project};

const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub presence: PresenceView,
    pub media: MediaView,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceView {
    /// `Xh Ym` / `Ym Ss`, empty without an activity start.
    pub elapsed_label: String,
    /// `In <activity> for <elapsed>`, empty without an activity or start.
    pub headline: String,
    /// Second ` - ` separated segment of the activity details.
    pub detail_line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaView {
    /// Percent in `[0, 100]`.
    pub completion_fraction: f64,
    /// `m:ss`, empty when no projection is possible.
    pub elapsed_label: String,
    /// `m:ss / m:ss`, empty when no projection is possible.
    pub timeline_label: String,
    pub artist_label: String,
    /// Source link, or a search link built from track and artist.
    pub link: Option<String>,
    pub paused: bool,
}

pub fn derive_presence_view(presence: &Presence, now: DateTime<Utc>) -> PresenceView {
    let elapsed_label = activity_elapsed_label(presence.activity_start, now);
    let headline = if presence.has_activity() && !elapsed_label.is_empty() {
        format!("In {} for {}", presence.activity_name, elapsed_label)
    } else {
        String::new()
    };
    let detail_line = presence
        .activity_details
        .split(" - ")
        .nth(1)
        .unwrap_or_default()
        .to_string();

    PresenceView {
        elapsed_label,
        headline,
        detail_line,
    }
}

pub fn derive_media_view(media: &MediaStatus, now: DateTime<Utc>, search_url: &str) -> MediaView {
    let Some(track) = media.track.as_deref() else {
        return MediaView::default();
    };

    let (completion_fraction, elapsed_label, timeline_label) = match project(media, now) {
        Some(p) => {
            let elapsed = format_clock(p.elapsed_secs);
            let timeline = format!("{} / {}", elapsed, format_clock(p.total_secs));
            (p.completion_fraction, elapsed, timeline)
        }
        None => (0.0, String::new(), String::new()),
    };

    let link = media
        .link
        .clone()
        .or_else(|| search_link(search_url, track, media.artist.as_deref()));

    MediaView {
        completion_fraction,
        elapsed_label,
        timeline_label,
        artist_label: artist_label(media.artist.as_deref()),
        link,
        paused: media.is_paused(),
    }
}

/// Primary artist: text before the first `•`, trimmed.
pub fn artist_label(artist: Option<&str>) -> String {
    artist
        .and_then(|a| a.split('•').next())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(UNKNOWN_ARTIST)
        .to_string()
}

pub fn search_link(search_url: &str, track: &str, artist: Option<&str>) -> Option<String> {
    let mut url = reqwest::Url::parse(search_url).ok()?;
    let query = format!("{} {}", track, artist.unwrap_or_default());
    url.query_pairs_mut().append_pair("q", query.trim());
    Some(url.to_string())
}
