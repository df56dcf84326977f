//! Projection of elapsed/progress figures from stored anchors and "now".
use chrono::{DateTime, TimeDelta, Utc};

use crate::media::MediaStatus;

/// Media position projected from the anchor.  Only exists when both the
/// anchor and the total duration are known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaProgress {
    /// Percent complete, always within `[0, 100]`.
    pub completion_fraction: f64,
    /// Seconds, clamped to `[0, total_secs]`.
    pub elapsed_secs: f64,
    pub total_secs: f64,
}

pub fn project(media: &MediaStatus, now: DateTime<Utc>) -> Option<MediaProgress> {
    let anchor = media.start_anchor?;
    let total = media.total_duration?;

    let elapsed = (now - anchor).num_milliseconds() as f64 / 1000.0;
    let completion_fraction = if total > 0.0 {
        (elapsed / total * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Some(MediaProgress {
        completion_fraction,
        elapsed_secs: elapsed.clamp(0.0, total.max(0.0)),
        total_secs: total,
    })
}

/// `m:ss`, minutes unpadded.
pub fn format_clock(secs: f64) -> String {
    let whole = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", whole / 60, whole % 60)
}

/// `Xh Ym` from one hour up, `Ym Ss` below.
pub fn format_activity_elapsed(elapsed: TimeDelta) -> String {
    let total = elapsed.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

/// Label for how long the current activity has been running; empty when the
/// activity has no start time.
pub fn activity_elapsed_label(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match start {
        Some(start) => format_activity_elapsed(now - start),
        None => String::new(),
    }
}
