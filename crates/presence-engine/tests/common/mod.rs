#![allow(dead_code)]

pub mod mock_gateway;
pub mod mock_media;

use std::time::Duration;

use presence_engine::gateway::Backoff;

pub const SEARCH_URL: &str = "https://music.youtube.com/search";

pub fn quick_backoff(max_attempts: u32) -> Backoff {
    Backoff {
        base: Duration::from_secs(1),
        max: Duration::from_secs(30),
        jitter: Duration::ZERO,
        max_attempts,
    }
}
