//! Presence aggregation engine.
//!
//! ```text
//!   gateway (ws) ──► GatewayClient ──normalize──┐
//!                                               ▼
//!   media endpoint ──► MediaPoller ──────► AggregationStore ──► subscribers
//!                                               ▲                  http api
//!                     MediaClock / label tick ──┘
//! ```
pub mod clock;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod http;
pub mod poller;
pub mod store;
pub mod transport;
