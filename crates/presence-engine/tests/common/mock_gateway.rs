#![allow(dead_code)]

//! In-memory gateway: each accepted connection hands the test a
//! [`ServerHandle`] to push frames and inspect what the client sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use presence_engine::error::TransportError;
use presence_engine::transport::{Connection, Connector};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    Fail,
}

#[derive(Clone)]
pub struct MockConnector {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    servers: mpsc::UnboundedSender<ServerHandle>,
}

impl MockConnector {
    /// Connect attempts follow `plans` in order; once exhausted every attempt
    /// fails.
    pub fn new(plans: Vec<Plan>) -> (Self, mpsc::UnboundedReceiver<ServerHandle>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            plans: Arc::new(Mutex::new(plans.into())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            servers,
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn connect(&self) -> Result<MockConnection, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Fail);
        match plan {
            Plan::Fail => Err(TransportError::Closed),
            Plan::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let _ = self.servers.send(ServerHandle {
                    inbound: Some(inbound_tx),
                    outbound: outbound_rx,
                    closed: Arc::clone(&closed),
                });
                Ok(MockConnection {
                    inbound: inbound_rx,
                    outbound: outbound_tx,
                    closed,
                })
            }
        }
    }
}

pub struct MockConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<(Instant, String)>,
    closed: Arc<AtomicBool>,
}

impl Connection for MockConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send((Instant::now(), text))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct ServerHandle {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<(Instant, String)>,
    closed: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn send(&self, frame: impl ToString) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(frame.to_string());
        }
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send(serde_json::json!({ "op": 1, "d": { "heartbeat_interval": interval_ms } }));
    }

    /// Server-side close: the client sees end of stream.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Next frame the client sent, with the instant it was sent.
    pub async fn next_frame(&mut self) -> Option<(Instant, Value)> {
        let (at, text) = self.outbound.recv().await?;
        Some((at, serde_json::from_str(&text).expect("client sent invalid JSON")))
    }

    /// Frames already sent, without waiting.
    pub fn drain(&mut self) -> Vec<(Instant, Value)> {
        let mut frames = Vec::new();
        while let Ok((at, text)) = self.outbound.try_recv() {
            frames.push((at, serde_json::from_str(&text).expect("client sent invalid JSON")));
        }
        frames
    }

    /// Whether the client closed its side.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn presence_update(status: &str, activity: Option<(&str, i64)>) -> Value {
    let activities = match activity {
        Some((name, start)) => serde_json::json!([{
            "type": 0,
            "name": name,
            "details": "Idle - main.rs",
            "timestamps": { "start": start }
        }]),
        None => serde_json::json!([]),
    };
    serde_json::json!({
        "op": 0,
        "t": "PRESENCE_UPDATE",
        "d": {
            "discord_user": { "id": "94490510688792576", "username": "someone" },
            "discord_status": status,
            "activities": activities
        }
    })
}
