//! Engine: wires the gateway, poller and tickers to one store and tears
//! them down in order.
use std::sync::Arc;

use presence_proto::config::Config;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::MediaClock;
use crate::error::EngineError;
use crate::gateway::GatewayClient;
use crate::poller::MediaPoller;
use crate::store::AggregationStore;
use crate::transport::{Connector, WsConnector};

pub struct Engine {
    store: Arc<AggregationStore>,
    gateway: GatewayClient,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Engine {
    /// Start against the configured websocket gateway.
    pub async fn start(config: &Config, store: Arc<AggregationStore>) -> Result<Self, EngineError> {
        let connector = WsConnector::new(config.gateway.url.clone());
        Self::start_with_connector(config, store, connector).await
    }

    pub async fn start_with_connector<C: Connector>(
        config: &Config,
        store: Arc<AggregationStore>,
        connector: C,
    ) -> Result<Self, EngineError> {
        let subscription_id = config.gateway.subscription_id.trim();
        if subscription_id.is_empty() {
            return Err(EngineError::MissingSubscription);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if config.media.enabled {
            let poller = MediaPoller::new(&config.media, Arc::clone(&store))?;
            tasks.push(("media poller", tokio::spawn(poller.run(cancel.clone()))));

            let clock = MediaClock::new(Arc::clone(&store), config.clock.media_tick());
            tasks.push(("media clock", tokio::spawn(clock.run(cancel.clone()))));
        } else {
            info!("Engine: media polling disabled");
        }

        tasks.push((
            "label ticker",
            tokio::spawn(Arc::clone(&store).run_label_ticker(config.clock.presence_tick(), cancel.clone())),
        ));

        let mut gateway = GatewayClient::new(&config.gateway, Arc::clone(&store));
        gateway.connect(connector, subscription_id).await;

        info!("Engine: started ({} background tasks)", tasks.len());
        Ok(Self {
            store,
            gateway,
            cancel,
            tasks,
        })
    }

    pub fn store(&self) -> &Arc<AggregationStore> {
        &self.store
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// A token that fires when the engine shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop heartbeats and reconnects, then the timers, then seal the store.
    /// No subscriber is invoked after this returns.
    pub async fn shutdown(mut self) {
        info!("Engine: shutting down");
        self.gateway.disconnect().await;
        self.cancel.cancel();
        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                error!("Engine: {} task failed: {}", name, e);
            }
        }
        self.store.dispose().await;
        info!("Engine: stopped");
    }
}
