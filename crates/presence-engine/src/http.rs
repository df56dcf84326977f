use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use presence_proto::media::MediaStatus;
use presence_proto::presence::Presence;
use presence_proto::view::{MediaView, PresenceView};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::gateway::GatewayState;
use crate::store::{AggregationStore, Snapshot};

#[derive(Serialize)]
struct ApiPresence {
    #[serde(flatten)]
    presence: Presence,
    view: PresenceView,
    gateway: GatewayState,
    /// Reconnects exhausted: render as "status unknown".
    status_unknown: bool,
}

#[derive(Serialize)]
struct ApiMedia {
    #[serde(flatten)]
    media: MediaStatus,
    view: MediaView,
}

/// Read-only JSON view of the store.
pub fn router(store: Arc<AggregationStore>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/presence", get(get_presence))
        .route("/api/media", get(get_media))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    store: Arc<AggregationStore>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(store);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("HTTP: failed to bind {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP: listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!("HTTP: server error: {}", e);
        }
    })
}

async fn get_state(State(store): State<Arc<AggregationStore>>) -> Json<Snapshot> {
    Json(store.snapshot().await)
}

async fn get_presence(State(store): State<Arc<AggregationStore>>) -> Json<ApiPresence> {
    let snapshot = store.snapshot().await;
    Json(ApiPresence {
        presence: snapshot.presence,
        view: snapshot.view.presence,
        gateway: snapshot.gateway,
        status_unknown: snapshot.gateway_lost,
    })
}

async fn get_media(State(store): State<Arc<AggregationStore>>) -> Json<ApiMedia> {
    let snapshot = store.snapshot().await;
    Json(ApiMedia {
        media: snapshot.media,
        view: snapshot.view.media,
    })
}
