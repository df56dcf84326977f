use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use presence_engine::engine::Engine;
use presence_engine::http;
use presence_engine::store::{AggregationStore, Snapshot};
use presence_proto::config::Config;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "presenced", about = "Live presence + now-playing aggregator")]
struct Args {
    /// Identity to subscribe to (overrides gateway.subscription_id).
    #[arg(long)]
    subscription_id: Option<String>,

    /// Config file (default: <config dir>/presence/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not start the local JSON API.
    #[arg(long)]
    no_http: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = presence_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("presenced.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,presence_engine=debug,hyper_util=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("presenced log: {}", log_path.display());
    info!("presenced starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            error!("Config: falling back to defaults: {:#}", e);
            Config::default()
        }),
    };
    if let Some(id) = args.subscription_id {
        config.gateway.subscription_id = id;
    }
    if args.no_http {
        config.http.enabled = false;
    }

    // ── Store + console subscriber ───────────────────────────────────────────
    let store = AggregationStore::new(config.media.search_url.clone());
    let last_line = Mutex::new(String::new());
    let _console = store.subscribe(move |snapshot| {
        let line = status_line(snapshot);
        let Ok(mut last) = last_line.lock() else {
            return;
        };
        if *last != line {
            println!("{}", line);
            *last = line;
        }
    });

    // ── Engine ───────────────────────────────────────────────────────────────
    let engine = Engine::start(&config, store.clone()).await?;

    // ── HTTP server ──────────────────────────────────────────────────────────
    let server = config.http.enabled.then(|| {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            store.clone(),
            engine.cancellation(),
        )
    });

    tokio::signal::ctrl_c().await?;
    info!("presenced: interrupt received");

    engine.shutdown().await;
    if let Some(server) = server {
        if let Err(e) = server.await {
            error!("presenced: HTTP server task failed: {}", e);
        }
    }
    Ok(())
}

fn status_line(snapshot: &Snapshot) -> String {
    let status = if snapshot.gateway_lost {
        "unknown"
    } else {
        snapshot.presence.status.as_str()
    };

    let mut line = format!("[{}]", status);
    let presence = &snapshot.view.presence;
    if !presence.headline.is_empty() {
        line.push(' ');
        line.push_str(&presence.headline);
        if !presence.detail_line.is_empty() {
            line.push_str(&format!(" ({})", presence.detail_line));
        }
    }

    if let Some(track) = snapshot.media.track.as_deref() {
        let media = &snapshot.view.media;
        line.push_str(&format!(" | {} by {}", track, media.artist_label));
        if !media.timeline_label.is_empty() {
            line.push_str(&format!(" {}", media.timeline_label));
        }
        if media.paused {
            line.push_str(" (paused)");
        }
    }
    line
}
