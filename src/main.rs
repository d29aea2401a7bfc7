//! feed-relay binary entrypoint.
//! Boots the relay service and the axum control API on a single-threaded
//! runtime.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_relay::config::{self, store::JsonFileStore};
use feed_relay::metrics::Metrics;
use feed_relay::nats::{ConnectionConfig, WsConnector};
use feed_relay::{api, RelayService};

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_STATE_DIR: &str = "state";

/// Compact logs by default; JSON lines when FEED_RELAY_LOG_JSON=1.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_relay=info,warn"));

    let json = std::env::var("FEED_RELAY_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init()?;

    let state_dir = std::env::var("FEED_RELAY_STATE_DIR").unwrap_or_else(|_| DEFAULT_STATE_DIR.into());
    let store = Arc::new(JsonFileStore::new(&state_dir));
    let seed = config::load_seed_default().context("loading seed config")?;

    let service = Arc::new(RelayService::new(
        store,
        Arc::new(WsConnector),
        ConnectionConfig::default(),
    ));
    service.bootstrap(seed).await?;

    let app = api::router(service.clone()).merge(metrics.router());

    let bind = std::env::var("FEED_RELAY_BIND").unwrap_or_else(|_| DEFAULT_BIND.into());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, state_dir = %state_dir, "feed-relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    service.shutdown().await;
    info!("feed-relay stopped");
    Ok(())
}
