//! Basement Proxy - resolves remote images to data URIs through a bounded,
//! disk-backed cache
//!
//! Each `src` is fetched at most once while its entry stays resident; later
//! requests are answered from memory or from the on-disk store.

mod config;
mod error;
mod fetcher;
mod server;
mod types;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::fetcher::DataUriFetcher;
use crate::server::{start_server, ServerState, SharedState};
use basement::{BoundedCache, FsStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("basement_proxy=info".parse()?)
        .add_directive("basement=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Basement Proxy...");

    let config = ProxyConfig::from_env();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache limit: {} entries", config.limit);
    info!("Fetch timeout: {} seconds", config.fetch_timeout_secs);

    let store = FsStore::new(config.cache_dir);
    let cache = BoundedCache::new(store, config.limit)
        .map_err(|e| ProxyError::Config(format!("BASEMENT_LIMIT: {}", e)))?;

    let fetcher = DataUriFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?;

    let state: SharedState = Arc::new(ServerState::new(cache, fetcher));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
