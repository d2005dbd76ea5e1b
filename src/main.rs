//! glinewatch: tracks G-lines on IRC networks by watching server notices,
//! and answers lookups over an HTTP API and in-channel commands.

mod config;
mod engine;
mod error;
mod http;
mod parser;
mod proto;
mod session;

use crate::config::Config;
use crate::session::{Session, SessionRegistry};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&path).with_context(|| format!("loading {path}"))?;
    info!(config = %path, networks = config.networks.len(), "starting");

    let registry = Arc::new(SessionRegistry::new());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();

    for net in &config.networks {
        let session = Arc::new(Session::new(net.clone()));
        registry.insert(Arc::clone(&session))?;
        tokio::spawn(Arc::clone(&session).run(shutdown_tx.clone()));
    }
    drop(shutdown_tx);

    if config.http.enabled {
        let registry = Arc::clone(&registry);
        let listen = config.http.listen;
        tokio::spawn(async move {
            if let Err(err) = http::run_http_server(listen, registry).await {
                tracing::error!(%err, "http server failed");
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted, exiting"),
        _ = shutdown_rx.recv() => info!("shutdown command received, exiting"),
    }
    Ok(())
}
