//! # MiniKV Server
//!
//! Provide a line-oriented TCP server over the in-memory engine, with the
//! mapping snapshotted to disk on a fixed interval.
//!
//! ## Design Principles
//!
//! 1. **Load Before Serve**: The snapshot is installed before the listener
//!    accepts its first connection.
//! 2. **Fail Fast at Startup**: A corrupt or unwritable snapshot file stops
//!    the process instead of serving ambiguous state.
//! 3. **Explicit Wiring**: Engine, metrics, and persistence are built here and
//!    passed down; nothing is global.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mkv_engine::{MemoryEngine, SnapshotFile};
use mkv_server::server::{self, Context};
use mkv_server::{Metrics, Persistence, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        host = %config.host,
        port = config.port,
        file = ?config.file,
        interval_ms = config.bg_save_interval.as_millis() as u64,
        version = env!("CARGO_PKG_VERSION"),
        "starting mkv-server"
    );

    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(MemoryEngine::new());
    let persistence = Arc::new(Persistence::new(
        Arc::clone(&engine),
        SnapshotFile::new(&config.file),
        Arc::clone(&metrics),
    ));

    let loaded = persistence
        .load()
        .await
        .with_context(|| format!("loading snapshot from {}", config.file.display()))?;
    info!(keys = loaded, "snapshot loaded");

    persistence
        .save_once()
        .await
        .with_context(|| format!("snapshot file {} is not writable", config.file.display()))?;

    let snapshotter = persistence.start_snapshotter(config.bg_save_interval);

    let addr = config
        .resolve_addr()
        .await
        .with_context(|| format!("resolving {}:{}", config.host, config.port))?;
    let listener =
        server::bind_listener(addr).with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let ctx = Arc::new(Context::new(engine, metrics));
    server::serve(listener, ctx, shutdown_signal()).await;

    snapshotter.stop().await;
    match persistence.save_once().await {
        Ok(report) => info!(keys = report.keys, bytes = report.bytes, "final snapshot saved"),
        Err(err) => error!(error = %err, "final snapshot failed"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}
