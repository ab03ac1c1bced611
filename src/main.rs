//! Sidecar Observer Runtime entry point.
//!
//! Loads config, starts the logger and metrics recorder, constructs the
//! `Sidecar`, serves the HTTP surface, and waits for SIGINT/SIGTERM to
//! begin a graceful drain, via `tokio::signal::unix::signal` +
//! `watch::channel` feeding the sidecar's `start()`/`shutdown()` pair.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use sidecar_observer::config;
use sidecar_observer::logging;
use sidecar_observer::metrics::Metrics;
use sidecar_observer::sidecar::Sidecar;
use sidecar_observer::sink::NullSink;

/// Sidecar Observer Runtime: fail-open event ingestion and health
/// reporting for test executions.
#[derive(Parser, Debug, Clone)]
#[command(name = "sidecar-observer")]
#[command(about = "Fail-open, bounded-resource event ingestion sidecar")]
struct Args {
    /// Path to the YAML config file.
    #[arg(short, long, env = "SIDECAR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level fallback when RUST_LOG is unset.
    #[arg(long, env = "SIDECAR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// HTTP bind address override (defaults come from config).
    #[arg(long, env = "SIDECAR_HEALTH_BIND")]
    bind: Option<String>,

    /// HTTP port override.
    #[arg(long, env = "SIDECAR_HEALTH_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => config::load(path).context("failed to load config file")?,
        None => config::Config::default(),
    };
    if let Some(bind) = &args.bind {
        cfg.health.bind = bind.clone();
    }
    if let Some(port) = args.port {
        cfg.health.port = port;
    }

    let metrics = Arc::new(Metrics::new());
    let _logger = logging::init(&args.log_level, metrics.clone());

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info!(
        host = %host,
        config_path = ?args.config,
        bind = %cfg.health.bind,
        port = cfg.health.port,
        "starting sidecar-observer"
    );

    // NullSink: persistence is an external collaborator; embedders
    // construct their own `Sidecar` with a real `Sink` directly.
    let sidecar = Sidecar::new(cfg.clone(), Arc::new(NullSink));
    sidecar.start().await;

    let addr: SocketAddr = format!("{}:{}", cfg.health.bind, cfg.health.port)
        .parse()
        .context("invalid health bind address")?;
    let app = sidecar_observer::http::router(sidecar.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_requested_clone = shutdown_requested.clone();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
        }
        shutdown_requested_clone.store(true, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);
    });

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });

    tracing::info!(addr = %addr, "health server listening");
    server.await.context("health server error")?;

    sidecar.shutdown().await;
    tracing::info!("sidecar stopped");
    Ok(())
}
