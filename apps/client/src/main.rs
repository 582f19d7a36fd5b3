//! snap-client — standalone player client for the synchronized multi-room
//! audio streaming engine.
//!
//! Connects to a `snap-server`, negotiates format/codec/buffer, keeps its
//! clock aligned to the server's, and renders the stream through a local
//! audio sink, reconnecting automatically on any fatal error.

mod config;
mod connection;
mod controller;
mod jitter_buffer;
mod sink;
mod wire_io;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::ClientConfig;

/// snap-client — synchronized audio player client.
#[derive(Parser, Debug)]
#[command(name = "snap-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SNAP_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Server host (overrides config file).
    #[arg(short = 'H', long, env = "SNAP_HOST")]
    host: Option<String>,

    /// Server port (overrides config file).
    #[arg(short = 'p', long, env = "SNAP_PORT")]
    port: Option<u16>,

    /// Requested end-to-end buffer size in ms (overrides config file).
    #[arg(short = 'b', long, env = "SNAP_BUFFER_MS")]
    buffer_ms: Option<u32>,

    /// Fixed latency offset in ms, positive or negative (overrides config file).
    #[arg(long)]
    latency_offset_ms: Option<i64>,

    /// Output device name (overrides config file); default device if unset.
    #[arg(long)]
    sink: Option<String>,

    /// Stable client identifier sent in the handshake (overrides config file).
    #[arg(long)]
    client_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("snap-client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(buffer_ms) = args.buffer_ms {
        config.buffer_ms = buffer_ms;
    }
    if let Some(latency_offset_ms) = args.latency_offset_ms {
        config.latency_offset_ms = latency_offset_ms;
    }
    if args.sink.is_some() {
        config.sink = args.sink;
    }
    if args.client_id.is_some() {
        config.client_id = args.client_id;
    }

    tokio::select! {
        _ = controller::run(config) => {}
        _ = shutdown_signal() => {
            log::info!("shutdown signal received");
        }
    }

    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
