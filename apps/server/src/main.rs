//! snap-server — standalone headless server for the synchronized multi-room
//! audio streaming engine.
//!
//! Reads PCM from a configured [`source`], encodes it with the configured
//! codec, and fans the encoded chunks out to every connected client through
//! the [`hub`].

mod config;
mod hub;
mod session;
mod source;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snap_core::wire::messages::WireChunkPayload;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use crate::config::ServerConfig;
use crate::hub::StreamHub;
use crate::source::{Resync, SourceState, SourceUri};

/// snap-server — headless audio streaming server.
#[derive(Parser, Debug)]
#[command(name = "snap-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SNAP_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "SNAP_PORT")]
    port: Option<u16>,

    /// Source URI (overrides config file): `pipe://`, `file://`, or `process://`.
    #[arg(short = 's', long, env = "SNAP_SOURCE")]
    source: Option<String>,

    /// Codec name (overrides config file): `pcm`, `flac`, `ogg`, `opus`, `null`.
    #[arg(long)]
    codec: Option<String>,

    /// Codec-specific options string (overrides config file).
    #[arg(long)]
    codec_options: Option<String>,

    /// Default end-to-end buffer size in ms (overrides config file).
    #[arg(short = 'b', long, env = "SNAP_BUFFER_MS")]
    buffer_ms: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("snap-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(codec) = args.codec {
        config.codec = codec;
    }
    if let Some(codec_options) = args.codec_options {
        config.codec_options = codec_options;
    }
    if let Some(buffer_ms) = args.buffer_ms {
        config.buffer_ms = buffer_ms;
    }
    config.clamp_buffer_ms();

    let format = config.parse_sample_format().context("invalid sample_format")?;
    let source_uri = SourceUri::parse(&config.source).context("invalid source uri")?;

    log::info!(
        "format={format} codec={} source={} buffer_ms={}",
        config.codec,
        config.source,
        config.buffer_ms
    );

    let hub = Arc::new(StreamHub::new(format, config.codec.clone(), config.buffer_ms));

    let (chunk_tx, chunk_rx) = mpsc::channel(64);
    let (resync_tx, mut resync_rx) = mpsc::channel(16);
    let (state_tx, mut state_rx) = watch::channel(SourceState::Idle);

    let pcm_read_ms = config.pcm_read_ms;
    let source_task = tokio::task::spawn_blocking(move || {
        source::run_source(source_uri, format, pcm_read_ms, chunk_tx, resync_tx, state_tx)
    });

    let encode_task = tokio::spawn(run_encoder(
        hub.clone(),
        config.codec.clone(),
        config.codec_options.clone(),
        format,
        chunk_rx,
    ));

    tokio::spawn(async move {
        while resync_rx.recv().await.is_some() {
            log::debug!("source resync event");
        }
    });
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            log::info!("source state: {:?}", *state_rx.borrow());
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    log::info!("listening on 0.0.0.0:{}", config.port);

    let accept_task = tokio::spawn(session::accept_loop(listener, hub.clone()));

    shutdown_signal().await;
    log::info!("shutdown signal received");

    source_task.abort();
    encode_task.abort();
    accept_task.abort();
    Ok(())
}

/// Drains decoded PCM periods, encodes them, and fans the result out to the
/// hub. Captures the encoder's header on its first non-empty output.
async fn run_encoder(
    hub: Arc<StreamHub>,
    codec: String,
    codec_options: String,
    format: snap_core::sample_format::SampleFormat,
    mut chunk_rx: mpsc::Receiver<snap_core::PcmChunk>,
) {
    let mut encoder = match snap_core::make_encoder(&codec, format, &codec_options) {
        Ok(e) => e,
        Err(e) => {
            log::error!("failed to build encoder {codec}: {e}");
            return;
        }
    };

    while let Some(chunk) = chunk_rx.recv().await {
        let encoded = match encoder.encode(&chunk) {
            Ok(chunks) => chunks,
            Err(e) => {
                log::warn!("encode failed: {e}");
                continue;
            }
        };
        if !encoded.is_empty() && hub.codec_header.read().is_empty() {
            hub.set_codec_header(encoder.header());
        }
        for piece in encoded {
            hub.broadcast_chunk(WireChunkPayload {
                timestamp: piece.timestamp,
                payload: piece.payload,
            });
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
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
