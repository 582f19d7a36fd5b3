//! The client state machine: connect, handshake, stream, and reconnect on
//! failure, grounded on `original_source/client/controller.cpp/.h`.
//!
//! Modeled as a loop over `run_session` rather than an explicit enum — each
//! iteration walks `Connecting → Handshaking → Streaming` and returns on any
//! fatal error, at which point the outer loop waits out [`RECONNECT_GRACE_MS`]
//! and tries again. There is no persistent "Disconnected" state to represent:
//! the gap between one iteration ending and the next beginning *is*
//! disconnected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use snap_core::clock::TimeEstimator;
use snap_core::constants::{
    DECODE_FAILURE_STREAK_LIMIT, RECONNECT_GRACE_MS, SINK_FAILURE_TEARDOWN_SECS, TIME_SYNC_BURST_COUNT,
    TIME_SYNC_BURST_SPACING_US, TIME_SYNC_OPPORTUNISTIC_MIN_INTERVAL_MS, TIME_SYNC_STEADY_INTERVAL_MS,
};
use snap_core::error::{SnapError, SnapResult};
use snap_core::wire::messages::{
    CodecHeaderPayload, Message, MessageType, ServerSettingsPayload, TimePayload,
};
use snap_core::wire::time::WallClock;
use snap_core::{Decoder, SampleFormat};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::jitter_buffer::JitterBuffer;
use crate::sink::{CpalSink, Sink};

/// Runs the client forever: connect, stream, and reconnect after any fatal
/// error until the process is killed.
pub async fn run(config: ClientConfig) {
    loop {
        match run_session(&config).await {
            Ok(()) => log::info!("session ended cleanly"),
            Err(e) => log::warn!("session ended: {e}"),
        }
        tokio::time::sleep(Duration::from_millis(RECONNECT_GRACE_MS)).await;
    }
}

async fn run_session(config: &ClientConfig) -> SnapResult<()> {
    let addr = resolve_addr(config).await?;
    log::info!("connecting to {addr}");
    let (conn, mut unsolicited_rx) = Connection::connect(addr).await?;

    let host_name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    conn.send_hello(&config.client_id(), &host_name, env!("CARGO_PKG_VERSION")).await?;

    let settings = expect_server_settings(conn.request(MessageType::ServerSettings).await?)?;
    let source_format = expect_sample_format(conn.request(MessageType::SampleFormat).await?)?;
    let codec_header = expect_codec_header(conn.request(MessageType::CodecHeader).await?)?;
    log::info!(
        "negotiated buffer_ms={} codec={}",
        settings.buffer_ms,
        codec_header.codec
    );

    let mut decoder = snap_core::make_decoder(&codec_header.codec)?;
    let header_format = decoder.set_header(&codec_header.payload)?;
    let codec_name = static_codec_name(&codec_header.codec);
    // Self-describing codecs (flac/opus/ogg) recover the real format from
    // their own header; pcm's header is empty, so it falls back to
    // `SampleFormat::default()` and the explicit `SampleFormat` reply above
    // (spec.md §6's handshake order) is the only source of truth for it.
    let format = if codec_name == "pcm" { source_format } else { header_format };

    let estimator = Arc::new(TimeEstimator::new());
    time_sync_burst(&conn, &estimator).await;
    log::info!("time sync burst complete, offset={}us", estimator.offset_us());

    let jitter = Arc::new(Mutex::new(JitterBuffer::new(
        format,
        settings.buffer_ms,
        config.latency_offset_ms,
        estimator.clone(),
    )));

    let sink = CpalSink::open(jitter.clone(), format, config.sink.as_deref())?;
    let mut sink_failed = sink.failed();

    conn.send_command("startStream").await?;

    let mut steady_timer = tokio::time::interval(Duration::from_millis(TIME_SYNC_STEADY_INTERVAL_MS));
    steady_timer.tick().await; // first tick fires immediately

    let mut decode_failure_streak: u32 = 0;
    // Every message on `unsolicited_rx` is, by construction, a non-Time
    // message (Time replies are correlated away by the request table before
    // they ever reach this channel); spec.md §4.6's "opportunistically after
    // any non-Time message" throttle therefore applies to this whole branch.
    let opportunistic_interval = Duration::from_millis(TIME_SYNC_OPPORTUNISTIC_MIN_INTERVAL_MS);
    let mut last_opportunistic = tokio::time::Instant::now() - opportunistic_interval;

    loop {
        tokio::select! {
            biased;

            changed = sink_failed.changed() => {
                changed.map_err(|_| SnapError::Sink("sink watch channel closed".into()))?;
                if *sink_failed.borrow() {
                    return Err(SnapError::Sink(format!(
                        "no audio rendered for {SINK_FAILURE_TEARDOWN_SECS}s straight"
                    )));
                }
            }

            msg = unsolicited_rx.recv() => {
                let Some(msg) = msg else {
                    return Err(SnapError::Transport(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "connection reader task gone",
                    )));
                };
                if handle_unsolicited(msg, decoder.as_mut(), &jitter) {
                    decode_failure_streak = 0;
                } else {
                    decode_failure_streak += 1;
                    if decode_failure_streak >= DECODE_FAILURE_STREAK_LIMIT {
                        return Err(SnapError::Decode {
                            codec: codec_name,
                            message: format!(
                                "{DECODE_FAILURE_STREAK_LIMIT} consecutive chunks failed to decode"
                            ),
                        });
                    }
                }

                let now = tokio::time::Instant::now();
                if now.duration_since(last_opportunistic) >= opportunistic_interval {
                    last_opportunistic = now;
                    if let Ok((sent, received, payload)) = conn.measure_time().await {
                        fold_time_sample(&estimator, sent, received, payload);
                    }
                }
            }

            _ = steady_timer.tick() => {
                if let Ok((sent, received, payload)) = conn.measure_time().await {
                    fold_time_sample(&estimator, sent, received, payload);
                }
            }
        }
    }
}

/// Handles one unsolicited message. Returns `true` if it was a chunk that
/// decoded successfully (or a non-chunk message we simply ignore), `false` if
/// it was a chunk that failed to decode — the caller escalates after
/// [`DECODE_FAILURE_STREAK_LIMIT`] consecutive failures (spec.md §7).
fn handle_unsolicited(msg: Message, decoder: &mut dyn Decoder, jitter: &Mutex<JitterBuffer>) -> bool {
    match msg {
        Message::WireChunk(chunk) => match decoder.decode(&chunk.payload, chunk.timestamp) {
            Ok(pcm) => {
                jitter.lock().push(pcm);
                true
            }
            Err(e) => {
                log::warn!("decode failed: {e}");
                false
            }
        },
        other => {
            log::debug!("ignoring unsolicited {:?} mid-stream", other.message_type());
            true
        }
    }
}

/// Maps the codec name negotiated at handshake time to the `&'static str`
/// `SnapError::Decode` expects, so a decode-failure escalation doesn't need to
/// allocate or borrow from the handshake payload across the session loop.
fn static_codec_name(name: &str) -> &'static str {
    match name {
        "flac" => "flac",
        "opus" => "opus",
        "ogg" => "ogg",
        "pcm" => "pcm",
        _ => "null",
    }
}

async fn time_sync_burst(conn: &Connection, estimator: &TimeEstimator) {
    for _ in 0..TIME_SYNC_BURST_COUNT {
        match conn.measure_time().await {
            Ok((sent, received, payload)) => fold_time_sample(estimator, sent, received, payload),
            Err(e) => log::debug!("time sync sample failed: {e}"),
        }
        tokio::time::sleep(Duration::from_micros(TIME_SYNC_BURST_SPACING_US)).await;
    }
}

/// Folds one `Time` round trip into the estimator: `half_diff_us` is half the
/// difference between the server's observed one-way latency for this
/// request and this process's own measured round trip, matching
/// `TimeEstimator`'s documented scenario.
fn fold_time_sample(estimator: &TimeEstimator, sent: WallClock, received: WallClock, payload: TimePayload) {
    let local_rtt_us = received.diff_micros(sent);
    let half_diff_us = (payload.latency_us() - local_rtt_us) / 2;
    estimator.observe(half_diff_us, received);
}

async fn resolve_addr(config: &ClientConfig) -> SnapResult<SocketAddr> {
    tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(SnapError::Transport)?
        .next()
        .ok_or_else(|| SnapError::Config(format!("could not resolve host {}", config.host)))
}

fn expect_server_settings(msg: Message) -> SnapResult<ServerSettingsPayload> {
    match msg {
        Message::ServerSettings(p) => Ok(p),
        other => Err(SnapError::Protocol(format!(
            "expected ServerSettings reply, got {:?}",
            other.message_type()
        ))),
    }
}

fn expect_sample_format(msg: Message) -> SnapResult<SampleFormat> {
    match msg {
        Message::SampleFormat(p) => Ok(p.format),
        other => Err(SnapError::Protocol(format!(
            "expected SampleFormat reply, got {:?}",
            other.message_type()
        ))),
    }
}

fn expect_codec_header(msg: Message) -> SnapResult<CodecHeaderPayload> {
    match msg {
        Message::CodecHeader(p) => Ok(p),
        other => Err(SnapError::Protocol(format!(
            "expected CodecHeader reply, got {:?}",
            other.message_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_time_sample_matches_documented_scenario() {
        let estimator = TimeEstimator::new();
        let sent = WallClock::from_sec_usec(10, 0);
        let received = WallClock::from_sec_usec(10, 5_000);
        let payload = TimePayload {
            latency_sec: 0,
            latency_usec: 2_500,
        };
        fold_time_sample(&estimator, sent, received, payload);
        assert_eq!(estimator.offset_us(), -1_250);
    }

    #[test]
    fn expect_server_settings_rejects_wrong_type() {
        assert!(expect_server_settings(Message::Ack).is_err());
    }

    #[test]
    fn expect_codec_header_rejects_wrong_type() {
        assert!(expect_codec_header(Message::Ack).is_err());
    }

    #[test]
    fn expect_sample_format_rejects_wrong_type() {
        assert!(expect_sample_format(Message::Ack).is_err());
    }

    #[test]
    fn expect_sample_format_extracts_format() {
        let format = SampleFormat::new(44_100, 24, 1);
        let msg = Message::SampleFormat(snap_core::wire::messages::SampleFormatPayload { format });
        assert_eq!(expect_sample_format(msg).unwrap(), format);
    }

    #[test]
    fn static_codec_name_maps_known_codecs() {
        assert_eq!(static_codec_name("flac"), "flac");
        assert_eq!(static_codec_name("opus"), "opus");
        assert_eq!(static_codec_name("ogg"), "ogg");
        assert_eq!(static_codec_name("pcm"), "pcm");
        assert_eq!(static_codec_name("mp3"), "null");
    }

    struct AlwaysFailsDecoder;

    impl Decoder for AlwaysFailsDecoder {
        fn set_header(&mut self, _header: &[u8]) -> SnapResult<snap_core::SampleFormat> {
            unreachable!("not exercised by this test")
        }

        fn decode(&mut self, _payload: &[u8], _timestamp: WallClock) -> SnapResult<snap_core::PcmChunk> {
            Err(SnapError::Decode {
                codec: "pcm",
                message: "synthetic failure".into(),
            })
        }
    }

    fn wire_chunk_at(timestamp: WallClock) -> Message {
        Message::WireChunk(snap_core::wire::messages::WireChunkPayload {
            timestamp,
            payload: bytes::Bytes::from_static(&[0u8; 4]),
        })
    }

    #[test]
    fn decode_failures_streak_to_the_configured_limit() {
        let format = snap_core::SampleFormat::new(48_000, 16, 2);
        let jitter = Mutex::new(JitterBuffer::new(
            format,
            1_000,
            0,
            Arc::new(TimeEstimator::new()),
        ));
        let mut decoder = AlwaysFailsDecoder;
        let mut streak: u32 = 0;
        let t0 = WallClock::from_sec_usec(0, 0);

        for _ in 0..DECODE_FAILURE_STREAK_LIMIT {
            let ok = handle_unsolicited(wire_chunk_at(t0), &mut decoder, &jitter);
            assert!(!ok);
            streak += 1;
        }
        assert_eq!(streak, DECODE_FAILURE_STREAK_LIMIT);
    }

    #[test]
    fn non_chunk_unsolicited_message_counts_as_success() {
        let jitter = Mutex::new(JitterBuffer::new(
            snap_core::SampleFormat::new(48_000, 16, 2),
            1_000,
            0,
            Arc::new(TimeEstimator::new()),
        ));
        let mut decoder = AlwaysFailsDecoder;
        assert!(handle_unsolicited(Message::Ack, &mut decoder, &jitter));
    }
}
