//! The server stream hub: per-session bounded queues, age-based backpressure,
//! and request dispatch, grounded on `original_source/server/streamSession.cpp`
//! (per-session send/backpressure) and `streamServer.cpp`'s `onMessageReceived`
//! (request/command/hello dispatch) and `send`/`onChunkRead` (fan-out).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use snap_core::constants::SESSION_QUEUE_SOFT_CAP;
use snap_core::sample_format::SampleFormat;
use snap_core::wire::messages::{
    CommandPayload, HelloPayload, Message, MessageType, RequestPayload, ServerSettingsPayload,
    TimePayload, WireChunkPayload,
};
use tokio::sync::mpsc;

/// A message queued for a session's writer task. Chunks may be dropped by
/// age at send time (spec.md §4.4); control replies never are.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Chunk(WireChunkPayload),
    /// A reply to a request; `u16` is the request's id, echoed as `refers_to`.
    Control(Message, u16),
}

/// Per-connection shared state, reachable both from that connection's reader
/// task (to answer requests) and from the hub's fan-out loop (to push
/// chunks).
pub struct SessionHandle {
    pub id: u64,
    pub peer: std::net::SocketAddr,
    pub stream_active: AtomicBool,
    pub buffer_ms: AtomicU32,
    pub mac: RwLock<Option<String>>,
    tx: mpsc::Sender<Outgoing>,
}

impl SessionHandle {
    /// Queues a reply to request `refers_to`. Waits for room rather than
    /// dropping — control traffic is low-volume and must not be silently
    /// lost the way stale audio chunks are.
    pub async fn send_control(&self, msg: Message, refers_to: u16) -> bool {
        self.tx.send(Outgoing::Control(msg, refers_to)).await.is_ok()
    }

    /// Queues a chunk for fan-out. Drops it immediately if the session's
    /// queue is already at its soft cap — the age check in the writer task
    /// handles the common case; this handles a writer that's stalled hard
    /// enough to back the whole queue up.
    fn try_send_chunk(&self, payload: WireChunkPayload) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(Outgoing::Chunk(payload)) {
            log::debug!("session {} queue full, dropping chunk", self.id);
        }
    }
}

/// Shared hub state: the active source format, the active encoder's cached
/// header, and the live session table.
pub struct StreamHub {
    pub codec_name: RwLock<String>,
    pub format: RwLock<SampleFormat>,
    pub codec_header: RwLock<Bytes>,
    pub default_buffer_ms: u32,
    sessions: DashMap<u64, Arc<SessionHandle>>,
    next_id: AtomicU64,
}

impl StreamHub {
    #[must_use]
    pub fn new(format: SampleFormat, codec_name: String, default_buffer_ms: u32) -> Self {
        Self {
            codec_name: RwLock::new(codec_name),
            format: RwLock::new(format),
            codec_header: RwLock::new(Bytes::new()),
            default_buffer_ms,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_codec_header(&self, header: Bytes) {
        *self.codec_header.write() = header;
    }

    /// Registers a new connection, returning its handle and the receiving
    /// end of its outgoing queue (consumed by that connection's writer task).
    pub fn register_session(&self, peer: std::net::SocketAddr) -> (Arc<SessionHandle>, mpsc::Receiver<Outgoing>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_SOFT_CAP);
        let handle = Arc::new(SessionHandle {
            id,
            peer,
            stream_active: AtomicBool::new(false),
            buffer_ms: AtomicU32::new(self.default_buffer_ms),
            mac: RwLock::new(None),
            tx,
        });
        self.sessions.insert(id, handle.clone());
        (handle, rx)
    }

    pub fn unregister_session(&self, id: u64) {
        self.sessions.remove(&id);
    }

    /// Fans a freshly encoded chunk out to every session with `stream_active`
    /// set. Age-based dropping happens later, in each session's writer task,
    /// against that session's own `buffer_ms`.
    pub fn broadcast_chunk(&self, payload: WireChunkPayload) {
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.stream_active.load(Ordering::Relaxed) {
                session.try_send_chunk(payload.clone());
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Builds the reply for a `Request` message (spec.md §4.4 / SPEC_FULL.md
    /// §4.4's request-dispatch supplement): `Time` is answered with the
    /// server's own observed one-way latency for *that* request, everything
    /// else is answered from cached hub state.
    pub fn handle_request(&self, req: RequestPayload, recv_sent_latency_us: i64) -> Option<Message> {
        match req.requested {
            MessageType::Time => {
                let (latency_sec, latency_usec) = split_signed_us(recv_sent_latency_us);
                Some(Message::Time(TimePayload {
                    latency_sec,
                    latency_usec,
                }))
            }
            MessageType::ServerSettings => Some(Message::ServerSettings(ServerSettingsPayload {
                buffer_ms: self.default_buffer_ms,
                latency_ms: 0,
            })),
            MessageType::SampleFormat => {
                Some(Message::SampleFormat(snap_core::wire::messages::SampleFormatPayload {
                    format: *self.format.read(),
                }))
            }
            MessageType::CodecHeader => Some(Message::CodecHeader(snap_core::wire::messages::CodecHeaderPayload {
                codec: self.codec_name.read().clone(),
                payload: self.codec_header.read().clone(),
            })),
            _ => None,
        }
    }

    /// Handles a `Command` message. Only `"startStream"` is defined by the
    /// spec; it flips the session active and is acknowledged.
    pub fn handle_command(&self, session: &SessionHandle, cmd: &CommandPayload) -> Option<Message> {
        if cmd.command == "startStream" {
            session.stream_active.store(true, Ordering::Relaxed);
            Some(Message::Ack)
        } else {
            log::warn!("unknown command {:?} from {}", cmd.command, session.peer);
            None
        }
    }

    /// Records a client's self-identification. The original also notifies a
    /// control plane here; this crate has no such surface (see DESIGN.md),
    /// so this is just a log line plus bookkeeping.
    pub fn handle_hello(&self, session: &SessionHandle, hello: &HelloPayload) {
        *session.mac.write() = hello.mac().map(str::to_string);
        log::info!(
            "hello from {}: mac={:?} host={:?} version={:?}",
            session.peer,
            hello.mac(),
            hello.host_name(),
            hello.version()
        );
    }
}

/// Splits a signed microsecond duration into the wire's `(sec, usec)` pair,
/// matching `WallClock::to_sec_usec`'s normalization.
fn split_signed_us(us: i64) -> (i32, i32) {
    let sec = us.div_euclid(1_000_000);
    let usec = us.rem_euclid(1_000_000);
    (sec as i32, usec as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> StreamHub {
        StreamHub::new(SampleFormat::default(), "pcm".to_string(), 1_000)
    }

    #[test]
    fn time_request_echoes_observed_latency() {
        let hub = hub();
        let reply = hub
            .handle_request(
                RequestPayload {
                    requested: MessageType::Time,
                },
                2_500,
            )
            .unwrap();
        match reply {
            Message::Time(p) => assert_eq!(p.latency_us(), 2_500),
            _ => panic!("expected Time reply"),
        }
    }

    #[test]
    fn server_settings_request_returns_default_buffer() {
        let hub = hub();
        let reply = hub
            .handle_request(
                RequestPayload {
                    requested: MessageType::ServerSettings,
                },
                0,
            )
            .unwrap();
        match reply {
            Message::ServerSettings(p) => assert_eq!(p.buffer_ms, 1_000),
            _ => panic!("expected ServerSettings reply"),
        }
    }

    #[tokio::test]
    async fn register_and_unregister_session() {
        let hub = hub();
        assert_eq!(hub.session_count(), 0);
        let (handle, _rx) = hub.register_session("127.0.0.1:1704".parse().unwrap());
        assert_eq!(hub.session_count(), 1);
        hub.unregister_session(handle.id);
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn split_signed_us_handles_negative() {
        assert_eq!(split_signed_us(-1_250), (-1, 998_750));
    }
}
