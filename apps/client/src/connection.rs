//! Client connection: reader/writer tasks sharing a table of pending
//! requests, grounded on `original_source/client/clientConnection.cpp`.
//!
//! The reader task owns the socket's read half and loops decoding framed
//! messages; the writer task owns the write half and loops sending queued
//! ones. A message whose `refers_to` matches a pending request's id is
//! delivered to that request's waiter and nothing else; every other message
//! is forwarded to the connection's default handler channel (consumed by the
//! controller / jitter buffer).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use snap_core::constants::{REQUEST_CUMULATIVE_TIMEOUT_MS, REQUEST_ID_WRAP, REQUEST_TIMEOUT_MS};
use snap_core::error::{SnapError, SnapResult};
use snap_core::wire::messages::{CommandPayload, HelloPayload, Message, MessageType, RequestPayload, TimePayload};
use snap_core::wire::time::WallClock;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};

use crate::wire_io::{read_message, write_message};

type PendingTable = Arc<Mutex<HashMap<u16, oneshot::Sender<Message>>>>;

/// A live connection to the server: owns no socket state directly (that
/// lives in the spawned reader/writer tasks) but exposes request/send
/// methods and the channel of messages the default handler receives.
pub struct Connection {
    outgoing: mpsc::Sender<(Message, u16, u16)>,
    pending: PendingTable,
    next_id: Mutex<u16>,
    cumulative_timeout_ms: AtomicU64,
}

impl Connection {
    /// Opens a TCP connection and spawns its reader/writer tasks. Returns
    /// the connection handle plus the channel of unsolicited (non-reply)
    /// messages for the caller to dispatch.
    pub async fn connect(addr: SocketAddr) -> SnapResult<(Arc<Self>, mpsc::Receiver<Message>)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (outgoing_tx, outgoing_rx) = mpsc::channel(256);
        let (unsolicited_tx, unsolicited_rx) = mpsc::channel(256);

        tokio::spawn(run_writer(write_half, outgoing_rx));
        tokio::spawn(run_reader(read_half, pending.clone(), unsolicited_tx));

        let connection = Arc::new(Self {
            outgoing: outgoing_tx,
            pending,
            next_id: Mutex::new(1),
            cumulative_timeout_ms: AtomicU64::new(0),
        });
        Ok((connection, unsolicited_rx))
    }

    /// Allocates the next request id: a wrapping counter in `[1, REQUEST_ID_WRAP)`
    /// (0 is reserved for "no reply expected").
    fn next_request_id(&self) -> u16 {
        let mut id = self.next_id.lock();
        let current = *id;
        *id = (current % (REQUEST_ID_WRAP - 1)) + 1;
        current
    }

    /// Sends a request and waits up to [`REQUEST_TIMEOUT_MS`] for its reply.
    /// A timeout advances the connection's cumulative timeout counter; once
    /// that exceeds [`REQUEST_CUMULATIVE_TIMEOUT_MS`] the connection is
    /// declared broken (`SnapError::Clock`), matching spec.md §4.5.
    pub async fn request(&self, requested: MessageType) -> SnapResult<Message> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let msg = Message::Request(RequestPayload { requested });
        if self.outgoing.send((msg, id, 0)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(SnapError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "writer task gone",
            )));
        }

        match tokio::time::timeout(Duration::from_millis(REQUEST_TIMEOUT_MS), rx).await {
            Ok(Ok(reply)) => {
                self.cumulative_timeout_ms.store(0, Ordering::Relaxed);
                Ok(reply)
            }
            Ok(Err(_)) => Err(SnapError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reader task gone",
            ))),
            Err(_) => {
                self.pending.lock().remove(&id);
                let total = self.cumulative_timeout_ms.fetch_add(REQUEST_TIMEOUT_MS, Ordering::Relaxed) + REQUEST_TIMEOUT_MS;
                if total >= REQUEST_CUMULATIVE_TIMEOUT_MS {
                    Err(SnapError::Clock(format!(
                        "cumulative request timeout {total}ms exceeded {REQUEST_CUMULATIVE_TIMEOUT_MS}ms"
                    )))
                } else {
                    Err(SnapError::Transport(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "request timed out",
                    )))
                }
            }
        }
    }

    /// Sends a `Time` request and measures it against the local clock on
    /// both ends, for folding into a [`snap_core::clock::TimeEstimator`].
    /// Returns `(sent, received, payload)`; `sent`/`received` are this
    /// process's own clock, straddling the round trip.
    pub async fn measure_time(&self) -> SnapResult<(WallClock, WallClock, TimePayload)> {
        let sent = WallClock::now();
        let reply = self.request(MessageType::Time).await?;
        let received = WallClock::now();
        match reply {
            Message::Time(payload) => Ok((sent, received, payload)),
            _ => Err(SnapError::Protocol("expected Time reply to Time request".into())),
        }
    }

    /// Sends an unsolicited message (no reply expected): `Hello` or
    /// `Command`.
    pub async fn send_unsolicited(&self, msg: Message) -> SnapResult<()> {
        self.outgoing
            .send((msg, 0, 0))
            .await
            .map_err(|_| SnapError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer task gone")))
    }

    pub async fn send_hello(&self, mac: &str, host_name: &str, version: &str) -> SnapResult<()> {
        self.send_unsolicited(Message::Hello(HelloPayload::new(mac, host_name, version)))
            .await
    }

    pub async fn send_command(&self, command: &str) -> SnapResult<()> {
        self.send_unsolicited(Message::Command(CommandPayload {
            command: command.to_string(),
        }))
        .await
    }
}

async fn run_writer(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<(Message, u16, u16)>) {
    while let Some((msg, id, refers_to)) = rx.recv().await {
        if let Err(e) = write_message(&mut writer, &msg, id, refers_to).await {
            log::debug!("writer task stopping: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn run_reader(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    pending: PendingTable,
    unsolicited_tx: mpsc::Sender<Message>,
) {
    loop {
        match read_message(&mut reader).await {
            Ok((header, msg)) => {
                if header.refers_to != 0 {
                    if let Some(tx) = pending.lock().remove(&header.refers_to) {
                        let _ = tx.send(msg);
                        continue;
                    }
                }
                if unsolicited_tx.send(msg).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                log::debug!("reader task stopping: {e}");
                return;
            }
        }
    }
}
