//! Per-connection plumbing: wire framing over a `TcpStream`, and the
//! reader/writer task pair that back each [`crate::hub::SessionHandle`].
//!
//! Grounded on `original_source/server/streamSession.cpp` (the per-session
//! reader/writer split and the write-timeout teardown rule) and
//! `streamServer.cpp`'s `handleAccept`/`onMessageReceived` for the dispatch
//! this module feeds into.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use snap_core::constants::{HEADER_SIZE, SESSION_WRITE_TIMEOUT_SECS};
use snap_core::error::{SnapError, SnapResult};
use snap_core::wire::header::MessageHeader;
use snap_core::wire::messages::Message;
use snap_core::wire::time::WallClock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::hub::{Outgoing, StreamHub};

/// Reads one framed message: the fixed header, then its payload.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> SnapResult<(MessageHeader, Message)> {
    let mut header_buf = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = MessageHeader::decode(Bytes::from(header_buf))?;

    let mut payload_buf = vec![0u8; header.size as usize];
    reader.read_exact(&mut payload_buf).await?;
    let msg = Message::decode_payload(header.msg_type, Bytes::from(payload_buf))?;
    Ok((header, msg))
}

/// Writes one framed message. `MessageHeader::encode` stamps `sent` fresh at
/// the moment of write, satisfying the "writer re-stamps `sent_ts` on every
/// send" rule.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
    id: u16,
    refers_to: u16,
) -> SnapResult<()> {
    let mut payload_buf = BytesMut::new();
    msg.encode_payload(&mut payload_buf);

    let mut header = MessageHeader::new(msg.message_type(), payload_buf.len() as u32);
    header.id = id;
    header.refers_to = refers_to;

    let mut header_buf = BytesMut::new();
    header.encode(&mut header_buf);

    writer.write_all(&header_buf).await?;
    writer.write_all(&payload_buf).await?;
    Ok(())
}

async fn write_with_timeout<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
    id: u16,
    refers_to: u16,
) -> SnapResult<()> {
    timeout(
        Duration::from_secs(SESSION_WRITE_TIMEOUT_SECS),
        write_message(writer, msg, id, refers_to),
    )
    .await
    .map_err(|_| SnapError::Transport(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out")))?
}

/// Accepts connections forever, spawning a reader/writer task pair for each.
pub async fn accept_loop(listener: TcpListener, hub: Arc<StreamHub>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, hub).await {
                        log::debug!("connection {peer} closed: {e}");
                    }
                });
            }
            Err(e) => {
                log::warn!("accept failed: {e}");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: Arc<StreamHub>) -> SnapResult<()> {
    let _ = stream.set_nodelay(true);
    let (session, rx) = hub.register_session(peer);
    log::info!("client connected: {peer}");

    let (read_half, write_half) = stream.into_split();
    let writer_task = tokio::spawn(run_writer(write_half, rx, session.clone()));

    let result = run_reader(read_half, hub.clone(), session.clone()).await;

    hub.unregister_session(session.id);
    writer_task.abort();
    log::info!("client disconnected: {peer}");
    result
}

async fn run_reader(mut reader: OwnedReadHalf, hub: Arc<StreamHub>, session: Arc<crate::hub::SessionHandle>) -> SnapResult<()> {
    loop {
        let (header, msg) = read_message(&mut reader).await?;
        match msg {
            Message::Hello(hello) => hub.handle_hello(&session, &hello),
            Message::Request(req) => {
                let observed_latency_us = header.recv.diff_micros(header.sent);
                if let Some(reply) = hub.handle_request(req, observed_latency_us) {
                    session.send_control(reply, header.id).await;
                }
            }
            Message::Command(cmd) => {
                if let Some(reply) = hub.handle_command(&session, &cmd) {
                    session.send_control(reply, header.id).await;
                }
            }
            other => {
                log::debug!("ignoring unsolicited {:?} from {}", other.message_type(), session.peer);
            }
        }
    }
}

async fn run_writer(mut writer: OwnedWriteHalf, mut rx: tokio::sync::mpsc::Receiver<Outgoing>, session: Arc<crate::hub::SessionHandle>) {
    while let Some(item) = rx.recv().await {
        let result = match item {
            Outgoing::Chunk(payload) => {
                let age_us = WallClock::now().diff_micros(payload.timestamp);
                let buffer_ms = session.buffer_ms.load(Ordering::Relaxed) as i64;
                if age_us > buffer_ms * 1_000 {
                    continue;
                }
                write_with_timeout(&mut writer, &Message::WireChunk(payload), 0, 0).await
            }
            Outgoing::Control(msg, refers_to) => write_with_timeout(&mut writer, &msg, 0, refers_to).await,
        };
        if let Err(e) = result {
            log::debug!("write failed for {}: {e}", session.peer);
            session.stream_active.store(false, Ordering::Relaxed);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snap_core::wire::messages::{CommandPayload, MessageType};

    #[tokio::test]
    async fn roundtrip_message_over_a_buffer() {
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &Message::Command(CommandPayload {
                command: "startStream".into(),
            }),
            7,
            0,
        )
        .await
        .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (header, msg) = read_message(&mut cursor).await.unwrap();
        assert_eq!(header.id, 7);
        assert_eq!(header.msg_type, MessageType::Command);
        match msg {
            Message::Command(c) => assert_eq!(c.command, "startStream"),
            _ => panic!("expected Command"),
        }
    }
}
