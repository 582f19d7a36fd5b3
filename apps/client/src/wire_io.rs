//! Framed message I/O over a `TcpStream` half. Mirrors `apps/server`'s copy
//! of the same helpers — both sides speak the identical wire framing, but
//! `snap-core` stays socket-agnostic (see DESIGN.md), so each binary owns its
//! own thin transport layer.

use bytes::{Bytes, BytesMut};
use snap_core::constants::HEADER_SIZE;
use snap_core::error::SnapResult;
use snap_core::wire::header::MessageHeader;
use snap_core::wire::messages::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

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
/// the moment of write.
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
            3,
            0,
        )
        .await
        .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (header, msg) = read_message(&mut cursor).await.unwrap();
        assert_eq!(header.id, 3);
        assert_eq!(header.msg_type, MessageType::Command);
        match msg {
            Message::Command(c) => assert_eq!(c.command, "startStream"),
            _ => panic!("expected Command"),
        }
    }
}
