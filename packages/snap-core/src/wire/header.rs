//! The fixed-width message header that precedes every payload on the wire.
//!
//! Layout (little-endian, no padding), exactly 26 bytes:
//! `type:u16, id:u16, refers_to:u16, sent_sec:i32, sent_usec:i32,
//! recv_sec:i32, recv_usec:i32, size:u32`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{SnapError, SnapResult};
use crate::wire::messages::MessageType;
use crate::wire::time::WallClock;

/// The framing header common to every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Tag identifying the payload's shape.
    pub msg_type: MessageType,
    /// Set by the sender for requests; 0 for unsolicited messages.
    pub id: u16,
    /// Echoes a request's `id` in its reply; 0 otherwise.
    pub refers_to: u16,
    /// Stamped by the sender just before write.
    pub sent: WallClock,
    /// Stamped by the receiver just after the header is read — overwrites
    /// whatever the sender put there.
    pub recv: WallClock,
    /// Number of payload bytes following this header.
    pub size: u32,
}

impl MessageHeader {
    /// Builds a header for an unsolicited (non-reply) message.
    #[must_use]
    pub fn new(msg_type: MessageType, size: u32) -> Self {
        Self {
            msg_type,
            id: 0,
            refers_to: 0,
            sent: WallClock::now(),
            recv: WallClock::from_micros(0),
            size,
        }
    }

    /// Serializes the header into `buf`, stamping `sent` fresh at the
    /// moment of write (the contract requires `sent_ts` reflect the instant
    /// just before the bytes leave the sender).
    pub fn encode(&self, buf: &mut BytesMut) {
        let sent = WallClock::now();
        let (sent_sec, sent_usec) = sent.to_sec_usec();
        let (recv_sec, recv_usec) = self.recv.to_sec_usec();

        buf.put_u16_le(self.msg_type as u16);
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.refers_to);
        buf.put_i32_le(sent_sec);
        buf.put_i32_le(sent_usec);
        buf.put_i32_le(recv_sec);
        buf.put_i32_le(recv_usec);
        buf.put_u32_le(self.size);
    }

    /// Parses a header from exactly [`HEADER_SIZE`] bytes, then overwrites
    /// `recv` with "now" per the receive-side stamping contract.
    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SnapError::Protocol(format!(
                "short header: {} < {HEADER_SIZE}",
                bytes.len()
            )));
        }

        let raw_type = bytes.get_u16_le();
        let msg_type = MessageType::from_wire(raw_type)
            .ok_or_else(|| SnapError::Protocol(format!("unknown message type {raw_type}")))?;
        let id = bytes.get_u16_le();
        let refers_to = bytes.get_u16_le();
        let sent_sec = bytes.get_i32_le();
        let sent_usec = bytes.get_i32_le();
        let _recv_sec = bytes.get_i32_le();
        let _recv_usec = bytes.get_i32_le();
        let size = bytes.get_u32_le();

        if size > MAX_PAYLOAD_SIZE {
            return Err(SnapError::Protocol(format!(
                "oversized payload: {size} > {MAX_PAYLOAD_SIZE}"
            )));
        }

        Ok(Self {
            msg_type,
            id,
            refers_to,
            sent: WallClock::from_sec_usec(sent_sec, sent_usec),
            recv: WallClock::now(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_type_id_and_sent() {
        let mut header = MessageHeader::new(MessageType::Time, 8);
        header.id = 42;
        header.refers_to = 0;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = MessageHeader::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::Time);
        assert_eq!(decoded.id, 42);
        assert_eq!(decoded.size, 8);
        // sent_ts round-trips to microsecond precision (sec/usec split is exact).
        assert_eq!(decoded.sent.to_sec_usec(), header.sent.to_sec_usec());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = MessageHeader::decode(Bytes::from_static(&[0u8; 10])).unwrap_err();
        assert!(matches!(err, SnapError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0xFFFF);
        buf.put_bytes(0, HEADER_SIZE - 2);
        let err = MessageHeader::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, SnapError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(MessageType::WireChunk as u16);
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_i32_le(0);
        buf.put_i32_le(0);
        buf.put_i32_le(0);
        buf.put_i32_le(0);
        buf.put_u32_le(MAX_PAYLOAD_SIZE + 1);
        let err = MessageHeader::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, SnapError::Protocol(_)));
    }
}
