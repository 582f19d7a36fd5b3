//! The tagged-union of wire message payloads.
//!
//! Each payload type mirrors one of the original protocol's message kinds.
//! Wire values for [`MessageType`] are part of the external interface and
//! MUST stay stable (spec.md §6).

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{SnapError, SnapResult};
use crate::sample_format::SampleFormat;
use crate::wire::codec::{read_map, read_string, write_map, write_string};

/// Wire tag for a message's payload shape. Values are fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Base = 0,
    CodecHeader = 1,
    WireChunk = 2,
    SampleFormat = 3,
    ServerSettings = 4,
    Time = 5,
    Request = 6,
    Ack = 7,
    Command = 8,
    Hello = 9,
    Map = 10,
    String = 11,
}

impl MessageType {
    /// Recovers a `MessageType` from its wire value, or `None` if the value
    /// is outside the enumerated set.
    #[must_use]
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Base),
            1 => Some(Self::CodecHeader),
            2 => Some(Self::WireChunk),
            3 => Some(Self::SampleFormat),
            4 => Some(Self::ServerSettings),
            5 => Some(Self::Time),
            6 => Some(Self::Request),
            7 => Some(Self::Ack),
            8 => Some(Self::Command),
            9 => Some(Self::Hello),
            10 => Some(Self::Map),
            11 => Some(Self::String),
            _ => None,
        }
    }
}

/// A self-describing, one-time codec header (opaque to everything but the
/// matching decoder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecHeaderPayload {
    pub codec: String,
    pub payload: Bytes,
}

impl CodecHeaderPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.codec);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        let codec = read_string(&mut bytes)?;
        if bytes.len() < 4 {
            return Err(SnapError::Protocol("truncated codec header size".into()));
        }
        let size = bytes.get_u32_le() as usize;
        if bytes.len() < size {
            return Err(SnapError::Protocol("truncated codec header payload".into()));
        }
        Ok(Self {
            codec,
            payload: bytes.split_to(size),
        })
    }
}

/// Raw encoded bytes plus a start timestamp, as carried on the wire. Becomes
/// a [`crate::chunk::PcmChunk`] once a decoder has turned `payload` into PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunkPayload {
    pub timestamp: crate::wire::time::WallClock,
    pub payload: Bytes,
}

impl WireChunkPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        let (sec, usec) = self.timestamp.to_sec_usec();
        buf.put_i32_le(sec);
        buf.put_i32_le(usec);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        if bytes.len() < 12 {
            return Err(SnapError::Protocol("truncated wire chunk header".into()));
        }
        let sec = bytes.get_i32_le();
        let usec = bytes.get_i32_le();
        let size = bytes.get_u32_le() as usize;
        if bytes.len() < size {
            return Err(SnapError::Protocol("truncated wire chunk payload".into()));
        }
        Ok(Self {
            timestamp: crate::wire::time::WallClock::from_sec_usec(sec, usec),
            payload: bytes.split_to(size),
        })
    }
}

/// `(rate, bits, channels)` plus the derived sizes, as sent on the wire. The
/// derived fields travel with the message rather than being recomputed on
/// decode, matching the original format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormatPayload {
    pub format: SampleFormat,
}

impl SampleFormatPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.format.rate());
        buf.put_u16_le(self.format.bits());
        buf.put_u16_le(self.format.channels());
        buf.put_u16_le(self.format.sample_size());
        buf.put_u16_le(self.format.frame_size() as u16);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        if bytes.len() < 12 {
            return Err(SnapError::Protocol("truncated sample format".into()));
        }
        let rate = bytes.get_u32_le();
        let bits = bytes.get_u16_le();
        let channels = bytes.get_u16_le();
        let _sample_size = bytes.get_u16_le();
        let _frame_size = bytes.get_u16_le();
        Ok(Self {
            format: SampleFormat::new(rate, bits, channels),
        })
    }
}

/// Negotiated end-to-end latency, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettingsPayload {
    pub buffer_ms: u32,
    pub latency_ms: i32,
}

impl ServerSettingsPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.buffer_ms);
        buf.put_i32_le(self.latency_ms);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        if bytes.len() < 8 {
            return Err(SnapError::Protocol("truncated server settings".into()));
        }
        Ok(Self {
            buffer_ms: bytes.get_u32_le(),
            latency_ms: bytes.get_i32_le(),
        })
    }
}

/// The latency payload of a `Time` reply: a signed `(sec, usec)` duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePayload {
    pub latency_sec: i32,
    pub latency_usec: i32,
}

impl TimePayload {
    /// Combined signed microsecond value.
    #[must_use]
    pub fn latency_us(&self) -> i64 {
        self.latency_sec as i64 * 1_000_000 + self.latency_usec as i64
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.latency_sec);
        buf.put_i32_le(self.latency_usec);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        if bytes.len() < 8 {
            return Err(SnapError::Protocol("truncated time payload".into()));
        }
        Ok(Self {
            latency_sec: bytes.get_i32_le(),
            latency_usec: bytes.get_i32_le(),
        })
    }
}

/// A request for the server to send a particular message kind back (e.g.
/// `request = SampleFormat` means "send me a SampleFormat message").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPayload {
    pub requested: MessageType,
}

impl RequestPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.requested as u16);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        if bytes.len() < 2 {
            return Err(SnapError::Protocol("truncated request payload".into()));
        }
        let raw = bytes.get_u16_le();
        let requested = MessageType::from_wire(raw)
            .ok_or_else(|| SnapError::Protocol(format!("unknown requested type {raw}")))?;
        Ok(Self { requested })
    }
}

/// A named command, e.g. `"startStream"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPayload {
    pub command: String,
}

impl CommandPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.command);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        Ok(Self {
            command: read_string(&mut bytes)?,
        })
    }
}

/// The client's self-identification, sent once at the start of the
/// handshake. Modeled as a string-keyed map (see SPEC_FULL.md §3) so new
/// fields can be added without a wire-format break; `mac`, `hostName`, and
/// `version` are always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloPayload {
    pub fields: BTreeMap<String, String>,
}

impl HelloPayload {
    /// Builds a Hello payload with the required fields populated.
    #[must_use]
    pub fn new(mac: impl Into<String>, host_name: impl Into<String>, version: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("mac".to_string(), mac.into());
        fields.insert("hostName".to_string(), host_name.into());
        fields.insert("version".to_string(), version.into());
        Self { fields }
    }

    #[must_use]
    pub fn mac(&self) -> Option<&str> {
        self.fields.get("mac").map(String::as_str)
    }

    #[must_use]
    pub fn host_name(&self) -> Option<&str> {
        self.fields.get("hostName").map(String::as_str)
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.fields.get("version").map(String::as_str)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        write_map(buf, &self.fields);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        Ok(Self {
            fields: read_map(&mut bytes)?,
        })
    }
}

/// A bare string-keyed map message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapPayload {
    pub fields: BTreeMap<String, String>,
}

impl MapPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        write_map(buf, &self.fields);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        Ok(Self {
            fields: read_map(&mut bytes)?,
        })
    }
}

/// A bare string message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringPayload {
    pub value: String,
}

impl StringPayload {
    pub fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.value);
    }

    pub fn decode(mut bytes: Bytes) -> SnapResult<Self> {
        Ok(Self {
            value: read_string(&mut bytes)?,
        })
    }
}

/// The decoded payload of any wire message. `Base` and `Ack` carry no
/// payload of their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Base,
    CodecHeader(CodecHeaderPayload),
    WireChunk(WireChunkPayload),
    SampleFormat(SampleFormatPayload),
    ServerSettings(ServerSettingsPayload),
    Time(TimePayload),
    Request(RequestPayload),
    Ack,
    Command(CommandPayload),
    Hello(HelloPayload),
    Map(MapPayload),
    String(StringPayload),
}

impl Message {
    /// The [`MessageType`] tag for this payload's shape.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Base => MessageType::Base,
            Self::CodecHeader(_) => MessageType::CodecHeader,
            Self::WireChunk(_) => MessageType::WireChunk,
            Self::SampleFormat(_) => MessageType::SampleFormat,
            Self::ServerSettings(_) => MessageType::ServerSettings,
            Self::Time(_) => MessageType::Time,
            Self::Request(_) => MessageType::Request,
            Self::Ack => MessageType::Ack,
            Self::Command(_) => MessageType::Command,
            Self::Hello(_) => MessageType::Hello,
            Self::Map(_) => MessageType::Map,
            Self::String(_) => MessageType::String,
        }
    }

    /// Serializes just the payload bytes (the caller writes the header
    /// separately, since the header needs the encoded length up front).
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Base | Self::Ack => {}
            Self::CodecHeader(p) => p.encode(buf),
            Self::WireChunk(p) => p.encode(buf),
            Self::SampleFormat(p) => p.encode(buf),
            Self::ServerSettings(p) => p.encode(buf),
            Self::Time(p) => p.encode(buf),
            Self::Request(p) => p.encode(buf),
            Self::Command(p) => p.encode(buf),
            Self::Hello(p) => p.encode(buf),
            Self::Map(p) => p.encode(buf),
            Self::String(p) => p.encode(buf),
        }
    }

    /// Decodes a payload given the message type from the header.
    pub fn decode_payload(msg_type: MessageType, bytes: Bytes) -> SnapResult<Self> {
        Ok(match msg_type {
            MessageType::Base => Self::Base,
            MessageType::CodecHeader => Self::CodecHeader(CodecHeaderPayload::decode(bytes)?),
            MessageType::WireChunk => Self::WireChunk(WireChunkPayload::decode(bytes)?),
            MessageType::SampleFormat => Self::SampleFormat(SampleFormatPayload::decode(bytes)?),
            MessageType::ServerSettings => {
                Self::ServerSettings(ServerSettingsPayload::decode(bytes)?)
            }
            MessageType::Time => Self::Time(TimePayload::decode(bytes)?),
            MessageType::Request => Self::Request(RequestPayload::decode(bytes)?),
            MessageType::Ack => Self::Ack,
            MessageType::Command => Self::Command(CommandPayload::decode(bytes)?),
            MessageType::Hello => Self::Hello(HelloPayload::decode(bytes)?),
            MessageType::Map => Self::Map(MapPayload::decode(bytes)?),
            MessageType::String => Self::String(StringPayload::decode(bytes)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Message) -> Message {
        let mut buf = BytesMut::new();
        msg.encode_payload(&mut buf);
        Message::decode_payload(msg.message_type(), buf.freeze()).unwrap()
    }

    #[test]
    fn message_type_wire_values_are_stable() {
        assert_eq!(MessageType::Base as u16, 0);
        assert_eq!(MessageType::CodecHeader as u16, 1);
        assert_eq!(MessageType::WireChunk as u16, 2);
        assert_eq!(MessageType::SampleFormat as u16, 3);
        assert_eq!(MessageType::ServerSettings as u16, 4);
        assert_eq!(MessageType::Time as u16, 5);
        assert_eq!(MessageType::Request as u16, 6);
        assert_eq!(MessageType::Ack as u16, 7);
        assert_eq!(MessageType::Command as u16, 8);
        assert_eq!(MessageType::Hello as u16, 9);
        assert_eq!(MessageType::Map as u16, 10);
        assert_eq!(MessageType::String as u16, 11);
    }

    #[test]
    fn ack_roundtrips_as_empty_payload() {
        let msg = Message::Ack;
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn sample_format_roundtrips() {
        let msg = Message::SampleFormat(SampleFormatPayload {
            format: SampleFormat::new(48_000, 16, 2),
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn hello_roundtrips_with_required_fields() {
        let msg = Message::Hello(HelloPayload::new(
            "00:11:22:33:44:55",
            "living-room",
            "0.1.0",
        ));
        let decoded = roundtrip(&msg);
        match decoded {
            Message::Hello(h) => {
                assert_eq!(h.mac(), Some("00:11:22:33:44:55"));
                assert_eq!(h.host_name(), Some("living-room"));
                assert_eq!(h.version(), Some("0.1.0"));
            }
            _ => panic!("expected Hello"),
        }
    }

    #[test]
    fn command_roundtrips() {
        let msg = Message::Command(CommandPayload {
            command: "startStream".to_string(),
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn request_roundtrips() {
        let msg = Message::Request(RequestPayload {
            requested: MessageType::SampleFormat,
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn wire_chunk_roundtrips() {
        let msg = Message::WireChunk(WireChunkPayload {
            timestamp: crate::wire::time::WallClock::from_sec_usec(10, 500),
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn time_latency_us() {
        let payload = TimePayload {
            latency_sec: 0,
            latency_usec: 2_500,
        };
        assert_eq!(payload.latency_us(), 2_500);
    }
}
