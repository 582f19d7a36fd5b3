//! The codec pipeline: `Encoder`/`Decoder` capability traits (spec.md §4.2,
//! §9's "named capability set per role") plus the five concrete codecs named
//! on the wire — `pcm`, `flac`, `ogg`, `opus`, `null`.
//!
//! An encoder turns PCM periods into self-describing encoded chunks plus a
//! one-time opaque header; a decoder is the inverse on the client. Both sides
//! agree on the codec by name (exchanged in the `CodecHeader` message), never
//! by type tag, so this module exposes `make_encoder`/`make_decoder` factories
//! keyed on that name rather than requiring callers to know the concrete type.

mod flac;
mod null;
mod opus_codec;
mod pcm;
mod vorbis;

use bytes::Bytes;

use crate::chunk::PcmChunk;
use crate::error::{SnapError, SnapResult};
use crate::sample_format::SampleFormat;
use crate::wire::time::WallClock;

/// One encoded period: self-contained bytes plus the wall-clock start time of
/// the PCM it represents and its real-time duration (used for server-side
/// pacing of variable-size encoder output, e.g. Opus's sub-period remainder).
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub payload: Bytes,
    pub timestamp: WallClock,
    pub duration_ms: f64,
}

/// Turns PCM periods into encoded chunks plus a one-time codec header.
///
/// `encode` may emit zero chunks (input buffered for a future call, as Opus
/// does below its minimum period) or more than one (a period that spans
/// several encodable boundaries).
pub trait Encoder: Send {
    /// The codec name as carried on the wire (`"pcm"`, `"flac"`, `"ogg"`,
    /// `"opus"`, `"null"`).
    fn codec_name(&self) -> &'static str;

    /// The opaque codec header a decoder needs before it can decode any chunk
    /// this encoder produces. Stable for the lifetime of the encoder.
    fn header(&self) -> Bytes;

    /// Consumes one period of PCM, returning zero or more encoded chunks.
    fn encode(&mut self, chunk: &PcmChunk) -> SnapResult<Vec<EncodedChunk>>;
}

/// The inverse of `Encoder`, living on the client.
pub trait Decoder: Send {
    /// Applies the codec header received once at the start of a stream,
    /// returning the `SampleFormat` the decoded PCM will have.
    fn set_header(&mut self, header: &[u8]) -> SnapResult<SampleFormat>;

    /// Decodes one encoded chunk's payload into PCM, producing a `PcmChunk`
    /// whose timestamp has been shifted backward by any decoder-internal
    /// pre-roll so it lines up with the first sample this call emits.
    fn decode(&mut self, payload: &[u8], timestamp: WallClock) -> SnapResult<PcmChunk>;
}

/// Builds the named encoder for `format`, parsing codec-specific `options`
/// (e.g. Opus's `"BITRATE:192000,COMPLEXITY:10"`).
pub fn make_encoder(
    name: &str,
    format: SampleFormat,
    options: &str,
) -> SnapResult<Box<dyn Encoder>> {
    match name {
        "pcm" => Ok(Box::new(pcm::PcmEncoder::new(format))),
        "null" => Ok(Box::new(null::NullEncoder)),
        "flac" => Ok(Box::new(flac::FlacEncoder::new(format, options)?)),
        "opus" => Ok(Box::new(opus_codec::OpusEncoder::new(format, options)?)),
        "ogg" => Ok(Box::new(vorbis::VorbisEncoder::new(format, options)?)),
        other => Err(SnapError::Config(format!("unknown codec: {other}"))),
    }
}

/// Builds the named decoder. The returned decoder still needs
/// `Decoder::set_header` called once before `decode`.
pub fn make_decoder(name: &str) -> SnapResult<Box<dyn Decoder>> {
    match name {
        "pcm" => Ok(Box::new(pcm::PcmDecoder::new())),
        "flac" => Ok(Box::new(flac::FlacDecoder::new())),
        "opus" => Ok(Box::new(opus_codec::OpusDecoder::new())),
        "ogg" => Ok(Box::new(vorbis::VorbisDecoder::new())),
        other => Err(SnapError::Config(format!(
            "unknown or non-decodable codec: {other}"
        ))),
    }
}

pub use flac::{FlacDecoder, FlacEncoder};
pub use null::NullEncoder;
pub use opus_codec::{OpusDecoder, OpusEncoder};
pub use pcm::{PcmDecoder, PcmEncoder};
pub use vorbis::{VorbisDecoder, VorbisEncoder};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_encoder_rejects_unknown_codec() {
        let err = make_encoder("mp3", SampleFormat::default(), "").unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn make_decoder_rejects_unknown_codec() {
        let err = make_decoder("mp3").unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }
}
