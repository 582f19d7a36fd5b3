//! Snap Core - shared library for the synchronized audio streaming engine.
//!
//! This crate implements the protocol-level subsystems common to both the
//! server and the client: wire framing, the sample-format model, the codec
//! pipeline, the clock-synchronization primitives, and the jitter buffer's
//! rolling statistics. It has no knowledge of sockets, PCM sources, or audio
//! sinks — those live in `apps/server` and `apps/client` respectively, built
//! on top of the types here.
//!
//! # Architecture
//!
//! - [`wire`]: Bit-exact message framing (header, length-prefixed strings and
//!   maps, the tagged-union message kinds).
//! - [`sample_format`]: `(rate, bits, channels)` and its derived sizes.
//! - [`chunk`]: `PcmChunk`, the cursor-bearing block of PCM with a start
//!   timestamp.
//! - [`codecs`]: `Encoder`/`Decoder` traits and the `pcm`/`flac`/`opus`/`ogg`/
//!   `null` implementations.
//! - [`clock`]: The rolling `DoubleBuffer` and the client's `TimeEstimator`.
//! - [`error`]: The crate-wide error taxonomy.
//! - [`constants`]: Protocol and tuning constants.

#![warn(clippy::all)]

pub mod chunk;
pub mod clock;
pub mod codecs;
pub mod constants;
pub mod error;
pub mod sample_format;
pub mod wire;

pub use chunk::PcmChunk;
pub use codecs::{make_decoder, make_encoder, Decoder, EncodedChunk, Encoder};
pub use error::{ErrorCode, SnapError, SnapResult};
pub use sample_format::SampleFormat;
pub use wire::header::MessageHeader;
pub use wire::messages::MessageType;
