//! Centralized error types for the streaming engine.
//!
//! Follows the error taxonomy of the design spec: each variant corresponds to
//! one failure domain (protocol, transport, codec, source, sink, clock,
//! config) so callers can match on domain rather than string-sniffing.

use std::io;

use thiserror::Error;

/// Trait for error types that provide a machine-readable, stable code —
/// useful for log fields and metrics tags.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum SnapError {
    /// Malformed header, oversized payload, or an unknown message type.
    /// Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket read/write failure or timeout. Fatal to the connection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A codec could not encode or decode a chunk. Recoverable unless it
    /// streaks at the call site.
    #[error("codec error ({codec}): {message}")]
    Decode {
        /// Codec name (`pcm`, `flac`, `ogg`, `opus`, `null`).
        codec: &'static str,
        /// What went wrong.
        message: String,
    },

    /// The PCM source failed (pipe EOF, process exit). Not fatal: the source
    /// enters `Idle` and the hub keeps serving (nothing new; clients fill
    /// silence via the jitter-buffer rule).
    #[error("source error: {0}")]
    Source(String),

    /// The audio sink reported an XRUN or repeated "failed to get chunk".
    #[error("sink error: {0}")]
    Sink(String),

    /// Time-sync cumulative timeout exceeded; the connection is considered
    /// broken.
    #[error("clock error: {0}")]
    Clock(String),

    /// Startup configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ErrorCode for SnapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol_error",
            Self::Transport(_) => "transport_error",
            Self::Decode { .. } => "decode_error",
            Self::Source(_) => "source_error",
            Self::Sink(_) => "sink_error",
            Self::Clock(_) => "clock_error",
            Self::Config(_) => "config_error",
        }
    }
}

impl SnapError {
    /// True for errors that close the connection outright (protocol and
    /// transport failures); false for errors a higher layer can recover from
    /// locally.
    #[must_use]
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Transport(_) | Self::Clock(_))
    }
}

/// Convenience alias used throughout the crate.
pub type SnapResult<T> = Result<T, SnapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_is_fatal() {
        let err = SnapError::Protocol("bad header".into());
        assert!(err.is_fatal_to_connection());
        assert_eq!(err.code(), "protocol_error");
    }

    #[test]
    fn decode_error_is_not_fatal() {
        let err = SnapError::Decode {
            codec: "flac",
            message: "bad frame".into(),
        };
        assert!(!err.is_fatal_to_connection());
        assert_eq!(err.code(), "decode_error");
    }

    #[test]
    fn transport_error_wraps_io_error() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let err: SnapError = io_err.into();
        assert!(err.is_fatal_to_connection());
        assert_eq!(err.code(), "transport_error");
    }
}
