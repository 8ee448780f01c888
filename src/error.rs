//! Error types for depthcast

use crate::pipeline::types::StreamKind;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// depthcast error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed header, oversized payload or sequence violation on the wire
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Transport failure (connect, read, write)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Encode or decode failure on a single unit
    #[error("Codec error: {0}")]
    Codec(String),

    /// Media writer init or finalize failure
    #[error("Recording error: {0}")]
    Recording(String),

    /// Illegal state transition or unsupported setup
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// The ways a peer can break the framing contract
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("unknown stream type {0}")]
    UnknownStreamType(u8),

    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{kind} frame number {got} does not follow {last}")]
    FrameNumberRegression { kind: StreamKind, last: u32, got: u32 },

    #[error("{kind} timestamp {got} precedes {last}")]
    TimestampRegression { kind: StreamKind, last: f64, got: f64 },
}

impl Error {
    /// True when the byte stream can no longer be trusted and the connection
    /// must be closed.
    pub fn is_fatal_for_connection(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Protocol(violation) => !matches!(
                violation,
                ProtocolViolation::FrameNumberRegression { .. }
                    | ProtocolViolation::TimestampRegression { .. }
            ),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Codec(err.to_string())
    }
}
