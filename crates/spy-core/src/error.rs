//! Error types for SPY

use thiserror::Error;

/// Top-level error type for SPY
#[derive(Debug, Error)]
pub enum SpyError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),
}

/// Errors raised while encoding or decoding control-port frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A header consumed a different number of bytes than its declared size
    #[error("Malformed {header} header: expected {expected} bytes, consumed {actual}")]
    MalformedHeader {
        header: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The frame ended before a header could be read
    #[error("Truncated {header} header: need {needed} bytes, {available} available")]
    Truncated {
        header: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The frame decoded to a message kind the caller did not expect
    #[error("Unexpected message type: {0}")]
    UnexpectedMessageType(u8),

    #[error("Neighbor list too long: {0} entries (max 255)")]
    TooManyNeighbors(usize),
}

/// Errors related to transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Unknown link address: {0}")]
    UnknownAddress(String),

    #[error("Transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the location service
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Location service backend not implemented: {0}")]
    Unsupported(String),
}

/// Result type alias for SPY operations
pub type SpyResult<T> = Result<T, SpyError>;
