//! UDS/DoIP Error Types

use thiserror::Error;

/// Errors that can occur during diagnostic communication
#[derive(Debug, Error)]
pub enum UdsError {
    /// Underlying socket error
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Transport used before a connection was established
    #[error("Transport not connected")]
    NotConnected,

    /// Response bytes could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// DoIP header carried an unknown protocol version
    #[error("Unsupported DoIP protocol version: {0:02X}")]
    UnsupportedVersion(u8),

    /// DoIP frame shorter than its header claims
    #[error("Truncated DoIP frame: expected {expected} payload bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// Request would not fit the negotiated limits
    #[error("Request too large: {0} DIDs")]
    RequestTooLarge(usize),

    /// Capacity profile file could not be parsed
    #[error("Invalid capacity profile line: {0}")]
    InvalidCapacityProfile(String),
}
