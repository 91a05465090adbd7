//! Transport layer error types.

use std::io;

use thiserror::Error;

use super::frame::FrameError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect to the peer.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The stream ended inside a request header or length prefix.
    #[error("header read failed: got {received} of {expected} bytes")]
    HeaderReadFailed {
        /// Bytes the header needs.
        expected: usize,
        /// Bytes received before end of stream.
        received: usize,
    },

    /// The stream ended inside a declared payload.
    #[error("incomplete payload: got {received} of {expected} bytes")]
    IncompletePayload {
        /// Declared payload length.
        expected: usize,
        /// Payload bytes received before end of stream.
        received: usize,
    },

    /// Frame parsing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
