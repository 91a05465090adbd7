//! Error types for the codec and the diff engine.

use thiserror::Error;

/// Errors from encoding or decoding a [`Value`](super::Value).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Nil value passed to encode, or empty buffer passed to decode.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Serialization failed or produced an empty buffer.
    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    /// The buffer is not a well-formed encoded value.
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Errors that can occur when applying a diff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// A sequence record points past the end of the base.
    #[error("diff index {index} out of range for sequence of length {len}")]
    IndexOutOfRange {
        /// Index carried by the record.
        index: usize,
        /// Length of the sequence when the record was applied.
        len: usize,
    },

    /// A sequence diff record is not an `{index, value}` map.
    #[error("malformed diff record: {0}")]
    MalformedRecord(String),
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum TerrainSyncError {
    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Diff application error.
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
