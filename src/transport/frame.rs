//! Frame encoding and decoding for the chunk protocol.
//!
//! Request (client → server), 10 bytes:
//! ```text
//! +0  Flag    (1 byte: 1 = full, 0 = diff)
//! +1  Chunk X (4 bytes BE i32)
//! +5  Chunk Y (4 bytes BE i32)
//! +9  LOD     (1 byte: round(clamp(lod, 0, 1) * 255))
//! ```
//!
//! Response (server → client):
//! ```text
//! +0  Length  (4 bytes BE u32, payload size)
//! +4  Flag    (1 byte: 1 = full, 0 = diff)
//! +5  Body    (Length - 1 bytes, encoded value or diff)
//! ```

use thiserror::Error;

use crate::core::constants::{
    FLAG_DIFF, FLAG_FULL, LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE, REQUEST_HEADER_SIZE,
};
use crate::core::{ChunkKey, Lod};

/// Frame parsing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Request header is not exactly [`REQUEST_HEADER_SIZE`] bytes.
    #[error("request header must be {REQUEST_HEADER_SIZE} bytes, got {0}")]
    BadHeaderLength(usize),

    /// Flag byte is neither full nor diff.
    #[error("invalid full/diff flag: {0:#04x}")]
    InvalidFlag(u8),

    /// Response payload has no flag byte.
    #[error("empty response payload")]
    EmptyPayload,

    /// Declared payload length exceeds the protocol limit.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Declared size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },
}

/// Whether a request asks for, or a response carries, a full snapshot or a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// Diff against the last snapshot the peer holds.
    Diff = FLAG_DIFF,
    /// Complete snapshot.
    Full = FLAG_FULL,
}

impl PayloadKind {
    /// Parse a flag byte.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        match byte {
            FLAG_DIFF => Ok(Self::Diff),
            FLAG_FULL => Ok(Self::Full),
            other => Err(FrameError::InvalidFlag(other)),
        }
    }

    /// Flag byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Check if this is a full snapshot.
    pub fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Chunk request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHeader {
    /// Full or diff.
    pub kind: PayloadKind,
    /// Requested chunk.
    pub key: ChunkKey,
    /// Requested level of detail.
    pub lod: Lod,
}

impl RequestHeader {
    /// Create a request header.
    pub fn new(kind: PayloadKind, key: ChunkKey, lod: Lod) -> Self {
        Self { kind, key, lod }
    }

    /// Encode to the 10-byte wire form.
    pub fn encode(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        buf[0] = self.kind.as_byte();
        buf[1..5].copy_from_slice(&self.key.cx.to_be_bytes());
        buf[5..9].copy_from_slice(&self.key.cy.to_be_bytes());
        buf[9] = self.lod.as_byte();
        buf
    }

    /// Decode the 10-byte wire form.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let data: &[u8; REQUEST_HEADER_SIZE] = data
            .try_into()
            .map_err(|_| FrameError::BadHeaderLength(data.len()))?;

        let kind = PayloadKind::from_byte(data[0])?;
        let cx = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let cy = i32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        let lod = Lod::from_byte(data[9]);

        Ok(Self {
            kind,
            key: ChunkKey::new(cx, cy),
            lod,
        })
    }
}

/// Borrowed view of a response payload (the bytes after the length prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePayload<'a> {
    /// Full or diff.
    pub kind: PayloadKind,
    /// Encoded value or diff.
    pub body: &'a [u8],
}

impl<'a> ResponsePayload<'a> {
    /// Split a payload into its flag and body.
    pub fn parse(payload: &'a [u8]) -> Result<Self, FrameError> {
        let (&flag, body) = payload.split_first().ok_or(FrameError::EmptyPayload)?;
        Ok(Self {
            kind: PayloadKind::from_byte(flag)?,
            body,
        })
    }
}

/// Build a complete length-prefixed response message.
pub fn encode_response(kind: PayloadKind, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let payload_len = 1 + body.len();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            limit: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload_len);
    // Bounded by MAX_PAYLOAD_SIZE above.
    buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
    buf.push(kind.as_byte());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Read the declared payload length, if the prefix is complete.
pub fn declared_length(buffer: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buffer.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix) as usize)
}

/// Offset one past the end of the first complete message in `buffer`.
///
/// Returns `None` while the length prefix or the declared payload is still
/// incomplete. Bytes after the returned offset belong to later messages.
pub fn find_boundary(buffer: &[u8]) -> Option<usize> {
    let end = LENGTH_PREFIX_SIZE.checked_add(declared_length(buffer)?)?;
    (buffer.len() >= end).then_some(end)
}
