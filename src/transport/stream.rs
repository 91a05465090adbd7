//! Async stream reassembly.
//!
//! Reads from a byte stream return arbitrary slices: half a length prefix,
//! one and a half messages, and so on. [`MessageReader`] buffers reads and
//! hands out one complete payload at a time.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::{TransportError, TransportResult};
use super::frame::{FrameError, RequestHeader, declared_length, find_boundary};
use crate::core::constants::{LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE, REQUEST_HEADER_SIZE};

/// Read size hint for the receive buffer.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Reassembles length-prefixed messages from a byte stream.
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Bytes received but not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Unwrap the reader, discarding buffered bytes.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next message payload (without its length prefix).
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between messages.
    ///
    /// This method is cancel safe: partial reads stay buffered, so it can be
    /// used as a `tokio::select!` branch.
    pub async fn next_message(&mut self) -> TransportResult<Option<Vec<u8>>> {
        loop {
            if let Some(size) = declared_length(&self.buffer) {
                if size > MAX_PAYLOAD_SIZE {
                    return Err(FrameError::PayloadTooLarge {
                        size,
                        limit: MAX_PAYLOAD_SIZE,
                    }
                    .into());
                }
            }

            if let Some(end) = find_boundary(&self.buffer) {
                let payload = self.buffer[LENGTH_PREFIX_SIZE..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(payload));
            }

            self.buffer.reserve(READ_CHUNK_SIZE);
            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return match (self.buffer.len(), declared_length(&self.buffer)) {
                    (0, _) => Ok(None),
                    (received, None) => Err(TransportError::HeaderReadFailed {
                        expected: LENGTH_PREFIX_SIZE,
                        received,
                    }),
                    (received, Some(expected)) => Err(TransportError::IncompletePayload {
                        expected,
                        received: received - LENGTH_PREFIX_SIZE,
                    }),
                };
            }
        }
    }
}

/// Read one request header.
///
/// Returns `Ok(None)` if the stream ends before the first byte.
pub async fn read_request_header<R>(reader: &mut R) -> TransportResult<Option<RequestHeader>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; REQUEST_HEADER_SIZE];
    let mut filled = 0;
    while filled < REQUEST_HEADER_SIZE {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::HeaderReadFailed {
                expected: REQUEST_HEADER_SIZE,
                received: filled,
            });
        }
        filled += n;
    }
    Ok(Some(RequestHeader::decode(&buf)?))
}
