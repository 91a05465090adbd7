//! Protocol constants.
//!
//! Wire sizes and flag values are fixed by the protocol and MUST NOT be changed.
//! The remaining values are defaults for the configuration structs.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Request header size: flag (1) + cx (4) + cy (4) + lod (1).
pub const REQUEST_HEADER_SIZE: usize = 10;

/// Response length prefix size (big-endian u32).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Flag byte for a diff request or response.
pub const FLAG_DIFF: u8 = 0;

/// Flag byte for a full snapshot request or response.
pub const FLAG_FULL: u8 = 1;

/// Upper bound on a declared response payload length.
///
/// A length prefix above this is rejected before any payload is buffered.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// DIFF RECORDS
// =============================================================================

/// Key of the index field in a sequence diff record.
pub const DIFF_INDEX_KEY: &str = "index";

/// Key of the value field in a sequence diff record.
pub const DIFF_VALUE_KEY: &str = "value";

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default per-direction pipeline queue depth.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10;

/// Default TCP port of the chunk server.
pub const DEFAULT_PORT: u16 = 6000;

/// Default chunk side length in tiles.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// Default number of concurrently served connections.
pub const DEFAULT_MAX_CLIENTS: usize = 16;

/// Default client connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default zstd level used by the server.
pub const DEFAULT_SERVER_COMPRESSION_LEVEL: i32 = 6;
