//! # terrain-sync
//!
//! Diff-based synchronization of terrain height chunks over TCP.
//!
//! A client asks for a chunk by coordinates and level of detail, either as a
//! full snapshot or as a diff against the last snapshot it received. The
//! server answers with a length-prefixed MessagePack body (optionally zstd
//! compressed), and the client rebuilds the flat height grid from its cache.
//!
//! ## Feature Flags
//!
//! - `transport` (default): Wire framing, stream reassembly and the codec pipeline
//! - `client` (default): Networked [`client::ChunkClient`]
//! - `server` (default): Networked [`server::ChunkServer`]
//!
//! ## Modules
//!
//! - [`core`]: Value model, chunk keys, constants and error types (always included)
//! - [`sync`]: Codec, diff engine, chunk cache and codec pipeline
//! - [`extensions`]: zstd body compression
//! - [`transport`]: Request headers and response framing (requires `transport` feature)
//! - [`client`]: Reconciliation and the chunk client (requires `client` feature)
//! - [`server`]: Chunk sources, sessions and the chunk server (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use terrain_sync::prelude::*;
//!
//! let codec = Codec::new();
//! let old = Value::floats([0.1, 0.2, 0.3, 0.4]);
//! let new = Value::floats([0.1, 0.9, 0.3, 0.4]);
//!
//! // Server side: diff against what the client already has.
//! let body = codec.encode(&compute_diff(&old, &new).into_value()).unwrap();
//!
//! // Client side: decode and patch the cached snapshot.
//! let diff = Diff::from_wire(&old, codec.decode(&body).unwrap()).unwrap();
//! assert_eq!(apply_diff(&old, &diff).unwrap(), new);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Codec, diff engine and cache
pub mod sync;

// Extensions
pub mod extensions;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use crate::core::*;

    // Codec and diff engine
    pub use crate::sync::{ChunkCache, Codec, Diff, SeqChange, apply_diff, compute_diff};

    #[cfg(feature = "transport")]
    pub use crate::sync::{PipelineConfig, TaskPipeline};

    // Wire types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{PayloadKind, RequestHeader, TransportError};

    #[cfg(feature = "client")]
    pub use crate::client::{ChunkClient, ChunkClientBuilder, ClientError, ClientEvent, Reconciler};

    #[cfg(feature = "server")]
    pub use crate::server::{ChunkServer, ChunkServerBuilder, ChunkSource, FileChunkSource, ServerError};
}

// Re-export commonly used items at crate root
pub use crate::core::{ApplyError, ChunkKey, CodecError, Lod, TerrainSyncError, Value};
pub use crate::sync::{Codec, Diff, apply_diff, compute_diff};

#[cfg(feature = "transport")]
pub use crate::transport::{PayloadKind, RequestHeader};
