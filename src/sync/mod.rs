//! Sync layer
//!
//! Implements:
//! - MessagePack codec for structured values ([`Codec`])
//! - Structural diff generation and application ([`compute_diff`], [`apply_diff`])
//! - Last-known-good chunk cache ([`ChunkCache`])
//! - Bounded single-worker codec pipelines ([`TaskPipeline`], needs `transport`)

mod cache;
mod codec;
mod diff;
#[cfg(feature = "transport")]
mod pipeline;

pub use cache::*;
pub use codec::*;
pub use diff::*;
#[cfg(feature = "transport")]
pub use pipeline::*;
