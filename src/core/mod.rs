//! Core types shared by every layer.
//!
//! - [`Value`]: the closed structured-value model the codec and diff engine work on
//! - [`ChunkKey`]: chunk grid coordinates
//! - [`ChunkSink`]: the consumer of reconstructed chunks
//! - error types and protocol constants

pub mod constants;
mod error;
mod traits;
mod value;

pub use error::*;
pub use traits::*;
pub use value::*;
