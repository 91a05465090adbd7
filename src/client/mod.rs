//! Chunk client
//!
//! [`Reconciler`] holds the chunk cache and rebuilds grids from full and
//! diff responses. [`ChunkClient`] runs it over a TCP connection, decoding
//! responses on a [`TaskPipeline`](crate::sync::TaskPipeline) worker.

#[allow(clippy::module_inception)]
mod client;
mod reconcile;

pub use client::*;
pub use reconcile::*;
