//! Chunk server
//!
//! Serves terrain chunks over TCP. Each connection gets a [`ServerSession`]
//! that answers diff requests against the last chunk it sent.

mod grid;
#[allow(clippy::module_inception)]
mod server;
mod session;
mod source;

pub use grid::*;
pub use server::*;
pub use session::*;
pub use source::*;
