//! Transport layer
//!
//! Framing of the chunk protocol over a reliable byte stream (TCP):
//!
//! - **Request header**: [`RequestHeader`], 10 bytes, full/diff flag, chunk
//!   coordinates and quantized level of detail
//! - **Response framing**: [`encode_response`], [`ResponsePayload`], and
//!   [`find_boundary`] for locating message ends in a receive buffer
//! - **Stream reassembly**: [`MessageReader`] and [`read_request_header`]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Client / Server                    │
//! ├─────────────────────────────────────────┤
//! │      Sync (codec, diff, pipeline)       │
//! ├─────────────────────────────────────────┤
//! │      Transport Layer                    │  ← This module
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod frame;
mod stream;

pub use error::*;
pub use frame::*;
pub use stream::*;
