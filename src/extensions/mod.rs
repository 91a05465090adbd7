//! Payload extensions.
//!
//! | Module        | Description                                    |
//! |---------------|------------------------------------------------|
//! | `compression` | zstd compression of encoded chunk bodies       |
//!
//! Compressed bodies are self-describing: a decoder recognises the zstd frame
//! magic and decompresses, otherwise it reads the body as plain MessagePack.
//! Enabling compression therefore only changes what an endpoint sends.

mod compression;

pub use compression::*;
