//! Consumer interface for reconstructed chunks.

use super::value::ChunkKey;

/// Receives reconstructed chunk grids.
///
/// This is the only view the sync core has of whatever renders or stores
/// terrain: a flat row-major sequence of heights plus its side length.
///
/// # Example
///
/// ```
/// use terrain_sync::core::{ChunkKey, ChunkSink};
///
/// #[derive(Default)]
/// struct Heights {
///     last: Option<(ChunkKey, usize)>,
/// }
///
/// impl ChunkSink for Heights {
///     fn on_chunk_ready(&mut self, key: ChunkKey, values: &[f64], side_length: usize) {
///         assert!(side_length * side_length <= values.len());
///         self.last = Some((key, side_length));
///     }
///
///     fn on_error(&mut self, message: &str) {
///         eprintln!("chunk stream failed: {message}");
///     }
/// }
/// ```
pub trait ChunkSink: Send {
    /// A chunk was reconstructed and cached.
    ///
    /// `side_length` is `floor(sqrt(values.len()))`.
    fn on_chunk_ready(&mut self, key: ChunkKey, values: &[f64], side_length: usize);

    /// The stream failed. The last delivered grid for every key stays valid.
    fn on_error(&mut self, message: &str);
}
