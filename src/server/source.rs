//! Chunk data sources.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

use crate::core::constants::DEFAULT_CHUNK_SIZE;
use crate::core::{ChunkKey, CodecError, Value};
use crate::sync::Codec;

/// Errors from loading chunk data.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Chunk file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Chunk file is not valid MessagePack.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: CodecError,
    },

    /// Chunk data is not a rectangular grid.
    #[error("chunk is not a grid: {0}")]
    NotAGrid(String),

    /// Loader task failed.
    #[error("chunk loader failed: {0}")]
    Loader(String),
}

/// Provides the current contents of terrain chunks.
///
/// A chunk is either a sequence of equal-length rows or a flat square
/// sequence of numbers. Implemented for any `Fn(ChunkKey) -> Value`.
///
/// Loading runs on the blocking thread pool.
pub trait ChunkSource: Send + Sync + 'static {
    /// Load the chunk at `key`.
    fn load(&self, key: ChunkKey) -> Result<Value, SourceError>;
}

impl<F> ChunkSource for F
where
    F: Fn(ChunkKey) -> Value + Send + Sync + 'static,
{
    fn load(&self, key: ChunkKey) -> Result<Value, SourceError> {
        Ok(self(key))
    }
}

/// Loads chunks from `{dir}/{cx}_{cy}.dat` MessagePack files.
///
/// A missing file yields a zero-filled `chunk_size × chunk_size` grid.
#[derive(Debug, Clone)]
pub struct FileChunkSource {
    dir: PathBuf,
    chunk_size: usize,
    codec: Codec,
}

impl FileChunkSource {
    /// Serve chunks from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            codec: Codec::new(),
        }
    }

    /// Set the side length of the zero-filled fallback chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Directory chunks are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the chunk at `key`.
    pub fn path_for(&self, key: ChunkKey) -> PathBuf {
        self.dir.join(format!("{}_{}.dat", key.cx, key.cy))
    }
}

impl ChunkSource for FileChunkSource {
    fn load(&self, key: ChunkKey) -> Result<Value, SourceError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => self
                .codec
                .decode(&bytes)
                .map_err(|source| SourceError::Decode { path, source }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "no chunk file, serving flat terrain");
                Ok(Value::floats(vec![0.0; self.chunk_size * self.chunk_size]))
            }
            Err(source) => Err(SourceError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("terrain-sync-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_is_flat() {
        let source = FileChunkSource::new(scratch_dir("missing")).with_chunk_size(4);
        let chunk = source.load(ChunkKey::new(99, -99)).unwrap();
        assert_eq!(chunk, Value::floats([0.0; 16]));
    }

    #[test]
    fn test_reads_msgpack_file() {
        let dir = scratch_dir("read");
        let source = FileChunkSource::new(&dir);
        let key = ChunkKey::new(-1, 2);
        assert_eq!(source.path_for(key), dir.join("-1_2.dat"));

        let rows = Value::Seq(vec![Value::floats([1.0, 2.0]), Value::floats([3.0, 4.0])]);
        std::fs::write(source.path_for(key), Codec::new().encode(&rows).unwrap()).unwrap();
        assert_eq!(source.load(key).unwrap(), rows);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = scratch_dir("corrupt");
        let source = FileChunkSource::new(&dir);
        let key = ChunkKey::new(7, 7);
        std::fs::write(source.path_for(key), [0x92, 0x01]).unwrap();
        assert!(matches!(source.load(key), Err(SourceError::Decode { .. })));
    }

    #[test]
    fn test_closure_source() {
        let source = |key: ChunkKey| Value::floats([f64::from(key.cx), f64::from(key.cy)]);
        assert_eq!(
            source.load(ChunkKey::new(3, 4)).unwrap(),
            Value::floats([3.0, 4.0])
        );
    }
}
