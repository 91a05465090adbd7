//! Compression extension
//!
//! zstd compression for encoded chunk bodies.

use std::io::Read;

use thiserror::Error;

/// Minimum payload size to attempt compression
pub const MIN_COMPRESS_SIZE: usize = 64;

/// Default zstd compression level (1-22, higher = smaller but slower)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default limit on decompressed size (16 MiB).
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Magic number opening every zstd frame (little-endian 0xFD2FB528).
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Errors from compression operations.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Zstd compression failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Zstd decompression failed.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Decompressed size exceeds safety limit.
    #[error("decompressed size exceeded limit of {limit} bytes")]
    SizeExceeded {
        /// Maximum allowed size.
        limit: usize,
    },
}

/// Compression configuration
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum size to attempt compression
    pub min_size: usize,
    /// Compression level (1-22)
    pub level: i32,
    /// Maximum decompressed size
    pub max_decompressed_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size: MIN_COMPRESS_SIZE,
            level: DEFAULT_COMPRESSION_LEVEL,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

/// Compressor for encoded chunk bodies
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Create a new compressor with default settings
    pub fn new() -> Self {
        Self {
            config: CompressionConfig::default(),
        }
    }

    /// Create a compressor with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        let mut compressor = Self { config };
        compressor.set_level(compressor.config.level);
        compressor
    }

    /// Set compression level
    pub fn set_level(&mut self, level: i32) {
        self.config.level = level.clamp(1, 22);
    }

    /// Get compression level
    pub fn level(&self) -> i32 {
        self.config.level
    }

    /// Get the configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compress data if it meets the minimum size threshold
    ///
    /// Returns the original data if compression isn't beneficial.
    pub fn compress(&self, data: &[u8]) -> Result<CompressResult, CompressionError> {
        if data.len() < self.config.min_size {
            return Ok(CompressResult::Uncompressed(data.to_vec()));
        }

        let compressed = zstd::encode_all(data, self.config.level)
            .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;

        if compressed.len() >= data.len() {
            return Ok(CompressResult::Uncompressed(data.to_vec()));
        }

        Ok(CompressResult::Compressed(compressed))
    }

    /// Decompress a zstd frame, enforcing `max_decompressed_size`.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let limit = self.config.max_decompressed_size;
        let decoder = zstd::Decoder::new(data)
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;

        // One byte past the limit is enough to detect an oversized frame.
        let mut output = Vec::new();
        decoder
            .take(limit as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;

        if output.len() > limit {
            return Err(CompressionError::SizeExceeded { limit });
        }

        Ok(output)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether `data` starts with a zstd frame.
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

/// Result of compression attempt
#[derive(Debug, Clone)]
pub enum CompressResult {
    /// Data was compressed
    Compressed(Vec<u8>),
    /// Data was not compressed (too small or compression not beneficial)
    Uncompressed(Vec<u8>),
}

impl CompressResult {
    /// Get the data bytes
    pub fn data(&self) -> &[u8] {
        match self {
            CompressResult::Compressed(data) => data,
            CompressResult::Uncompressed(data) => data,
        }
    }

    /// Check if data was compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, CompressResult::Compressed(_))
    }

    /// Consume and get the data
    pub fn into_data(self) -> Vec<u8> {
        match self {
            CompressResult::Compressed(data) => data,
            CompressResult::Uncompressed(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_small_data() {
        let compressor = Compressor::new();
        let data = b"hello";

        let result = compressor.compress(data).unwrap();
        assert!(!result.is_compressed());
        assert_eq!(result.data(), data);
    }

    #[test]
    fn test_compressed_frame_is_detected() {
        let compressor = Compressor::new();
        // A flat chunk of zero heights compresses very well.
        let data = vec![0u8; 4096];

        let result = compressor.compress(&data).unwrap();
        assert!(result.is_compressed());
        assert!(is_compressed(result.data()));
        assert!(!is_compressed(&data));

        let decompressed = compressor.decompress(result.data()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_size_limit() {
        let compressor = Compressor::with_config(CompressionConfig {
            max_decompressed_size: 100,
            ..Default::default()
        });

        let data: Vec<u8> = vec![0; 200];
        let result = compressor.compress(&data).unwrap();
        assert!(result.is_compressed());

        let err = compressor.decompress(result.data());
        assert!(matches!(err, Err(CompressionError::SizeExceeded { limit: 100 })));
    }

    #[test]
    fn test_garbage_frame() {
        let compressor = Compressor::new();
        let mut data = ZSTD_MAGIC.to_vec();
        data.extend_from_slice(&[0xFF; 8]);

        assert!(matches!(
            compressor.decompress(&data),
            Err(CompressionError::DecompressionFailed(_))
        ));
    }

    #[test]
    fn test_compression_level() {
        let mut compressor = Compressor::new();
        assert_eq!(compressor.level(), DEFAULT_COMPRESSION_LEVEL);

        compressor.set_level(10);
        assert_eq!(compressor.level(), 10);

        compressor.set_level(100);
        assert_eq!(compressor.level(), 22);

        compressor.set_level(0);
        assert_eq!(compressor.level(), 1);
    }
}
