//! Per-chunk cache of last-known-good values.

use std::collections::HashMap;

use crate::core::{ChunkKey, Lod, Value};

/// A cached chunk and the level of detail it was built at.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedChunk {
    /// Last successfully reconstructed value.
    pub value: Value,
    /// Level of detail of `value`.
    pub lod: Lod,
}

/// Last-known-good value per chunk.
///
/// Entries are created on the first successful decode for a key and
/// overwritten on every later one. Nothing is evicted here; callers that
/// need a bound call [`ChunkCache::remove`] themselves.
#[derive(Debug, Clone, Default)]
pub struct ChunkCache {
    entries: HashMap<ChunkKey, CachedChunk>,
}

impl ChunkCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a chunk.
    pub fn get(&self, key: &ChunkKey) -> Option<&CachedChunk> {
        self.entries.get(key)
    }

    /// Look up a chunk built at a specific level of detail.
    pub fn get_at(&self, key: &ChunkKey, lod: Lod) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|entry| entry.lod == lod)
            .map(|entry| &entry.value)
    }

    /// Check if a chunk is cached.
    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a chunk, returning the previous entry.
    pub fn insert(&mut self, key: ChunkKey, value: Value, lod: Lod) -> Option<CachedChunk> {
        self.entries.insert(key, CachedChunk { value, lod })
    }

    /// Drop a chunk.
    pub fn remove(&mut self, key: &ChunkKey) -> Option<CachedChunk> {
        self.entries.remove(key)
    }

    /// Number of cached chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over cached chunks.
    pub fn iter(&self) -> impl Iterator<Item = (&ChunkKey, &CachedChunk)> {
        self.entries.iter()
    }

    /// Drop every chunk.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let mut cache = ChunkCache::new();
        let key = ChunkKey::new(0, 0);

        assert!(cache.insert(key, Value::floats([0.1]), Lod::FULL).is_none());
        let previous = cache.insert(key, Value::floats([0.2]), Lod::FULL).unwrap();
        assert_eq!(previous.value, Value::floats([0.1]));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().value, Value::floats([0.2]));
    }

    #[test]
    fn test_get_at_matches_lod() {
        let mut cache = ChunkCache::new();
        let key = ChunkKey::new(2, -1);
        cache.insert(key, Value::floats([1.0]), Lod::from_fraction(0.5));

        assert!(cache.get_at(&key, Lod::from_fraction(0.5)).is_some());
        assert!(cache.get_at(&key, Lod::FULL).is_none());
        assert!(cache.get_at(&ChunkKey::new(0, 0), Lod::from_fraction(0.5)).is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = ChunkCache::new();
        cache.insert(ChunkKey::new(0, 0), Value::floats([1.0]), Lod::FULL);
        cache.insert(ChunkKey::new(1, 0), Value::floats([2.0]), Lod::FULL);

        assert!(cache.remove(&ChunkKey::new(0, 0)).is_some());
        assert!(!cache.contains(&ChunkKey::new(0, 0)));
        assert_eq!(cache.iter().count(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
