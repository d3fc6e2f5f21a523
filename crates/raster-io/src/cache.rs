//! LRU cache for decoded TIFF chunks.
//!
//! Windows rarely line up with strips or tiles, and a gap-fill halo reads
//! the rows around every block twice, so decoded chunks are kept until the
//! memory limit pushes them out.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Hit/miss counters for one reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memory-bounded LRU of decoded chunks keyed by chunk index.
pub struct ChunkCache {
    cache: LruCache<u32, Arc<Vec<f64>>>,
    memory_limit: usize,
    current_memory: usize,
    stats: CacheStats,
}

impl ChunkCache {
    /// Create a cache holding at most `memory_limit` bytes of samples.
    pub fn new(memory_limit: usize, chunk_pixels: usize) -> Self {
        let chunk_bytes = (chunk_pixels * std::mem::size_of::<f64>()).max(1);
        let max_entries = (memory_limit / chunk_bytes).max(4);
        Self {
            cache: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
            memory_limit,
            current_memory: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, index: u32) -> Option<Arc<Vec<f64>>> {
        match self.cache.get(&index) {
            Some(chunk) => {
                self.stats.hits += 1;
                Some(chunk.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a chunk, evicting least recently used ones to make room.
    pub fn insert(&mut self, index: u32, chunk: Arc<Vec<f64>>) {
        let size = chunk.len() * std::mem::size_of::<f64>();

        while self.current_memory + size > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                self.current_memory = self
                    .current_memory
                    .saturating_sub(evicted.len() * std::mem::size_of::<f64>());
                self.stats.evictions += 1;
            }
        }

        if size <= self.memory_limit {
            if let Some((_, replaced)) = self.cache.push(index, chunk) {
                self.current_memory = self
                    .current_memory
                    .saturating_sub(replaced.len() * std::mem::size_of::<f64>());
                self.stats.evictions += 1;
            }
            self.current_memory += size;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            ..self.stats
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }
}
