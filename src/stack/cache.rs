//! Decoded-sample cache shared by the planning and fill passes.
//!
//! Planning decodes every file to learn its shape. Without a cache the fill
//! pass decodes each file a second time; with one, recently decoded samples
//! are handed over instead.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total byte size of cached arrays and evicts
//! least-recently-used samples once the budget is exceeded. A sample larger
//! than the whole budget is never cached.

use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::error::StackError;
use crate::format::{FlimFormat, SliceSample};

/// Default cache budget: 256MB
pub const DEFAULT_SAMPLE_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// LRU cache of decoded samples keyed by path, bounded by total byte size.
pub struct SampleCache {
    cache: LruCache<PathBuf, SliceSample>,

    /// Maximum total size in bytes
    max_bytes: usize,

    /// Current total size in bytes
    current_bytes: usize,
}

impl SampleCache {
    /// Create a cache holding at most `max_bytes` of sample data.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            max_bytes,
            current_bytes: 0,
        }
    }

    /// A cache that never retains anything.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Store a decoded sample, evicting older ones to stay within budget.
    pub fn insert(&mut self, path: PathBuf, sample: SliceSample) {
        let size = sample.nbytes();
        if size > self.max_bytes {
            return;
        }

        if let Some(old) = self.cache.put(path, sample) {
            self.current_bytes -= old.nbytes();
        }
        self.current_bytes += size;

        while self.current_bytes > self.max_bytes {
            match self.cache.pop_lru() {
                Some((evicted, old)) => {
                    debug!(path = %evicted.display(), "Evicted cached sample");
                    self.current_bytes -= old.nbytes();
                }
                None => break,
            }
        }
    }

    /// Remove and return the cached sample for `path`.
    pub fn take(&mut self, path: &Path) -> Option<SliceSample> {
        let sample = self.cache.pop(path)?;
        self.current_bytes -= sample.nbytes();
        Some(sample)
    }

    /// Return the cached sample for `path`, decoding the file on a miss.
    pub fn take_or_read(
        &mut self,
        format: FlimFormat,
        path: &Path,
    ) -> Result<SliceSample, StackError> {
        if let Some(sample) = self.take(path) {
            debug!(path = %path.display(), "Sample cache hit");
            return Ok(sample);
        }
        format.read(path).map_err(|e| StackError::decode(path, e))
    }

    /// Number of cached samples.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Total bytes of cached sample data.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Configured budget in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for SampleCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CACHE_BYTES)
    }
}
