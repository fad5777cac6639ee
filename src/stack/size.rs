//! Choosing between in-memory assembly and a chunked store.
//!
//! The decision uses on-disk file sizes only. Compressed or sparse formats
//! (PTU records photons, not pixels) can expand considerably once decoded,
//! so the estimate is a rough guide rather than a memory bound.

use std::path::Path;

use crate::error::IoError;

/// Stacks of at least this many megabytes go to a chunked store.
pub const STORE_THRESHOLD_MB: f64 = 2000.0;

/// Where an assembled stack should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackTarget {
    InMemory,
    Chunked,
}

impl StackTarget {
    /// Target for a stack whose sources total `megabytes` on disk.
    pub fn for_size(megabytes: f64) -> Self {
        if megabytes >= STORE_THRESHOLD_MB {
            StackTarget::Chunked
        } else {
            StackTarget::InMemory
        }
    }
}

/// Total of `sizes` in decimal megabytes.
pub fn megabytes_from_sizes(sizes: impl IntoIterator<Item = u64>) -> f64 {
    let total: u64 = sizes.into_iter().sum();
    total as f64 / 1e6
}

/// Sum of the on-disk sizes of `paths` in decimal megabytes.
pub fn estimate_megabytes<P: AsRef<Path>>(paths: &[P]) -> Result<f64, IoError> {
    let mut sizes = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| IoError::from_std(path, e))?;
        sizes.push(meta.len());
    }
    Ok(megabytes_from_sizes(sizes))
}
