use std::path::Path;

use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from an acquisition file.
///
/// The TIFF parser walks IFD chains through this seam instead of slicing a
/// buffer directly, so page data can be located before it is copied.
pub trait RangeReader {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (used in log lines).
    fn identifier(&self) -> &str;
}

// =============================================================================
// FileSource
// =============================================================================

/// A whole file loaded into a shared buffer.
///
/// FLIM acquisitions are decoded in full, so the file is read once and every
/// range request becomes a cheap `Bytes::slice`.
#[derive(Debug, Clone)]
pub struct FileSource {
    data: Bytes,
    identifier: String,
}

impl FileSource {
    /// Read the file at `path` into memory.
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let data = std::fs::read(path).map_err(|e| IoError::from_std(path, e))?;
        Ok(Self {
            data: Bytes::from(data),
            identifier: path.display().to_string(),
        })
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }

    /// The full file contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl RangeReader for FileSource {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.size();
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= size => Ok(self.data.slice(offset as usize..end as usize)),
            _ => Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            }),
        }
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
