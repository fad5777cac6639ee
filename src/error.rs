use std::path::{Path, PathBuf};

use thiserror::Error;

/// I/O errors raised while reading source files or writing a store.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Filesystem operation failed
    #[error("I/O error on {}: {message}", .path.display())]
    Filesystem { path: PathBuf, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },
}

impl IoError {
    /// Wrap a `std::io::Error` together with the path it concerns.
    pub fn from_std(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        IoError::Filesystem {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Only uncompressed pages can be decoded
    #[error("Unsupported compression: {0} (only uncompressed pages are supported)")]
    UnsupportedCompression(String),

    /// Pixel layout this reader cannot express as a dense array
    #[error("Unsupported sample format: {bits} bits per sample, format {format}, {samples} samples per pixel")]
    UnsupportedSampleFormat { bits: u16, format: u16, samples: u16 },

    /// File uses tiles instead of strips
    #[error("Unsupported organization: file uses tiles instead of strips")]
    TiledOrganization,

    /// Pages differ in size or pixel type
    #[error("Page {page} does not match the first page: {message}")]
    InconsistentPages { page: usize, message: String },

    /// The IFD chain holds no image
    #[error("File contains no image pages")]
    NoPages,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors raised by the per-format decoders.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Reading the file failed, or the data ended early
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF structure error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File does not start with the expected signature
    #[error("Invalid {format} signature")]
    InvalidMagic { format: &'static str },

    /// Header is structurally invalid
    #[error("Invalid {format} header: {message}")]
    InvalidHeader {
        format: &'static str,
        message: String,
    },

    /// A header field the decoder depends on is absent
    #[error("Missing {format} header tag: {tag}")]
    MissingHeaderTag {
        format: &'static str,
        tag: &'static str,
    },

    /// PTU record type without a T3 decoder
    #[error("Unsupported PTU record type: 0x{0:08X}")]
    UnsupportedRecordType(u32),

    /// Compressed payloads are not decoded
    #[error("Unsupported {format} compression: {message}")]
    UnsupportedCompression {
        format: &'static str,
        message: String,
    },
}

/// Errors raised by the chunked array store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem failure while reading or writing the store
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Array metadata or attributes could not be understood
    #[error("Invalid store metadata at {}: {message}", .path.display())]
    InvalidMetadata { path: PathBuf, message: String },

    /// Element type requested does not match the stored type
    #[error("Data type mismatch: store holds {stored}, requested {requested}")]
    DtypeMismatch {
        stored: &'static str,
        requested: &'static str,
    },

    /// Region lies (partly) outside the array
    #[error("Region at {offset:?} with shape {region:?} exceeds array shape {shape:?}")]
    RegionOutOfBounds {
        offset: Vec<usize>,
        region: Vec<usize>,
        shape: Vec<usize>,
    },

    /// The zarr library rejected a store, array or chunk operation
    #[error("Zarr error at {}: {message}", .path.display())]
    Zarr { path: PathBuf, message: String },
}

impl StoreError {
    /// Wrap an error from `zarrs` together with the store it concerns.
    pub fn zarr(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        StoreError::Zarr {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors surfaced by planning, assembly and conversion.
///
/// Every variant is fatal to the current conversion attempt.
#[derive(Debug, Clone, Error)]
pub enum StackError {
    /// The dominant extension is not one of the supported formats
    #[error("Unrecognized format: '{extension}'")]
    UnrecognizedFormat { extension: String },

    /// The folder holds no file of the resolved format
    #[error("No '{extension}' files found in {}", .folder.display())]
    EmptyFolder { folder: PathBuf, extension: String },

    /// An explicit file list was empty
    #[error("No '{extension}' files given")]
    NoFiles { extension: String },

    /// A file could not be decoded by its format reader
    #[error("Failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// Filename indices cannot be mapped onto the stack unambiguously
    #[error("Ambiguous indexing: {reason}")]
    AmbiguousIndexing { reason: String },

    /// A slice's element type differs from the planned one
    #[error("Data type mismatch in {}: planned {expected}, decoded {actual}", .path.display())]
    DtypeMismatch {
        path: PathBuf,
        expected: &'static str,
        actual: &'static str,
    },

    /// A slice is larger than the planned slice shape
    #[error("Slice {} has shape {actual:?}, larger than the planned {planned:?}", .path.display())]
    SliceExceedsPlan {
        path: PathBuf,
        actual: [usize; 4],
        planned: [usize; 4],
    },

    /// Filesystem failure outside the store
    #[error("I/O failure: {0}")]
    Io(#[from] IoError),

    /// Chunked store allocation or write failure
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

impl StackError {
    /// Build a decode error for `path`.
    pub fn decode(path: impl AsRef<Path>, source: DecodeError) -> Self {
        StackError::Decode {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the failure happened while touching the filesystem or the store.
    pub fn is_io_failure(&self) -> bool {
        matches!(self, StackError::Io(_) | StackError::Store(_))
    }
}
