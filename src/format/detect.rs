//! Input format detection by file extension.
//!
//! A FLIM folder is homogeneous in practice, so its format is the most
//! frequent extension among its immediate children. Supported inputs:
//!
//! - **PTU**: PicoQuant unified TTTR files (`.ptu`)
//! - **SDT**: Becker & Hickl files (`.sdt`)
//! - **TIFF**: plain multi-page TIFF (`.tif`)
//! - **Zarr**: an already assembled store directory (`.zarr`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoError, StackError};
use crate::stack::natural::sort_paths_naturally;

/// Extensions accepted as input, with their leading dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".ptu", ".sdt", ".tif", ".zarr"];

/// Extension of an assembled chunked store.
pub const STORE_EXTENSION: &str = ".zarr";

// =============================================================================
// FlimFormat
// =============================================================================

/// A per-file acquisition format with a native decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlimFormat {
    Ptu,
    Sdt,
    Tiff,
}

impl FlimFormat {
    /// Short name stored as `file_type` in channel metadata.
    pub const fn name(self) -> &'static str {
        match self {
            FlimFormat::Ptu => "ptu",
            FlimFormat::Sdt => "sdt",
            FlimFormat::Tiff => "tif",
        }
    }

    /// Extension with its leading dot.
    pub const fn extension(self) -> &'static str {
        match self {
            FlimFormat::Ptu => ".ptu",
            FlimFormat::Sdt => ".sdt",
            FlimFormat::Tiff => ".tif",
        }
    }

    /// Map an extension (with leading dot) to a file format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            ".ptu" => Some(FlimFormat::Ptu),
            ".sdt" => Some(FlimFormat::Sdt),
            ".tif" => Some(FlimFormat::Tiff),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlimFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Raw acquisitions of one format
    Files(FlimFormat),
    /// An assembled `.zarr` store
    Store,
}

// =============================================================================
// Extension Resolution
// =============================================================================

/// Extension of `path` with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Most frequent extension among `paths`; ties go to the first one seen.
///
/// Returns an empty string for an empty list.
pub fn most_frequent_extension<P: AsRef<Path>>(paths: &[P]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for path in paths {
        let ext = extension_of(path.as_ref());
        match counts.iter_mut().find(|(seen, _)| *seen == ext) {
            Some((_, n)) => *n += 1,
            None => counts.push((ext, 1)),
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (ext, n) in counts {
        if best.as_ref().map_or(true, |(_, top)| n > *top) {
            best = Some((ext, n));
        }
    }
    best.map(|(ext, _)| ext).unwrap_or_default()
}

/// Determine the dominant extension of a file or folder.
///
/// A directory with its own suffix (a `.zarr` store) resolves to that suffix;
/// a plain directory resolves to the mode of its files' suffixes. Child
/// directories, such as a store written into the folder, are not counted.
pub fn resolve_extension(path: &Path) -> Result<String, IoError> {
    if !path.is_dir() {
        return Ok(extension_of(path));
    }
    let own = extension_of(path);
    if !own.is_empty() {
        return Ok(own);
    }
    let files: Vec<PathBuf> = list_children(path)?
        .into_iter()
        .filter(|p| p.is_file())
        .collect();
    Ok(most_frequent_extension(&files))
}

/// Resolve `path` and map its extension to an input kind.
pub fn detect_input(path: &Path) -> Result<InputKind, StackError> {
    let extension = resolve_extension(path)?;
    if extension == STORE_EXTENSION {
        return Ok(InputKind::Store);
    }
    FlimFormat::from_extension(&extension)
        .map(InputKind::Files)
        .ok_or(StackError::UnrecognizedFormat { extension })
}

/// Immediate children of `folder`, in natural order.
pub fn list_children(folder: &Path) -> Result<Vec<PathBuf>, IoError> {
    let entries = std::fs::read_dir(folder).map_err(|e| IoError::from_std(folder, e))?;
    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IoError::from_std(folder, e))?;
        children.push(entry.path());
    }
    sort_paths_naturally(&mut children);
    Ok(children)
}
