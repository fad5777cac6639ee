//! End-to-end entry points: converting a folder and loading a path.
//!
//! Both functions resolve the input format, plan the stack, and fill it.
//! Problems a user can fix (wrong folder, unsupported files, a stack too
//! large for memory) are also reported through a [`NotificationSink`], the
//! way a viewer would surface them next to the returned error.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::array::{DType, StackArray};
use crate::error::StackError;
use crate::format::{
    detect_input, ChannelMetadata, FlimFormat, InputKind, STORE_EXTENSION, SUPPORTED_EXTENSIONS,
};
use crate::stack::{
    assemble, estimate_megabytes, plan, PlanOptions, SampleCache, StackTarget, ZOffsetPolicy,
    DEFAULT_SAMPLE_CACHE_BYTES, STORE_THRESHOLD_MB,
};
use crate::store::{write_store, ChunkedStack};

/// Shown when a folder holds nothing that looks like a FLIM acquisition.
pub const EMPTY_FOLDER_MESSAGE: &str = "Please select a folder containing FLIM images.";

// =============================================================================
// Notifications
// =============================================================================

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Receiver of human-readable notifications.
pub trait NotificationSink {
    fn notify(&self, level: NotificationLevel, message: &str);
}

/// Forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Info => info!("{}", message),
            NotificationLevel::Warning => warn!("{}", message),
            NotificationLevel::Error => error!("{}", message),
        }
    }
}

fn unsupported_message(extension: &str) -> String {
    format!(
        "Unsupported file extension '{}'. Supported file extensions are: {}",
        extension,
        SUPPORTED_EXTENSIONS.join(", ")
    )
}

/// Report `err` through `sink` and hand it back.
///
/// The empty-folder prompt goes out at info level, everything else as an error.
fn report(sink: &dyn NotificationSink, err: StackError) -> StackError {
    let (level, message) = match &err {
        StackError::UnrecognizedFormat { extension } if extension.is_empty() => {
            (NotificationLevel::Info, EMPTY_FOLDER_MESSAGE.to_string())
        }
        StackError::EmptyFolder { .. } | StackError::NoFiles { .. } => {
            (NotificationLevel::Info, EMPTY_FOLDER_MESSAGE.to_string())
        }
        StackError::UnrecognizedFormat { extension } => {
            (NotificationLevel::Error, unsupported_message(extension))
        }
        other => (NotificationLevel::Error, other.to_string()),
    };
    sink.notify(level, &message);
    err
}

// =============================================================================
// Options
// =============================================================================

/// Options for [`convert_folder`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    pub plan: PlanOptions,
    /// Store location; defaults to `<folder>/<folder name>.zarr`
    pub output: Option<PathBuf>,
    /// Byte budget of the sample cache, zero to disable it
    pub cache_bytes: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            plan: PlanOptions::default(),
            output: None,
            cache_bytes: DEFAULT_SAMPLE_CACHE_BYTES,
        }
    }
}

/// Options for [`load_stack`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    pub plan: PlanOptions,
    pub cache_bytes: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            plan: PlanOptions::default(),
            cache_bytes: DEFAULT_SAMPLE_CACHE_BYTES,
        }
    }
}

/// Default store location for `folder`: `<folder>/<folder name>.zarr`.
pub fn default_output_path(folder: &Path) -> PathBuf {
    let name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stack".to_string());
    folder.join(format!("{}{}", name, STORE_EXTENSION))
}

// =============================================================================
// Conversion
// =============================================================================

/// Resolve the acquisition format of a folder of raw files.
fn folder_format(folder: &Path) -> Result<FlimFormat, StackError> {
    match detect_input(folder)? {
        InputKind::Files(format) => Ok(format),
        InputKind::Store => Err(StackError::UnrecognizedFormat {
            extension: STORE_EXTENSION.to_string(),
        }),
    }
}

/// Assemble every acquisition in `folder` into a chunked store.
pub fn convert_folder(
    folder: &Path,
    options: &ConvertOptions,
    sink: &dyn NotificationSink,
) -> Result<ChunkedStack, StackError> {
    let format = folder_format(folder).map_err(|e| report(sink, e))?;
    let mut cache = SampleCache::new(options.cache_bytes);
    let plan = plan(folder, format, &options.plan, &mut cache).map_err(|e| report(sink, e))?;

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(folder));
    let stack = write_store(&plan, &output, &mut cache).map_err(|e| report(sink, e))?;
    sink.notify(
        NotificationLevel::Info,
        &format!("Stack written to {}", output.display()),
    );
    Ok(stack)
}

// =============================================================================
// Loading
// =============================================================================

/// A stack opened for viewing or analysis.
#[derive(Debug, Clone)]
pub enum LoadedStack {
    InMemory {
        stack: StackArray,
        metadata: Vec<ChannelMetadata>,
    },
    Chunked(ChunkedStack),
}

impl LoadedStack {
    /// Shape (channel, bin, time, z, y, x).
    pub fn shape(&self) -> [usize; 6] {
        match self {
            LoadedStack::InMemory { stack, .. } => stack.shape(),
            LoadedStack::Chunked(stack) => stack.shape(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            LoadedStack::InMemory { stack, .. } => stack.dtype(),
            LoadedStack::Chunked(stack) => stack.dtype(),
        }
    }

    pub fn metadata(&self) -> &[ChannelMetadata] {
        match self {
            LoadedStack::InMemory { metadata, .. } => metadata,
            LoadedStack::Chunked(stack) => stack.channel_metadata(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, LoadedStack::Chunked(_))
    }
}

/// Load a single file, an assembled store, or a folder of acquisitions.
///
/// - a file becomes an in-memory stack with one time point and one slice
/// - a `.zarr` store is opened in place
/// - a folder is assembled in memory below the size threshold and converted
///   to `<folder>/<folder name>.zarr` at or above it
pub fn load_stack(
    path: &Path,
    options: &LoadOptions,
    sink: &dyn NotificationSink,
) -> Result<LoadedStack, StackError> {
    let format = match detect_input(path).map_err(|e| report(sink, e))? {
        InputKind::Store => {
            let stack = ChunkedStack::open(path).map_err(|e| report(sink, e.into()))?;
            return Ok(LoadedStack::Chunked(stack));
        }
        InputKind::Files(format) => format,
    };

    if !path.is_dir() {
        let sample = format
            .read(path)
            .map_err(|e| report(sink, StackError::decode(path, e)))?;
        return Ok(LoadedStack::InMemory {
            stack: StackArray::from_slice(sample.data),
            metadata: sample.metadata,
        });
    }

    let mut cache = SampleCache::new(options.cache_bytes);
    let plan = plan(path, format, &options.plan, &mut cache).map_err(|e| report(sink, e))?;
    let paths: Vec<&Path> = plan.files().map(|f| f.path.as_path()).collect();
    let megabytes = estimate_megabytes(&paths).map_err(|e| report(sink, e.into()))?;

    match StackTarget::for_size(megabytes) {
        StackTarget::InMemory => {
            let stack = assemble(&plan, &mut cache).map_err(|e| report(sink, e))?;
            Ok(LoadedStack::InMemory {
                stack,
                metadata: plan.channel_metadata.clone(),
            })
        }
        StackTarget::Chunked => {
            let output = default_output_path(path);
            sink.notify(
                NotificationLevel::Warning,
                &format!(
                    "Stack is {:.0} MB, at or above the {:.0} MB limit for memory; \
                     writing it to {}",
                    megabytes,
                    STORE_THRESHOLD_MB,
                    output.display()
                ),
            );
            let stack = write_store(&plan, &output, &mut cache).map_err(|e| report(sink, e))?;
            Ok(LoadedStack::Chunked(stack))
        }
    }
}

// =============================================================================
// Inspection
// =============================================================================

/// Summary of what loading a path would produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub path: PathBuf,
    /// Format name, or `zarr` for an assembled store
    pub source: String,
    pub files: usize,
    pub shape: [usize; 6],
    pub dtype: DType,
    pub megabytes: f64,
    /// `None` for a store, which is already chunked
    pub in_memory: Option<bool>,
    pub z_offset_policy: Option<ZOffsetPolicy>,
    pub laser_frequency_mhz: Option<f64>,
}

/// Plan `path` without filling a stack.
pub fn inspect(path: &Path, options: &PlanOptions) -> Result<Inspection, StackError> {
    let format = match detect_input(path)? {
        InputKind::Store => {
            let stack = ChunkedStack::open(path)?;
            return Ok(Inspection {
                path: path.to_path_buf(),
                source: "zarr".to_string(),
                files: 0,
                shape: stack.shape(),
                dtype: stack.dtype(),
                megabytes: 0.0,
                in_memory: None,
                z_offset_policy: Some(stack.attributes().z_offset_policy),
                laser_frequency_mhz: laser_frequency(stack.channel_metadata()),
            });
        }
        InputKind::Files(format) => format,
    };

    if !path.is_dir() {
        let sample = format.read(path).map_err(|e| StackError::decode(path, e))?;
        let [c, b, h, w] = sample.shape();
        let megabytes = estimate_megabytes(&[path])?;
        return Ok(Inspection {
            path: path.to_path_buf(),
            source: format.name().to_string(),
            files: 1,
            shape: [c, b, 1, 1, h, w],
            dtype: sample.dtype(),
            megabytes,
            in_memory: Some(true),
            z_offset_policy: None,
            laser_frequency_mhz: laser_frequency(&sample.metadata),
        });
    }

    let plan = plan(path, format, options, &mut SampleCache::disabled())?;
    let paths: Vec<&Path> = plan.files().map(|f| f.path.as_path()).collect();
    let megabytes = estimate_megabytes(&paths)?;
    Ok(Inspection {
        path: path.to_path_buf(),
        source: format.name().to_string(),
        files: plan.file_count(),
        shape: plan.target_shape(),
        dtype: plan.dtype,
        megabytes,
        in_memory: Some(StackTarget::for_size(megabytes) == StackTarget::InMemory),
        z_offset_policy: Some(plan.z_policy),
        laser_frequency_mhz: laser_frequency(&plan.channel_metadata),
    })
}

fn laser_frequency(metadata: &[ChannelMetadata]) -> Option<f64> {
    metadata.iter().find_map(ChannelMetadata::laser_frequency_mhz)
}
