//! Writing a planned stack into a Zarr store, and reading it back.
//!
//! The store is a Zarr v3 array at the root of a filesystem store: an
//! uncompressed `uint8`/`uint16`/`uint32`/`float32` array with fill value 0,
//! so chunks that were never written read back as zeros.

use std::num::NonZeroU64;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array6, Axis, Ix6};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use zarrs::array::chunk_grid::ChunkGrid;
use zarrs::array::{Array, ArrayBuilder, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;

use crate::array::{dispatch, DType, Element, SliceArray, StackArray};
use crate::error::{IoError, StackError, StoreError};
use crate::format::{ChannelMetadata, FlimFormat};
use crate::stack::{SampleCache, StackPlan, ZOffsetPolicy};

use super::chunks::store_chunks;

/// Node path of the stack array inside its store.
const ARRAY_NODE: &str = "/";

/// Axis names, in stack order. Recorded both as the array's dimension
/// names and as the `_ARRAY_DIMENSIONS` attribute read by xarray.
pub const ARRAY_DIMENSIONS: [&str; 6] = ["channel", "micro_time", "time", "z", "y", "x"];

// =============================================================================
// Attributes
// =============================================================================

/// Attributes stored next to the stack array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackAttributes {
    #[serde(rename = "_ARRAY_DIMENSIONS", default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub format: Option<FlimFormat>,
    #[serde(default)]
    pub z_offset_policy: ZOffsetPolicy,
    /// Metadata of the first sample, one entry per channel
    #[serde(default)]
    pub channel_metadata: Vec<ChannelMetadata>,
}

impl StackAttributes {
    fn for_plan(plan: &StackPlan) -> Self {
        Self {
            dimensions: ARRAY_DIMENSIONS.iter().map(|d| d.to_string()).collect(),
            format: Some(plan.format),
            z_offset_policy: plan.z_policy,
            channel_metadata: plan.channel_metadata.clone(),
        }
    }

    fn to_json(&self, path: &Path) -> Result<Map<String, Value>, StoreError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(StoreError::InvalidMetadata {
                path: path.to_path_buf(),
                message: format!("attributes serialize to {}, not an object", other),
            }),
            Err(e) => Err(StoreError::InvalidMetadata {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Write the stack described by `plan` into a new store at `output`.
///
/// An existing store at `output` is replaced. On failure the partially
/// written store is removed before the error is returned.
pub fn write_store(
    plan: &StackPlan,
    output: &Path,
    cache: &mut SampleCache,
) -> Result<ChunkedStack, StackError> {
    if output.exists() {
        debug!(path = %output.display(), "Replacing existing store");
        std::fs::remove_dir_all(output).map_err(|e| IoError::from_std(output, e))?;
    }

    match fill_store(plan, output, cache) {
        Ok(stack) => {
            info!(
                path = %output.display(),
                shape = ?stack.shape(),
                chunks = ?stack.chunks(),
                "Wrote stack store"
            );
            Ok(stack)
        }
        Err(err) => {
            if output.exists() {
                if let Err(e) = std::fs::remove_dir_all(output) {
                    warn!(
                        path = %output.display(),
                        error = %e,
                        "Failed to remove partial store"
                    );
                }
            }
            Err(err)
        }
    }
}

fn fill_store(
    plan: &StackPlan,
    output: &Path,
    cache: &mut SampleCache,
) -> Result<ChunkedStack, StackError> {
    let shape = plan.target_shape();
    let chunks = store_chunks(shape, plan.dtype);
    let attributes = StackAttributes::for_plan(plan);

    info!(
        path = %output.display(),
        shape = ?shape,
        chunks = ?chunks,
        dtype = %plan.dtype,
        "Allocating stack store"
    );
    let array = create_array(output, shape, chunks, plan.dtype, &attributes)?;

    for (time, z, file) in plan.placements() {
        let sample = cache.take_or_read(plan.format, &file.path)?;
        plan.check_sample(file, &sample)?;
        write_slice(&array, output, time, z, &sample.data)?;
        debug!(path = %file.path.display(), time, z, "Wrote slice");
    }

    Ok(ChunkedStack {
        array: Arc::new(array),
        path: output.to_path_buf(),
        shape,
        chunks,
        dtype: plan.dtype,
        attributes,
    })
}

/// Create a zero-filled array of `shape` at `path` and store its metadata.
fn create_array(
    path: &Path,
    shape: [usize; 6],
    chunks: [usize; 6],
    dtype: DType,
    attributes: &StackAttributes,
) -> Result<Array<FilesystemStore>, StoreError> {
    std::fs::create_dir_all(path).map_err(|e| IoError::from_std(path, e))?;
    let store = Arc::new(FilesystemStore::new(path).map_err(|e| StoreError::zarr(path, e))?);

    let chunk_shape: Vec<NonZeroU64> = chunks
        .iter()
        .map(|&c| NonZeroU64::new(c as u64).unwrap_or(NonZeroU64::MIN))
        .collect();
    let array = ArrayBuilder::new(
        shape.iter().map(|&s| s as u64).collect(),
        dtype.zarr_data_type(),
        ChunkGrid::from(chunk_shape),
        FillValue::new(vec![0; dtype.size_in_bytes()]),
    )
    .dimension_names(ARRAY_DIMENSIONS.into())
    .attributes(attributes.to_json(path)?)
    .build(store, ARRAY_NODE)
    .map_err(|e| StoreError::zarr(path, e))?;
    array.store_metadata().map_err(|e| StoreError::zarr(path, e))?;
    Ok(array)
}

/// Write one slice at `[:c, :b, time, z, :h, :w]`.
fn write_slice(
    array: &Array<FilesystemStore>,
    path: &Path,
    time: usize,
    z: usize,
    slice: &SliceArray,
) -> Result<(), StoreError> {
    let start = [0, 0, time as u64, z as u64, 0, 0];
    dispatch!(SliceArray, slice, data => {
        let block = data
            .view()
            .insert_axis(Axis(2))
            .insert_axis(Axis(3))
            .into_dyn()
            .to_owned();
        array
            .store_array_subset_ndarray(&start, block)
            .map_err(|e| StoreError::zarr(path, e))
    })
}

// =============================================================================
// ChunkedStack
// =============================================================================

/// A stack held in an on-disk Zarr store.
#[derive(Clone)]
pub struct ChunkedStack {
    array: Arc<Array<FilesystemStore>>,
    path: PathBuf,
    shape: [usize; 6],
    chunks: [usize; 6],
    dtype: DType,
    attributes: StackAttributes,
}

impl ChunkedStack {
    /// Open a stack store written by [`write_store`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.is_dir() {
            return Err(IoError::from_std(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "store directory not found"),
            )
            .into());
        }
        let store = Arc::new(FilesystemStore::new(path).map_err(|e| StoreError::zarr(path, e))?);
        let array = Array::open(store, ARRAY_NODE).map_err(|e| StoreError::zarr(path, e))?;

        let invalid = |message: String| StoreError::InvalidMetadata {
            path: path.to_path_buf(),
            message,
        };
        let rank = array.shape().len();
        if rank != 6 {
            return Err(invalid(format!("expected 6 axes, found {}", rank)));
        }
        let dtype = DType::from_zarr_data_type(array.data_type())
            .ok_or_else(|| invalid(format!("unsupported data type {:?}", array.data_type())))?;
        let chunks = array
            .chunk_shape(&[0; 6])
            .map_err(|e| StoreError::zarr(path, e))?
            .iter()
            .map(|c| c.get() as usize)
            .collect::<Vec<_>>();
        let attributes = serde_json::from_value(Value::Object(array.attributes().clone()))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            shape: to_six(array.shape().iter().map(|&s| s as usize)),
            chunks: to_six(chunks),
            array: Arc::new(array),
            path: path.to_path_buf(),
            dtype,
            attributes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shape (channel, bin, time, z, y, x).
    pub fn shape(&self) -> [usize; 6] {
        self.shape
    }

    pub fn chunks(&self) -> [usize; 6] {
        self.chunks
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn attributes(&self) -> &StackAttributes {
        &self.attributes
    }

    /// Source format recorded at conversion time.
    pub fn format(&self) -> Option<FlimFormat> {
        self.attributes.format
    }

    pub fn channel_metadata(&self) -> &[ChannelMetadata] {
        &self.attributes.channel_metadata
    }

    /// Read the region of `shape` starting at `offset`.
    pub fn read_region<T: Element>(
        &self,
        offset: [usize; 6],
        shape: [usize; 6],
    ) -> Result<Array6<T>, StoreError> {
        if T::DTYPE != self.dtype {
            return Err(StoreError::DtypeMismatch {
                stored: self.dtype.name(),
                requested: T::DTYPE.name(),
            });
        }
        let fits = offset
            .iter()
            .zip(shape.iter())
            .zip(self.shape.iter())
            .all(|((&o, &s), &extent)| o.checked_add(s).is_some_and(|end| end <= extent));
        if !fits {
            return Err(StoreError::RegionOutOfBounds {
                offset: offset.to_vec(),
                region: shape.to_vec(),
                shape: self.shape.to_vec(),
            });
        }

        let ranges: Vec<Range<u64>> = offset
            .iter()
            .zip(shape.iter())
            .map(|(&o, &s)| o as u64..(o + s) as u64)
            .collect();
        let data = self
            .array
            .retrieve_array_subset_ndarray::<T>(&ArraySubset::new_with_ranges(&ranges))
            .map_err(|e| StoreError::zarr(&self.path, e))?;
        data.into_dimensionality::<Ix6>()
            .map_err(|e| StoreError::InvalidMetadata {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    /// Read the whole stack as `T`.
    pub fn read_all<T: Element>(&self) -> Result<Array6<T>, StoreError> {
        self.read_region([0; 6], self.shape())
    }

    /// Read the whole stack into memory with its stored element type.
    pub fn to_stack_array(&self) -> Result<StackArray, StoreError> {
        Ok(match self.dtype() {
            DType::U8 => u8::wrap_stack(self.read_all()?),
            DType::U16 => u16::wrap_stack(self.read_all()?),
            DType::U32 => u32::wrap_stack(self.read_all()?),
            DType::F32 => f32::wrap_stack(self.read_all()?),
        })
    }
}

impl std::fmt::Debug for ChunkedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedStack")
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

fn to_six(values: impl IntoIterator<Item = usize>) -> [usize; 6] {
    let mut out = [0usize; 6];
    for (o, v) in out.iter_mut().zip(values) {
        *o = v;
    }
    out
}
