//! Planning a stack from a folder of acquisitions.
//!
//! The shape of the final stack is only known after every file has been
//! seen: acquisitions of one folder may differ in bin count or scan size,
//! and the time and z extents come from filename indices. Planning therefore
//! decodes every file once, records the per-axis maximum shape, and groups
//! the files by time index.
//!
//! # Layout
//!
//! - Time groups are ordered by ascending time index. Missing time points
//!   yield empty groups whose stack region stays zero.
//! - Within a group, slices follow natural filename order.
//! - The z offset of a slice is either its position in the group or its
//!   parsed z index, see [`ZOffsetPolicy`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::array::DType;
use crate::error::StackError;
use crate::format::detect::{extension_of, list_children};
use crate::format::{ChannelMetadata, FlimFormat, SliceSample};

use super::cache::SampleCache;
use super::natural::sort_paths_naturally;
use super::index::parse_indices;

// =============================================================================
// Source Files
// =============================================================================

/// One acquisition file and the indices parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Extension with its leading dot
    pub extension: String,
    pub time_index: Option<u32>,
    pub z_index: Option<u32>,
}

impl SourceFile {
    /// Parse the indices encoded in the file stem of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (time_index, z_index) = parse_indices(&stem);
        Self {
            extension: extension_of(&path),
            path,
            time_index,
            z_index,
        }
    }
}

/// Parse `paths` into source files, sorted naturally.
fn source_files(mut paths: Vec<PathBuf>, format: FlimFormat) -> Result<Vec<SourceFile>, StackError> {
    if paths.is_empty() {
        return Err(StackError::NoFiles {
            extension: format.extension().to_string(),
        });
    }
    sort_paths_naturally(&mut paths);
    Ok(paths.into_iter().map(SourceFile::from_path).collect())
}

/// Regular files of `folder` with the extension of `format`, natural order.
pub fn list_matching_files(folder: &Path, format: FlimFormat) -> Result<Vec<PathBuf>, StackError> {
    let files = list_children(folder)?
        .into_iter()
        .filter(|p| p.is_file() && extension_of(p) == format.extension())
        .collect();
    Ok(files)
}

// =============================================================================
// Options
// =============================================================================

/// Where along the z axis a slice lands.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ZOffsetPolicy {
    /// Position of the slice within its time group
    #[default]
    GroupPosition,
    /// The `_z` index parsed from the file name
    ParsedIndex,
}

impl ZOffsetPolicy {
    pub const fn name(self) -> &'static str {
        match self {
            ZOffsetPolicy::GroupPosition => "group-position",
            ZOffsetPolicy::ParsedIndex => "parsed-index",
        }
    }
}

impl std::fmt::Display for ZOffsetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options controlling how a folder is planned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub z_policy: ZOffsetPolicy,
}

// =============================================================================
// StackPlan
// =============================================================================

/// All slices sharing one time index, in natural filename order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    pub time: usize,
    pub slices: Vec<SourceFile>,
}

/// The layout of a stack, computed before any data is written.
#[derive(Debug, Clone, PartialEq)]
pub struct StackPlan {
    pub format: FlimFormat,
    /// Per-axis maximum over all samples: (channel, bin, y, x)
    pub slice_shape: [usize; 4],
    pub dtype: DType,
    /// One entry per time index from 0 to the maximum
    pub time_points: Vec<TimePoint>,
    pub z_policy: ZOffsetPolicy,
    /// Length of the z axis
    pub z_extent: usize,
    /// Metadata of the first sample, one entry per channel
    pub channel_metadata: Vec<ChannelMetadata>,
}

impl StackPlan {
    /// Shape of the assembled stack: (channel, bin, time, z, y, x).
    pub fn target_shape(&self) -> [usize; 6] {
        let [c, b, h, w] = self.slice_shape;
        [c, b, self.time_points.len(), self.z_extent, h, w]
    }

    /// Bytes of the assembled stack when held densely.
    pub fn nbytes(&self) -> u64 {
        self.target_shape()
            .iter()
            .map(|&n| n as u64)
            .product::<u64>()
            * self.dtype.size_in_bytes() as u64
    }

    /// Number of source files in the plan.
    pub fn file_count(&self) -> usize {
        self.time_points.iter().map(|tp| tp.slices.len()).sum()
    }

    /// Every source file, in fill order.
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.time_points.iter().flat_map(|tp| tp.slices.iter())
    }

    /// Target (time, z) of every source file, in fill order.
    pub fn placements(&self) -> Vec<(usize, usize, &SourceFile)> {
        let mut out = Vec::with_capacity(self.file_count());
        for tp in &self.time_points {
            for (position, file) in tp.slices.iter().enumerate() {
                let z = match (self.z_policy, file.z_index) {
                    (ZOffsetPolicy::ParsedIndex, Some(z)) => z as usize,
                    _ => position,
                };
                out.push((tp.time, z, file));
            }
        }
        out
    }

    /// Reject a decoded sample that does not fit the plan.
    pub fn check_sample(&self, file: &SourceFile, sample: &SliceSample) -> Result<(), StackError> {
        if sample.dtype() != self.dtype {
            return Err(StackError::DtypeMismatch {
                path: file.path.clone(),
                expected: self.dtype.name(),
                actual: sample.dtype().name(),
            });
        }
        let actual = sample.shape();
        if actual.iter().zip(self.slice_shape.iter()).any(|(a, p)| a > p) {
            return Err(StackError::SliceExceedsPlan {
                path: file.path.clone(),
                actual,
                planned: self.slice_shape,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Plan the stack of every `format` file in `folder`.
///
/// Decoded samples are offered to `cache` for reuse by the fill pass.
pub fn plan(
    folder: &Path,
    format: FlimFormat,
    options: &PlanOptions,
    cache: &mut SampleCache,
) -> Result<StackPlan, StackError> {
    let paths = list_matching_files(folder, format)?;
    if paths.is_empty() {
        return Err(StackError::EmptyFolder {
            folder: folder.to_path_buf(),
            extension: format.extension().to_string(),
        });
    }
    info!(
        folder = %folder.display(),
        format = %format,
        files = paths.len(),
        "Planning stack"
    );
    plan_files(paths, format, options, cache)
}

/// Plan a stack from an explicit list of files, in any order.
pub fn plan_files(
    paths: Vec<PathBuf>,
    format: FlimFormat,
    options: &PlanOptions,
    cache: &mut SampleCache,
) -> Result<StackPlan, StackError> {
    let files = source_files(paths, format)?;
    check_indexing(&files)?;

    let mut slice_shape = [0usize; 4];
    let mut first_dtype: Option<DType> = None;
    let mut dtype = DType::U8;
    let mut channel_metadata = Vec::new();

    for file in &files {
        let sample = format
            .read(&file.path)
            .map_err(|e| StackError::decode(&file.path, e))?;

        for (max, n) in slice_shape.iter_mut().zip(sample.shape()) {
            *max = (*max).max(n);
        }
        match first_dtype {
            None => {
                first_dtype = Some(sample.dtype());
                channel_metadata = sample.metadata.clone();
            }
            Some(expected) if expected != sample.dtype() => {
                warn!(
                    path = %file.path.display(),
                    expected = %expected,
                    actual = %sample.dtype(),
                    "Sample data type differs from the first file"
                );
            }
            Some(_) => {}
        }
        dtype = sample.dtype();
        cache.insert(file.path.clone(), sample);
    }

    let time_points = group_by_time(files);
    let z_extent = z_extent(&time_points, options.z_policy);

    let plan = StackPlan {
        format,
        slice_shape,
        dtype,
        time_points,
        z_policy: options.z_policy,
        z_extent,
        channel_metadata,
    };
    debug!(
        files = plan.file_count(),
        shape = ?plan.target_shape(),
        dtype = %plan.dtype,
        z_policy = %plan.z_policy,
        cached = cache.len(),
        "Planned stack"
    );
    Ok(plan)
}

/// Either every file carries an index or none does, and (t, z) pairs are unique.
fn check_indexing(files: &[SourceFile]) -> Result<(), StackError> {
    let with_time = files.iter().filter(|f| f.time_index.is_some()).count();
    if with_time != 0 && with_time != files.len() {
        return Err(StackError::AmbiguousIndexing {
            reason: format!(
                "{} of {} files carry a time index",
                with_time,
                files.len()
            ),
        });
    }
    let with_z = files.iter().filter(|f| f.z_index.is_some()).count();
    if with_z != 0 && with_z != files.len() {
        return Err(StackError::AmbiguousIndexing {
            reason: format!("{} of {} files carry a z index", with_z, files.len()),
        });
    }

    if with_z > 0 {
        let mut seen = HashSet::new();
        for file in files {
            let key = (file.time_index.unwrap_or(0), file.z_index);
            if !seen.insert(key) {
                return Err(StackError::AmbiguousIndexing {
                    reason: format!(
                        "{} repeats time {} z {}",
                        file.path.display(),
                        key.0,
                        key.1.unwrap_or(0)
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Group files by time index; unindexed files form a single group.
fn group_by_time(files: Vec<SourceFile>) -> Vec<TimePoint> {
    let mut groups: BTreeMap<u32, Vec<SourceFile>> = BTreeMap::new();
    for file in files {
        groups
            .entry(file.time_index.unwrap_or(0))
            .or_default()
            .push(file);
    }

    let max_t = groups.keys().next_back().copied().unwrap_or(0) as usize;
    let mut time_points: Vec<TimePoint> = (0..=max_t)
        .map(|time| TimePoint {
            time,
            slices: Vec::new(),
        })
        .collect();
    for (t, slices) in groups {
        time_points[t as usize].slices = slices;
    }
    time_points
}

fn z_extent(time_points: &[TimePoint], policy: ZOffsetPolicy) -> usize {
    let largest_group = time_points
        .iter()
        .map(|tp| tp.slices.len())
        .max()
        .unwrap_or(0)
        .max(1);
    let parsed = time_points
        .iter()
        .flat_map(|tp| tp.slices.iter())
        .filter_map(|f| f.z_index)
        .max()
        .map(|z| z as usize + 1);

    match (policy, parsed) {
        (ZOffsetPolicy::ParsedIndex, Some(extent)) => extent,
        (ZOffsetPolicy::ParsedIndex, None) => largest_group,
        (ZOffsetPolicy::GroupPosition, parsed) => parsed.unwrap_or(0).max(largest_group),
    }
}
