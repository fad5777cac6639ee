//! Tests of the on-disk stack store.
//!
//! Tests verify:
//! - `zarr.json` metadata and attributes of a converted stack
//! - Chunking splits large stacks but never the micro-time axis
//! - Region reads across chunk boundaries
//! - The sample cache does not change what is written

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use flim_stack::error::StoreError;
use flim_stack::pipeline::{convert_folder, ConvertOptions, TracingSink};
use flim_stack::{ChunkedStack, DType, StackArray};

use super::test_utils::{folder_with, snapshot, tiff_filled, tiff_u16};

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// Pixel value of the large folder below.
fn decay_value(t: usize, bin: usize, y: usize, x: usize) -> u16 {
    (bin * 7 + y * 3 + x + 1000 * t) as u16
}

/// Two time points of (1, 32, 128, 128) u16 samples: 2 MiB of stack.
fn large_folder() -> (tempfile::TempDir, PathBuf) {
    folder_with(
        "large",
        &[
            ("decay_t0.tif", tiff_u16([1, 32, 128, 128], |_, b, y, x| decay_value(0, b, y, x))),
            ("decay_t1.tif", tiff_u16([1, 32, 128, 128], |_, b, y, x| decay_value(1, b, y, x))),
        ],
    )
}

fn chunk_files(store: &Path) -> Vec<String> {
    snapshot(store)
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| name.starts_with("c/"))
        .collect()
}

// =============================================================================
// Metadata Tests
// =============================================================================

#[test]
fn test_array_metadata_file() {
    let (_root, folder) = folder_with(
        "meta",
        &[
            ("m_t0_z0.tif", tiff_filled([2, 3, 4, 5], 1)),
            ("m_t0_z1.tif", tiff_filled([2, 3, 4, 5], 2)),
        ],
    );
    let stack = convert_folder(&folder, &ConvertOptions::default(), &TracingSink).unwrap();

    let meta = read_json(&stack.path().join("zarr.json"));
    assert_eq!(meta["zarr_format"], json!(3));
    assert_eq!(meta["node_type"], json!("array"));
    assert_eq!(meta["shape"], json!([2, 3, 1, 2, 4, 5]));
    assert_eq!(meta["data_type"], json!("uint16"));
    assert_eq!(meta["fill_value"], json!(0));
    assert_eq!(
        meta["dimension_names"],
        json!(["channel", "micro_time", "time", "z", "y", "x"])
    );
    assert_eq!(
        meta["chunk_grid"]["configuration"]["chunk_shape"]
            .as_array()
            .unwrap()
            .len(),
        6
    );

    // Uncompressed: the only codec serializes elements to bytes
    let codecs = meta["codecs"].as_array().unwrap();
    assert_eq!(codecs.len(), 1);
    assert_eq!(codecs[0]["name"], json!("bytes"));
}

#[test]
fn test_attributes_file() {
    let (_root, folder) = folder_with(
        "attrs",
        &[
            ("a_t0.tif", tiff_filled([2, 1, 1, 1], 1)),
            ("a_t1.tif", tiff_filled([2, 1, 1, 1], 1)),
        ],
    );
    let stack = convert_folder(&folder, &ConvertOptions::default(), &TracingSink).unwrap();

    let zattrs = read_json(&stack.path().join("zarr.json"))["attributes"].clone();
    assert_eq!(
        zattrs["_ARRAY_DIMENSIONS"],
        json!(["channel", "micro_time", "time", "z", "y", "x"])
    );
    assert_eq!(zattrs["format"], json!("tiff"));
    assert_eq!(zattrs["z_offset_policy"], json!("group-position"));
    assert_eq!(
        zattrs["channel_metadata"],
        json!([{"file_type": "tif"}, {"file_type": "tif"}])
    );
}

#[test]
fn test_reopened_store_matches_written() {
    let (_root, folder) = folder_with(
        "reopen",
        &[
            ("r_z0.tif", tiff_filled([1, 2, 3, 3], 11)),
            ("r_z1.tif", tiff_filled([1, 2, 3, 3], 22)),
        ],
    );
    let written = convert_folder(&folder, &ConvertOptions::default(), &TracingSink).unwrap();
    let opened = ChunkedStack::open(written.path()).unwrap();

    assert_eq!(opened.shape(), written.shape());
    assert_eq!(opened.chunks(), written.chunks());
    assert_eq!(opened.attributes(), written.attributes());
    assert_eq!(
        opened.read_all::<u16>().unwrap(),
        written.read_all::<u16>().unwrap()
    );

    match opened.to_stack_array().unwrap() {
        StackArray::U16(data) => assert_eq!(data[[0, 1, 0, 1, 2, 2]], 22),
        other => panic!("unexpected element type: {:?}", other.dtype()),
    }
}

#[test]
fn test_open_rejects_non_store() {
    let (_root, folder) = folder_with("plain", &[("a.tif", tiff_filled([1, 1, 1, 1], 1))]);
    let err = ChunkedStack::open(&folder).unwrap_err();
    assert!(matches!(err, StoreError::Zarr { .. }));

    let err = ChunkedStack::open(&folder.join("missing.zarr")).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
}

#[test]
fn test_read_with_wrong_type_fails() {
    let (_root, folder) = folder_with("typed", &[("t_t0.tif", tiff_filled([1, 1, 2, 2], 3))]);
    let stack = convert_folder(&folder, &ConvertOptions::default(), &TracingSink).unwrap();

    let err = stack.read_all::<f32>().unwrap_err();
    assert!(matches!(err, StoreError::DtypeMismatch { .. }));
}

// =============================================================================
// Chunking Tests
// =============================================================================

#[test]
fn test_micro_time_axis_is_never_split() {
    let (_root, folder) = large_folder();
    let stack = convert_folder(&folder, &ConvertOptions::default(), &TracingSink).unwrap();

    let shape = stack.shape();
    let chunks = stack.chunks();
    assert_eq!(shape, [1, 32, 2, 1, 128, 128]);
    assert_eq!(chunks[1], 32);

    // The stack is large enough to span more than one chunk
    let grid: usize = shape
        .iter()
        .zip(chunks.iter())
        .map(|(s, c)| (s + c - 1) / c)
        .product();
    assert!(grid > 1);

    // Every chunk was written, each full-size
    let chunk_bytes = chunks.iter().product::<usize>() * DType::U16.size_in_bytes();
    let files = snapshot(stack.path());
    let chunks_on_disk: Vec<_> = files.iter().filter(|(n, _)| n.starts_with("c/")).collect();
    assert_eq!(chunks_on_disk.len(), grid);
    assert!(chunks_on_disk.iter().all(|(_, data)| data.len() == chunk_bytes));
    assert!(chunk_files(stack.path()).contains(&"c/0/0/0/0/0/0".to_string()));
}

#[test]
fn test_region_read_across_chunks() {
    let (_root, folder) = large_folder();
    let stack = convert_folder(&folder, &ConvertOptions::default(), &TracingSink).unwrap();

    let offset = [0, 5, 0, 0, 60, 60];
    let region = stack.read_region::<u16>(offset, [1, 3, 2, 1, 10, 10]).unwrap();
    assert_eq!(region.shape(), &[1, 3, 2, 1, 10, 10]);
    for t in 0..2 {
        for b in 0..3 {
            for y in 0..10 {
                for x in 0..10 {
                    assert_eq!(
                        region[[0, b, t, 0, y, x]],
                        decay_value(t, b + 5, y + 60, x + 60)
                    );
                }
            }
        }
    }

    let err = stack
        .read_region::<u16>([0, 0, 0, 0, 120, 0], [1, 1, 1, 1, 10, 1])
        .unwrap_err();
    assert!(matches!(err, StoreError::RegionOutOfBounds { .. }));
}

// =============================================================================
// Sample Cache Tests
// =============================================================================

#[test]
fn test_cache_budget_does_not_change_output() {
    let (root, folder) = large_folder();

    let mut outputs = Vec::new();
    // Disabled, smaller than one sample, and the default budget
    for (name, cache_bytes) in [("none", 0), ("tiny", 1024), ("default", 256 * 1024 * 1024)] {
        let options = ConvertOptions {
            output: Some(root.path().join(format!("{}.zarr", name))),
            cache_bytes,
            ..ConvertOptions::default()
        };
        let stack = convert_folder(&folder, &options, &TracingSink).unwrap();
        outputs.push(snapshot(stack.path()));
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
}

#[test]
fn test_reconversion_replaces_store() {
    let (root, folder) = folder_with(
        "replace",
        &[
            ("x_t0.tif", tiff_filled([1, 1, 2, 2], 1)),
            ("x_t1.tif", tiff_filled([1, 1, 2, 2], 2)),
        ],
    );
    let output = root.path().join("out.zarr");
    let options = ConvertOptions {
        output: Some(output.clone()),
        ..ConvertOptions::default()
    };
    convert_folder(&folder, &options, &TracingSink).unwrap();

    // A stray chunk from an older, larger stack must not survive
    let stale = output.join("c/9/9/9/9/9/9");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, b"stale").unwrap();
    std::fs::remove_file(folder.join("x_t1.tif")).unwrap();

    let stack = convert_folder(&folder, &options, &TracingSink).unwrap();
    assert_eq!(stack.shape(), [1, 1, 1, 1, 2, 2]);
    assert!(!stale.exists());
}
