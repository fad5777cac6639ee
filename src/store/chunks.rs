//! Chunk geometry for the stack store.
//!
//! Starts from the zarr auto-chunking heuristic: the target chunk size grows
//! with the dataset (256 KiB per decade of megabytes, doubling), bounded to
//! [128 KiB, 64 MiB], and axes are halved round-robin until a chunk is close
//! enough to the target. The micro-time axis is then widened back to its full
//! length so a decay curve is always read from a single chunk.

use crate::array::DType;

const CHUNK_BASE: f64 = 256.0 * 1024.0;
const CHUNK_MIN: f64 = 128.0 * 1024.0;
const CHUNK_MAX: f64 = 64.0 * 1024.0 * 1024.0;

/// Index of the micro-time axis in a stack shape.
pub const MICRO_TIME_AXIS: usize = 1;

/// Guess a chunk shape for an array of `shape` with `typesize`-byte elements.
pub fn guess_chunks(shape: &[usize], typesize: usize) -> Vec<usize> {
    let ndims = shape.len();
    let mut chunks: Vec<f64> = shape.iter().map(|&s| s.max(1) as f64).collect();
    if ndims == 0 {
        return Vec::new();
    }
    let typesize = typesize as f64;

    let dataset_size = chunks.iter().product::<f64>() * typesize;
    let target = (CHUNK_BASE * 2f64.powf((dataset_size / (1024.0 * 1024.0)).log10()))
        .clamp(CHUNK_MIN, CHUNK_MAX);

    let mut idx = 0;
    loop {
        let elements = chunks.iter().product::<f64>();
        let chunk_bytes = elements * typesize;
        let near_target =
            chunk_bytes < target || (chunk_bytes - target).abs() / target < 0.5;
        if (near_target && chunk_bytes < CHUNK_MAX) || elements == 1.0 {
            break;
        }
        let axis = idx % ndims;
        chunks[axis] = (chunks[axis] / 2.0).ceil();
        idx += 1;
    }

    chunks.into_iter().map(|c| c as usize).collect()
}

/// Chunk shape of a (channel, bin, time, z, y, x) stack store.
pub fn store_chunks(shape: [usize; 6], dtype: DType) -> [usize; 6] {
    let guessed = guess_chunks(&shape, dtype.size_in_bytes());
    let mut chunks = [1usize; 6];
    chunks.copy_from_slice(&guessed);
    chunks[MICRO_TIME_AXIS] = shape[MICRO_TIME_AXIS].max(1);
    chunks
}
