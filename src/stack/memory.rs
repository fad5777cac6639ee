//! In-memory stack assembly.

use tracing::{debug, info};

use crate::array::{InsertError, StackArray};
use crate::error::StackError;

use super::cache::SampleCache;
use super::planner::StackPlan;

/// Build the whole stack of `plan` in memory.
///
/// Each slice is written to `[:c, :b, t, z, :h, :w]` of a zero-filled stack,
/// clipped to the slice's own shape.
pub fn assemble(plan: &StackPlan, cache: &mut SampleCache) -> Result<StackArray, StackError> {
    let shape = plan.target_shape();
    info!(shape = ?shape, dtype = %plan.dtype, "Assembling stack in memory");

    let mut stack = StackArray::zeros(shape, plan.dtype);
    for (time, z, file) in plan.placements() {
        let sample = cache.take_or_read(plan.format, &file.path)?;
        stack
            .insert_slice(time, z, &sample.data)
            .map_err(|err| match err {
                InsertError::Dtype { stack, slice } => StackError::DtypeMismatch {
                    path: file.path.clone(),
                    expected: stack.name(),
                    actual: slice.name(),
                },
                InsertError::OutOfBounds => StackError::SliceExceedsPlan {
                    path: file.path.clone(),
                    actual: sample.shape(),
                    planned: plan.slice_shape,
                },
            })?;
        debug!(path = %file.path.display(), time, z, "Placed slice");
    }
    Ok(stack)
}
