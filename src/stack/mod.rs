//! Stack planning and in-memory assembly.
//!
//! Assembly is two explicit phases:
//!
//! 1. [`plan`] scans a folder, decodes each file once to learn its shape,
//!    and lays the files out along the time and z axes.
//! 2. [`assemble`] (in memory) or [`crate::store::write_store`] (chunked on
//!    disk) fills the planned stack slice by slice.
//!
//! [`SampleCache`] carries decoded samples from the first phase to the second.

pub mod cache;
pub mod index;
pub mod memory;
pub mod natural;
pub mod planner;
pub mod size;

pub use cache::{SampleCache, DEFAULT_SAMPLE_CACHE_BYTES};
pub use index::parse_indices;
pub use memory::assemble;
pub use natural::{natural_cmp, sort_paths_naturally};
pub use planner::{
    list_matching_files, plan, plan_files, PlanOptions, SourceFile, StackPlan, TimePoint,
    ZOffsetPolicy,
};
pub use size::{estimate_megabytes, megabytes_from_sizes, StackTarget, STORE_THRESHOLD_MB};
