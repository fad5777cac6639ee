//! Chunked on-disk stack storage (Zarr v3, via `zarrs`).
//!
//! - [`chunks`]: chunk geometry for stack arrays
//! - [`writer`]: filling a store from a [`crate::stack::StackPlan`] and
//!   reading it back

pub mod chunks;
pub mod writer;

pub use chunks::{guess_chunks, store_chunks};
pub use writer::{write_store, ChunkedStack, StackAttributes, ARRAY_DIMENSIONS};
