//! # flim-stack
//!
//! Assembles folders of fluorescence-lifetime (FLIM) acquisitions into a
//! single (channel, micro-time, time, z, y, x) stack.
//!
//! Acquisitions are recorded one file per time point and z slice, with the
//! indices encoded in the file name (`cells_t3_z12.ptu`). Files of one folder
//! may differ in bin count or scan size, so the stack shape is only known
//! after every file has been decoded. Assembly is therefore split in two
//! phases: planning, then filling either an in-memory array or a chunked
//! Zarr store on disk.
//!
//! ## Features
//!
//! - **Native decoders**: PicoQuant PTU (T3), Becker & Hickl SDT, plain TIFF
//! - **Filename indexing**: `_t<n>` / `_z<n>` markers with natural ordering
//! - **Out-of-core output**: uncompressed Zarr v3 stores with the micro-time
//!   axis kept in a single chunk
//! - **Sample cache**: decoded samples reused between the two phases
//!
//! ## Architecture
//!
//! - [`io`] - byte sources and endian-aware cursors
//! - [`mod@format`] - extension detection and per-format decoders
//! - [`array`] - typed sample and stack arrays
//! - [`stack`] - filename indices, planning, in-memory assembly
//! - [`store`] - chunk geometry and the `zarrs`-backed stack store
//! - [`pipeline`] - `convert_folder`, `load_stack`, notifications
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use flim_stack::pipeline::{convert_folder, ConvertOptions, TracingSink};
//!
//! let stack = convert_folder(Path::new("/data/run1"), &ConvertOptions::default(), &TracingSink)
//!     .expect("conversion failed");
//! println!("{:?} written to {}", stack.shape(), stack.path().display());
//! ```

pub mod array;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod stack;
pub mod store;

// Re-export commonly used types
pub use array::{DType, Element, SliceArray, StackArray};
pub use config::{Cli, Command, ConvertConfig, InspectConfig};
pub use error::{DecodeError, IoError, StackError, StoreError, TiffError};
pub use format::{ChannelMetadata, FlimFormat, InputKind, SliceSample};
pub use pipeline::{
    convert_folder, default_output_path, inspect, load_stack, ConvertOptions, Inspection,
    LoadOptions, LoadedStack, NotificationLevel, NotificationSink, TracingSink,
};
pub use stack::{plan, PlanOptions, SampleCache, StackPlan, StackTarget, ZOffsetPolicy};
pub use store::{write_store, ChunkedStack};
