//! Readers for FLIM acquisition files.
//!
//! The format of a folder is resolved once from its dominant extension (see
//! [`detect::detect_input`]); every file is then decoded with
//! [`FlimFormat::read`] into a [`SliceSample`] with axes
//! (channel, micro-time bin, y, x).
//!
//! - **PTU**: PicoQuant T3 records histogrammed on the scan grid
//! - **SDT**: Becker & Hickl decay blocks, one per channel
//! - **TIFF**: uncompressed multi-page stacks

pub mod detect;
pub mod ptu;
pub mod reader;
pub mod sdt;
pub mod tiff;

pub use detect::{
    detect_input, most_frequent_extension, resolve_extension, FlimFormat, InputKind,
    STORE_EXTENSION, SUPPORTED_EXTENSIONS,
};
pub use ptu::{PtuMetadata, PtuTagValue};
pub use reader::{ChannelMetadata, SliceSample};
pub use sdt::{SdtMeasureInfo, SdtStopInfo};
