//! Plain multi-page TIFF reading.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header. All multi-byte values are read in that
//!   order.
//!
//! - **Classic TIFF vs BigTIFF**: Classic TIFF uses 32-bit offsets, BigTIFF
//!   64-bit ones. The parser handles both.
//!
//! - **IFD (Image File Directory)**: one per page, holding the page geometry
//!   and the offsets of its strips.
//!
//! - **Inline vs offset values**: small values are stored inline in the IFD
//!   entry, larger values at an offset pointed to by the entry.

mod pages;
mod parser;
mod tags;
mod values;

pub use pages::{read_pages, PageInfo, PageOrder};
pub use parser::{Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, MAX_PAGES, TIFF_HEADER_SIZE};
pub use tags::{FieldType, SampleFormat, TiffTag, COMPRESSION_NONE};
pub use values::ValueReader;
