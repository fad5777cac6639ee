//! Decoding of uncompressed multi-page TIFF files into FLIM samples.
//!
//! Every page is one (y, x) plane. How pages map onto the (channel,
//! micro-time bin) axes is read from the first page's description:
//!
//! - tifffile JSON (`{"shape": [c, b, y, x]}` or `{"shape": [b, y, x]}`):
//!   pages are stored channel-major, `page = c * bins + bin`;
//! - ImageJ hyperstack (`ImageJ=...\nchannels=C`): channels vary fastest,
//!   `page = bin * C + c`;
//! - anything else: one channel, one page per bin.

use ndarray::Array4;
use serde::Deserialize;
use tracing::debug;

use crate::array::{DType, Element, SliceArray};
use crate::error::TiffError;
use crate::io::{ByteOrder, RangeReader};

use super::parser::{Ifd, TiffHeader};
use super::tags::{SampleFormat, TiffTag, COMPRESSION_NONE};
use super::values::ValueReader;

// =============================================================================
// Page Layout
// =============================================================================

/// Geometry and strip locations of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub width: usize,
    pub height: usize,
    pub dtype: DType,
    pub strip_offsets: Vec<u64>,
    pub strip_byte_counts: Vec<u64>,
}

impl PageInfo {
    /// Read the tags that describe one page and reject layouts that cannot
    /// be decoded.
    pub fn from_ifd<R: RangeReader>(ifd: &Ifd, values: &ValueReader<'_, R>) -> Result<Self, TiffError> {
        let required = |tag: TiffTag| -> Result<u64, TiffError> {
            let entry = ifd
                .get_entry_by_tag(tag)
                .ok_or(TiffError::MissingTag(tag.name()))?;
            values.read_u64(entry, tag)
        };
        let optional = |tag: TiffTag, default: u64| -> Result<u64, TiffError> {
            match ifd.get_entry_by_tag(tag) {
                Some(entry) => values.read_u64(entry, tag),
                None => Ok(default),
            }
        };

        if ifd.get_entry_by_tag(TiffTag::TileOffsets).is_some() {
            return Err(TiffError::TiledOrganization);
        }

        let compression = optional(TiffTag::Compression, COMPRESSION_NONE)?;
        if compression != COMPRESSION_NONE {
            return Err(TiffError::UnsupportedCompression(format!(
                "compression scheme {}",
                compression
            )));
        }

        let width = required(TiffTag::ImageWidth)? as usize;
        let height = required(TiffTag::ImageLength)? as usize;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::ImageWidth.name(),
                message: format!("empty page {}x{}", width, height),
            });
        }
        let bits = optional(TiffTag::BitsPerSample, 1)? as u16;
        let samples = optional(TiffTag::SamplesPerPixel, 1)? as u16;
        let format = optional(TiffTag::SampleFormat, 1)? as u16;

        let dtype = match (samples, SampleFormat::from_u16(format), bits) {
            (1, Some(SampleFormat::Unsigned), 8) => DType::U8,
            (1, Some(SampleFormat::Unsigned), 16) => DType::U16,
            (1, Some(SampleFormat::Unsigned), 32) => DType::U32,
            (1, Some(SampleFormat::Float), 32) => DType::F32,
            _ => {
                return Err(TiffError::UnsupportedSampleFormat {
                    bits,
                    format,
                    samples,
                })
            }
        };

        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::StripOffsets)
            .ok_or(TiffError::MissingTag(TiffTag::StripOffsets.name()))?;
        let counts_entry = ifd
            .get_entry_by_tag(TiffTag::StripByteCounts)
            .ok_or(TiffError::MissingTag(TiffTag::StripByteCounts.name()))?;
        let strip_offsets = values.read_u64_array(offsets_entry, TiffTag::StripOffsets)?;
        let strip_byte_counts = values.read_u64_array(counts_entry, TiffTag::StripByteCounts)?;
        if strip_offsets.len() != strip_byte_counts.len() {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::StripByteCounts.name(),
                message: format!(
                    "{} strip offsets but {} byte counts",
                    strip_offsets.len(),
                    strip_byte_counts.len()
                ),
            });
        }

        Ok(PageInfo {
            width,
            height,
            dtype,
            strip_offsets,
            strip_byte_counts,
        })
    }

    /// Bytes in one plane; fails when the dimensions overflow.
    fn plane_bytes(&self) -> Result<usize, TiffError> {
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.dtype.size_in_bytes()))
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: TiffTag::ImageWidth.name(),
                message: format!("{}x{} {} plane is too large", self.width, self.height, self.dtype),
            })
    }

    /// Concatenate the strips of this page, keeping exactly one plane.
    fn read_plane<R: RangeReader>(&self, reader: &R, page: usize) -> Result<Vec<u8>, TiffError> {
        let expected = self.plane_bytes()?;
        if expected as u64 > reader.size() {
            return Err(TiffError::InconsistentPages {
                page,
                message: format!("plane needs {} bytes, file holds {}", expected, reader.size()),
            });
        }
        let mut plane = Vec::with_capacity(expected);
        for (&offset, &count) in self.strip_offsets.iter().zip(&self.strip_byte_counts) {
            if plane.len() >= expected {
                break;
            }
            let bytes = reader.read_exact_at(offset, count as usize)?;
            plane.extend_from_slice(&bytes);
        }
        if plane.len() < expected {
            return Err(TiffError::InconsistentPages {
                page,
                message: format!("strips hold {} bytes, plane needs {}", plane.len(), expected),
            });
        }
        plane.truncate(expected);
        Ok(plane)
    }
}

// =============================================================================
// Axis Interpretation
// =============================================================================

/// How consecutive pages are laid out over (channel, bin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrder {
    /// `page = c * bins + bin`
    ChannelMajor { channels: usize, bins: usize },
    /// `page = bin * channels + c`
    ChannelInterleaved { channels: usize, bins: usize },
}

impl PageOrder {
    pub fn channels(self) -> usize {
        match self {
            PageOrder::ChannelMajor { channels, .. }
            | PageOrder::ChannelInterleaved { channels, .. } => channels,
        }
    }

    pub fn bins(self) -> usize {
        match self {
            PageOrder::ChannelMajor { bins, .. } | PageOrder::ChannelInterleaved { bins, .. } => {
                bins
            }
        }
    }

    /// Pick the layout from the first page's description.
    pub fn from_description(
        description: Option<&str>,
        pages: usize,
        height: usize,
        width: usize,
    ) -> Self {
        let fallback = PageOrder::ChannelMajor {
            channels: 1,
            bins: pages,
        };
        let Some(text) = description else {
            return fallback;
        };

        if let Some(order) = json_shape_order(text, pages, height, width) {
            return order;
        }
        if let Some(channels) = imagej_channels(text) {
            if channels > 0 && pages % channels == 0 {
                return PageOrder::ChannelInterleaved {
                    channels,
                    bins: pages / channels,
                };
            }
        }
        fallback
    }
}

#[derive(Deserialize)]
struct ShapeDescription {
    shape: Vec<usize>,
}

fn json_shape_order(text: &str, pages: usize, height: usize, width: usize) -> Option<PageOrder> {
    let description: ShapeDescription = serde_json::from_str(text.trim()).ok()?;
    let shape = description.shape;
    let (leading, plane) = shape.split_at(shape.len().checked_sub(2)?);
    if plane != [height, width] || leading.iter().product::<usize>() != pages {
        return None;
    }
    match *leading {
        [channels, bins] => Some(PageOrder::ChannelMajor { channels, bins }),
        [bins] => Some(PageOrder::ChannelMajor { channels: 1, bins }),
        [] => Some(PageOrder::ChannelMajor {
            channels: 1,
            bins: 1,
        }),
        _ => None,
    }
}

fn imagej_channels(text: &str) -> Option<usize> {
    if !text.starts_with("ImageJ=") {
        return None;
    }
    text.lines()
        .find_map(|line| line.strip_prefix("channels="))
        .and_then(|value| value.trim().parse().ok())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode all pages of a TIFF file into a (channel, bin, y, x) sample.
pub fn read_pages<R: RangeReader>(reader: &R) -> Result<SliceArray, TiffError> {
    let header = TiffHeader::read(reader)?;
    let ifds = Ifd::read_chain(reader, &header)?;
    let values = ValueReader::new(reader, &header);

    let first_ifd = ifds.first().ok_or(TiffError::NoPages)?;
    let first = PageInfo::from_ifd(first_ifd, &values)?;
    let description = match first_ifd.get_entry_by_tag(TiffTag::ImageDescription) {
        Some(entry) => Some(values.read_string(entry, TiffTag::ImageDescription)?),
        None => None,
    };

    // Never reserve more than the file could hold
    let total = first.plane_bytes()?.saturating_mul(ifds.len());
    let mut planes = Vec::with_capacity(total.min(usize::try_from(reader.size()).unwrap_or(usize::MAX)));
    for (page, ifd) in ifds.iter().enumerate() {
        let info = if page == 0 {
            first.clone()
        } else {
            PageInfo::from_ifd(ifd, &values)?
        };
        if (info.width, info.height, info.dtype) != (first.width, first.height, first.dtype) {
            return Err(TiffError::InconsistentPages {
                page,
                message: format!(
                    "{}x{} {} vs {}x{} {}",
                    info.width, info.height, info.dtype, first.width, first.height, first.dtype
                ),
            });
        }
        planes.extend(info.read_plane(reader, page)?);
    }

    let order = PageOrder::from_description(
        description.as_deref(),
        ifds.len(),
        first.height,
        first.width,
    );
    debug!(
        source = reader.identifier(),
        pages = ifds.len(),
        ?order,
        dtype = %first.dtype,
        "Decoded TIFF pages"
    );

    let byte_order = header.byte_order;
    let (h, w) = (first.height, first.width);
    Ok(match first.dtype {
        DType::U8 => assemble::<u8>(&planes, byte_order, order, h, w),
        DType::U16 => assemble::<u16>(&planes, byte_order, order, h, w),
        DType::U32 => assemble::<u32>(&planes, byte_order, order, h, w),
        DType::F32 => assemble::<f32>(&planes, byte_order, order, h, w),
    })
}

fn assemble<T: Element>(
    planes: &[u8],
    byte_order: ByteOrder,
    order: PageOrder,
    height: usize,
    width: usize,
) -> SliceArray {
    let size = T::DTYPE.size_in_bytes();
    let (channels, bins) = (order.channels(), order.bins());
    let page_len = height * width;

    let mut out = Array4::<T>::from_elem((channels, bins, height, width), T::default());
    for (page, plane) in planes.chunks_exact(page_len * size).enumerate() {
        let (c, bin) = match order {
            PageOrder::ChannelMajor { bins, .. } => (page / bins, page % bins),
            PageOrder::ChannelInterleaved { channels, .. } => (page % channels, page / channels),
        };
        let mut target = out.slice_mut(ndarray::s![c, bin, .., ..]);
        for (dst, src) in target.iter_mut().zip(plane.chunks_exact(size)) {
            *dst = T::from_bytes(src, byte_order);
        }
    }
    T::wrap_slice(out)
}
