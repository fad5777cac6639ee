//! PicoQuant unified TTTR (`.ptu`) decoding.
//!
//! A PTU file is a tagged header terminated by `Header_End`, followed by
//! 32-bit T3 records. Each record is either a photon (channel, arrival time
//! within the laser period, sync count) or a special record carrying an
//! overflow or a marker. Markers delimit scan lines and frames, which lets
//! photons be placed on the pixel grid and histogrammed per pixel.
//!
//! # Header tag layout
//! ```text
//! ident   [u8; 32]  NUL-padded tag name
//! index   i32       -1 for scalar tags
//! type    u32       tag type code
//! value   [u8; 8]   value, or byte length for strings and blobs
//! ```

use std::collections::BTreeMap;

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::array::SliceArray;
use crate::error::DecodeError;
use crate::io::{ByteCursor, ByteOrder};

use super::reader::{ChannelMetadata, SliceSample};

const FORMAT: &str = "PTU";

const MAGIC: &[u8] = b"PQTTTR";

const HEADER_END: &str = "Header_End";

/// Largest micro-time histogram a sync period may ask for.
const MAX_PERIOD_BINS: f64 = (1u32 << 20) as f64;

/// Largest histogram (channels x bins x pixels) one file may decode to.
const MAX_HISTOGRAM_ELEMENTS: u64 = 1 << 32;

// =============================================================================
// Tag Types
// =============================================================================

const TY_EMPTY8: u32 = 0xFFFF_0008;
const TY_BOOL8: u32 = 0x0000_0008;
const TY_INT8: u32 = 0x1000_0008;
const TY_BITSET64: u32 = 0x1100_0008;
const TY_COLOR8: u32 = 0x1200_0008;
const TY_FLOAT8: u32 = 0x2000_0008;
const TY_TDATETIME: u32 = 0x2100_0008;
const TY_FLOAT8_ARRAY: u32 = 0x2001_FFFF;
const TY_ANSI_STRING: u32 = 0x4001_FFFF;
const TY_WIDE_STRING: u32 = 0x4002_FFFF;
const TY_BINARY_BLOB: u32 = 0xFFFF_FFFF;

// =============================================================================
// Record Types
// =============================================================================

const RT_PICOHARP_T3: u32 = 0x0001_0303;
const RT_HYDRAHARP_T3: u32 = 0x0001_0304;
const RT_HYDRAHARP2_T3: u32 = 0x0101_0304;
const RT_TIMEHARP260N_T3: u32 = 0x0001_0305;
const RT_TIMEHARP260P_T3: u32 = 0x0001_0306;
const RT_MULTIHARP_T3: u32 = 0x0001_0307;

// =============================================================================
// Header Tags
// =============================================================================

const TAG_RECORD_TYPE: &str = "TTResultFormat_TTTRRecType";
const TAG_NUM_RECORDS: &str = "TTResult_NumberOfRecords";
const TAG_RESOLUTION: &str = "MeasDesc_Resolution";
const TAG_GLOBAL_RESOLUTION: &str = "MeasDesc_GlobalResolution";
const TAG_SYNC_RATE: &str = "TTResult_SyncRate";
const TAG_PIX_X: &str = "ImgHdr_PixX";
const TAG_PIX_Y: &str = "ImgHdr_PixY";
const TAG_LINE_START: &str = "ImgHdr_LineStart";
const TAG_LINE_STOP: &str = "ImgHdr_LineStop";
const TAG_FRAME: &str = "ImgHdr_Frame";

/// A scalar header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PtuTagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PtuTagValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            PtuTagValue::Int(v) => Some(*v),
            PtuTagValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            PtuTagValue::Float(v) => Some(*v),
            PtuTagValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Acquisition metadata of one PTU file, attached to each of its channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PtuMetadata {
    pub version: String,
    pub record_type: u32,
    pub number_of_records: u64,
    /// Laser sync rate in Hz
    pub sync_rate: Option<f64>,
    /// Micro-time bin width in seconds
    pub resolution: Option<f64>,
    /// Sync period in seconds
    pub global_resolution: Option<f64>,
    pub pixels_x: usize,
    pub pixels_y: usize,
    /// Frame markers seen; photons of all frames are summed
    pub frames: usize,
    /// Every scalar header tag by name (`Name(index)` for indexed tags)
    pub tags: BTreeMap<String, PtuTagValue>,
}

// =============================================================================
// Header
// =============================================================================

#[derive(Debug)]
struct PtuHeader {
    version: String,
    tags: BTreeMap<String, PtuTagValue>,
}

impl PtuHeader {
    fn parse(cursor: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        let magic = cursor.take(8)?;
        if !magic.starts_with(MAGIC) {
            return Err(DecodeError::InvalidMagic { format: FORMAT });
        }
        let version = fixed_string(cursor.take(8)?);

        let mut tags = BTreeMap::new();
        loop {
            let ident = fixed_string(cursor.take(32)?);
            let index = cursor.read_i32()?;
            let kind = cursor.read_u32()?;
            let raw = cursor.read_i64()?;

            let value = match kind {
                TY_EMPTY8 => None,
                TY_BOOL8 => Some(PtuTagValue::Bool(raw != 0)),
                TY_INT8 | TY_BITSET64 | TY_COLOR8 => Some(PtuTagValue::Int(raw)),
                TY_FLOAT8 | TY_TDATETIME => Some(PtuTagValue::Float(f64::from_bits(raw as u64))),
                TY_ANSI_STRING => {
                    let bytes = cursor.take(blob_len(raw)?)?;
                    Some(PtuTagValue::Text(latin1_string(bytes)))
                }
                TY_WIDE_STRING => {
                    let bytes = cursor.take(blob_len(raw)?)?;
                    Some(PtuTagValue::Text(utf16_string(bytes)))
                }
                TY_FLOAT8_ARRAY | TY_BINARY_BLOB => {
                    cursor.skip(blob_len(raw)?)?;
                    None
                }
                other => {
                    return Err(DecodeError::InvalidHeader {
                        format: FORMAT,
                        message: format!("unknown tag type 0x{:08X} for {}", other, ident),
                    })
                }
            };

            if ident == HEADER_END {
                break;
            }
            if let Some(value) = value {
                let name = if index > -1 {
                    format!("{}({})", ident, index)
                } else {
                    ident
                };
                tags.insert(name, value);
            }
        }

        Ok(PtuHeader { version, tags })
    }

    fn int(&self, name: &'static str) -> Result<i64, DecodeError> {
        self.tags
            .get(name)
            .and_then(PtuTagValue::as_i64)
            .ok_or(DecodeError::MissingHeaderTag {
                format: FORMAT,
                tag: name,
            })
    }

    fn float(&self, name: &str) -> Option<f64> {
        self.tags.get(name).and_then(PtuTagValue::as_f64)
    }
}

fn blob_len(raw: i64) -> Result<usize, DecodeError> {
    usize::try_from(raw).map_err(|_| DecodeError::InvalidHeader {
        format: FORMAT,
        message: format!("negative value length {}", raw),
    })
}

fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn latin1_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

fn utf16_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

// =============================================================================
// T3 Records
// =============================================================================

/// Bit layout family of a T3 record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum T3Layout {
    /// 16-bit nsync, 12-bit dtime, 4-bit channel
    PicoHarp,
    /// 10-bit nsync, 15-bit dtime, 6-bit channel, special bit; fixed overflow
    HydraHarpV1,
    /// As V1, but overflow records carry an overflow count
    HydraHarpV2,
}

impl T3Layout {
    fn from_record_type(record_type: u32) -> Result<Self, DecodeError> {
        match record_type {
            RT_PICOHARP_T3 => Ok(T3Layout::PicoHarp),
            RT_HYDRAHARP_T3 => Ok(T3Layout::HydraHarpV1),
            RT_HYDRAHARP2_T3 | RT_TIMEHARP260N_T3 | RT_TIMEHARP260P_T3 | RT_MULTIHARP_T3 => {
                Ok(T3Layout::HydraHarpV2)
            }
            other => Err(DecodeError::UnsupportedRecordType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum T3Event {
    /// `channel` is zero-based
    Photon { channel: usize, dtime: u32, sync: u64 },
    Marker { bits: u32, sync: u64 },
}

/// Stateful record decoder; tracks the accumulated sync overflow.
struct T3Decoder {
    layout: T3Layout,
    overflow: u64,
}

impl T3Decoder {
    const PICOHARP_WRAP: u64 = 65_536;
    const HYDRAHARP_WRAP: u64 = 1_024;

    fn new(layout: T3Layout) -> Self {
        Self {
            layout,
            overflow: 0,
        }
    }

    fn decode(&mut self, record: u32) -> Option<T3Event> {
        match self.layout {
            T3Layout::PicoHarp => {
                let nsync = u64::from(record & 0xFFFF);
                let dtime = (record >> 16) & 0xFFF;
                let channel = (record >> 28) & 0xF;
                if channel == 0xF {
                    if dtime == 0 {
                        self.overflow += Self::PICOHARP_WRAP;
                        None
                    } else {
                        Some(T3Event::Marker {
                            bits: dtime & 0xF,
                            sync: self.overflow + nsync,
                        })
                    }
                } else if (1..=4).contains(&channel) {
                    Some(T3Event::Photon {
                        channel: channel as usize - 1,
                        dtime,
                        sync: self.overflow + nsync,
                    })
                } else {
                    None
                }
            }
            T3Layout::HydraHarpV1 | T3Layout::HydraHarpV2 => {
                let nsync = u64::from(record & 0x3FF);
                let dtime = (record >> 10) & 0x7FFF;
                let channel = (record >> 25) & 0x3F;
                let special = record >> 31 == 1;
                if !special {
                    return Some(T3Event::Photon {
                        channel: channel as usize,
                        dtime,
                        sync: self.overflow + nsync,
                    });
                }
                if channel == 0x3F {
                    self.overflow += if self.layout == T3Layout::HydraHarpV1 || nsync == 0 {
                        Self::HYDRAHARP_WRAP
                    } else {
                        Self::HYDRAHARP_WRAP * nsync
                    };
                    None
                } else if (1..=15).contains(&channel) {
                    Some(T3Event::Marker {
                        bits: channel,
                        sync: self.overflow + nsync,
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// Reject histogram shapes that overflow or exceed [`MAX_HISTOGRAM_ELEMENTS`].
fn check_histogram_size(shape: (usize, usize, usize, usize)) -> Result<(), DecodeError> {
    let (channels, bins, pixels_y, pixels_x) = shape;
    let elements = channels
        .checked_mul(bins)
        .and_then(|n| n.checked_mul(pixels_y))
        .and_then(|n| n.checked_mul(pixels_x));
    match elements {
        Some(n) if (n as u64) <= MAX_HISTOGRAM_ELEMENTS => Ok(()),
        _ => Err(DecodeError::InvalidHeader {
            format: FORMAT,
            message: format!(
                "histogram of {} channels, {} bins and {}x{} pixels is too large",
                channels, bins, pixels_x, pixels_y
            ),
        }),
    }
}

// =============================================================================
// Image Reconstruction
// =============================================================================

/// Marker masks and pixel grid taken from the `ImgHdr_*` tags.
#[derive(Debug, Clone, Copy)]
struct ScanGeometry {
    pixels_x: usize,
    pixels_y: usize,
    line_start: u32,
    line_stop: u32,
    frame: u32,
}

impl ScanGeometry {
    fn from_header(header: &PtuHeader) -> Result<Self, DecodeError> {
        let positive = |name: &'static str| -> Result<usize, DecodeError> {
            let value = header.int(name)?;
            usize::try_from(value)
                .ok()
                .filter(|&v| v > 0)
                .ok_or(DecodeError::InvalidHeader {
                    format: FORMAT,
                    message: format!("{} must be positive, got {}", name, value),
                })
        };
        let mask = |bit: i64| -> u32 {
            if (1..=32).contains(&bit) {
                1u32 << (bit - 1)
            } else {
                0
            }
        };

        let line_start = mask(header.int(TAG_LINE_START)?);
        let line_stop = mask(header.int(TAG_LINE_STOP)?);
        if line_start == 0 || line_stop == 0 {
            return Err(DecodeError::InvalidHeader {
                format: FORMAT,
                message: "line marker bits must be between 1 and 32".to_string(),
            });
        }

        Ok(ScanGeometry {
            pixels_x: positive(TAG_PIX_X)?,
            pixels_y: positive(TAG_PIX_Y)?,
            line_start,
            line_stop,
            frame: header.int(TAG_FRAME).map(mask).unwrap_or(0),
        })
    }
}

/// Place the photons of each scan line on the pixel grid.
///
/// Photons are buffered between a line-start and a line-stop marker because
/// the line duration is only known when the line ends.
struct LineScanner {
    geometry: ScanGeometry,
    line_origin: Option<u64>,
    line: usize,
    frames: usize,
    pending: Vec<(usize, u32, u64)>,
}

impl LineScanner {
    fn new(geometry: ScanGeometry) -> Self {
        Self {
            geometry,
            line_origin: None,
            line: 0,
            frames: 0,
            pending: Vec::new(),
        }
    }

    /// Feed one event; `emit(channel, dtime, y, x)` receives placed photons.
    fn feed(&mut self, event: T3Event, mut emit: impl FnMut(usize, u32, usize, usize)) {
        match event {
            T3Event::Photon {
                channel,
                dtime,
                sync,
            } => {
                if self.line_origin.is_some() {
                    self.pending.push((channel, dtime, sync));
                }
            }
            T3Event::Marker { bits, sync } => {
                let g = self.geometry;
                if g.frame != 0 && bits & g.frame != 0 {
                    self.frames += 1;
                    self.line = 0;
                    self.line_origin = None;
                    self.pending.clear();
                }
                if bits & g.line_start != 0 {
                    self.line_origin = Some(sync);
                    self.pending.clear();
                }
                if bits & g.line_stop != 0 {
                    if let Some(origin) = self.line_origin.take() {
                        let duration = sync.saturating_sub(origin);
                        if duration > 0 && self.line < g.pixels_y {
                            for &(channel, dtime, photon_sync) in &self.pending {
                                let offset = photon_sync.saturating_sub(origin);
                                let x = (offset as u128 * g.pixels_x as u128 / duration as u128)
                                    as usize;
                                if x < g.pixels_x {
                                    emit(channel, dtime, self.line, x);
                                }
                            }
                        }
                        self.line += 1;
                        self.pending.clear();
                    }
                }
            }
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a PTU file into `u32` photon counts with axes (channel, bin, y, x).
pub fn decode(data: &[u8]) -> Result<SliceSample, DecodeError> {
    let mut cursor = ByteCursor::new(data, ByteOrder::LittleEndian);
    let header = PtuHeader::parse(&mut cursor)?;

    let record_type = header.int(TAG_RECORD_TYPE)? as u32;
    let layout = T3Layout::from_record_type(record_type)?;
    let number_of_records = u64::try_from(header.int(TAG_NUM_RECORDS)?).map_err(|_| {
        DecodeError::InvalidHeader {
            format: FORMAT,
            message: "negative record count".to_string(),
        }
    })?;
    let geometry = ScanGeometry::from_header(&header)?;

    let record_len = usize::try_from(number_of_records)
        .ok()
        .and_then(|n| n.checked_mul(4))
        .ok_or(DecodeError::InvalidHeader {
            format: FORMAT,
            message: format!("record count {} is too large", number_of_records),
        })?;
    let record_bytes = cursor.take(record_len)?;
    let records = || {
        record_bytes
            .chunks_exact(4)
            .map(|r| u32::from_le_bytes([r[0], r[1], r[2], r[3]]))
    };

    // First pass sizes the histogram
    let mut decoder = T3Decoder::new(layout);
    let mut channels = 1usize;
    let mut max_dtime = 0u32;
    for record in records() {
        if let Some(T3Event::Photon { channel, dtime, .. }) = decoder.decode(record) {
            channels = channels.max(channel + 1);
            max_dtime = max_dtime.max(dtime);
        }
    }

    let sync_rate = header.float(TAG_SYNC_RATE);
    let resolution = header.float(TAG_RESOLUTION);
    let period_bins = match (sync_rate, resolution) {
        (Some(rate), Some(res)) if rate > 0.0 && res > 0.0 => {
            let period = (1.0 / rate / res).round();
            if !period.is_finite() || period > MAX_PERIOD_BINS {
                return Err(DecodeError::InvalidHeader {
                    format: FORMAT,
                    message: format!(
                        "sync period of {} bins at {} Hz and {} s resolution is too long",
                        period, rate, res
                    ),
                });
            }
            period as usize
        }
        _ => 0,
    };
    let bins = period_bins.max(max_dtime as usize + 1);

    let shape = (channels, bins, geometry.pixels_y, geometry.pixels_x);
    check_histogram_size(shape)?;
    let mut counts = Array4::<u32>::zeros(shape);
    let mut decoder = T3Decoder::new(layout);
    let mut scanner = LineScanner::new(geometry);
    for record in records() {
        if let Some(event) = decoder.decode(record) {
            scanner.feed(event, |c, dtime, y, x| {
                counts[[c, dtime as usize, y, x]] += 1;
            });
        }
    }

    debug!(
        record_type = format_args!("0x{:08X}", record_type),
        records = number_of_records,
        channels,
        bins,
        frames = scanner.frames,
        "Decoded PTU records"
    );

    let metadata = PtuMetadata {
        version: header.version.clone(),
        record_type,
        number_of_records,
        sync_rate,
        resolution,
        global_resolution: header.float(TAG_GLOBAL_RESOLUTION),
        pixels_x: geometry.pixels_x,
        pixels_y: geometry.pixels_y,
        frames: scanner.frames,
        tags: header.tags,
    };

    Ok(SliceSample::replicated(
        SliceArray::U32(counts),
        ChannelMetadata::Ptu(metadata),
    ))
}
