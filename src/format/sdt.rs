//! Becker & Hickl (`.sdt`) decoding.
//!
//! # File layout
//! ```text
//! FILE_HEADER       42 bytes at offset 0, little-endian
//! MEASURE_INFO      one block per measurement description
//! BLOCK_HEADER      22 bytes, chained through `next_block_offs`
//!   data            `block_length` bytes of u16 decays
//! ```
//!
//! Each data block holds one channel with axes (scan_y, scan_x, adc_re).

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::array::SliceArray;
use crate::error::DecodeError;
use crate::io::{ByteCursor, ByteOrder};

use super::reader::{ChannelMetadata, SliceSample};

const FORMAT: &str = "SDT";

/// `header_valid` value of a consistent file
const HEADER_VALID: u16 = 0x5555;

/// `no_of_data_blocks` sentinel: the real count is in `reserved1`
const MANY_DATA_BLOCKS: u16 = 0x7FFF;

/// Block type flag for zip-compressed data
const DATA_ZIPPED: u16 = 0x1000;

/// Block type bits selecting the element type; 0 is u16
const DATA_TYPE_MASK: u16 = 0x0F00;

/// MEASURE_INFO bytes up to and including `cycles`
const MEASURE_INFO_LEN: usize = 215;

/// StopInfo bytes directly after MEASURE_INFO
const STOP_INFO_LEN: usize = 60;

// =============================================================================
// Headers
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct FileHeader {
    data_block_offs: usize,
    no_of_data_blocks: usize,
    meas_desc_block_offs: usize,
    no_of_meas_desc_blocks: usize,
    meas_desc_block_length: usize,
}

impl FileHeader {
    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut c = ByteCursor::new(data, ByteOrder::LittleEndian);
        let _revision = c.read_i16()?;
        let _info_offs = c.read_i32()?;
        let _info_length = c.read_i16()?;
        let _setup_offs = c.read_i32()?;
        let _setup_length = c.read_i16()?;
        let data_block_offs = c.read_u32()? as usize;
        let no_of_data_blocks = c.read_u16()?;
        let _data_block_length = c.read_i32()?;
        let meas_desc_block_offs = c.read_u32()? as usize;
        let no_of_meas_desc_blocks = c.read_u16()? as usize;
        let meas_desc_block_length = c.read_u16()? as usize;
        let header_valid = c.read_u16()?;
        let reserved1 = c.read_u32()?;
        let _reserved2 = c.read_u16()?;
        let _chksum = c.read_u16()?;

        if header_valid != HEADER_VALID {
            return Err(DecodeError::InvalidMagic { format: FORMAT });
        }

        let no_of_data_blocks = if no_of_data_blocks == MANY_DATA_BLOCKS {
            reserved1 as usize
        } else {
            usize::from(no_of_data_blocks)
        };

        Ok(FileHeader {
            data_block_offs,
            no_of_data_blocks,
            meas_desc_block_offs,
            no_of_meas_desc_blocks,
            meas_desc_block_length,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    data_offs: usize,
    next_block_offs: usize,
    block_type: u16,
    meas_desc_block_no: usize,
    block_length: usize,
}

impl BlockHeader {
    fn parse(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        let _block_no = c.read_i16()?;
        let data_offs = c.read_u32()? as usize;
        let next_block_offs = c.read_u32()? as usize;
        let block_type = c.read_u16()?;
        let meas_desc_block_no = c.read_u16()? as usize;
        let _lblock_no = c.read_u32()?;
        let block_length = c.read_u32()? as usize;
        Ok(BlockHeader {
            data_offs,
            next_block_offs,
            block_type,
            meas_desc_block_no,
            block_length,
        })
    }
}

// =============================================================================
// Measurement Description
// =============================================================================

/// Acquisition settings of one measurement (the MEASURE_INFO record).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdtMeasureInfo {
    pub time: String,
    pub date: String,
    pub mod_ser_no: String,
    pub meas_mode: i16,
    pub cfd_ll: f32,
    pub cfd_lh: f32,
    pub cfd_zc: f32,
    pub cfd_hf: f32,
    pub syn_zc: f32,
    pub syn_fd: i16,
    pub syn_fq: f32,
    pub syn_hf: f32,
    /// TAC range in seconds
    pub tac_r: f32,
    pub tac_g: i16,
    pub tac_of: f32,
    pub tac_ll: f32,
    pub tac_lh: f32,
    /// Micro-time bins per decay
    pub adc_re: i16,
    pub eal_de: i16,
    pub ncx: i16,
    pub ncy: i16,
    pub page: i16,
    pub col_t: f32,
    pub rep_t: f32,
    pub stopt: i16,
    pub overfl: u8,
    pub use_motor: i16,
    pub steps: u16,
    pub offset: f32,
    pub dither: i16,
    pub incr: i16,
    pub mem_bank: i16,
    pub mod_type: String,
    pub syn_th: f32,
    pub dead_time_comp: i16,
    pub polarity_l: i16,
    pub polarity_f: i16,
    pub polarity_p: i16,
    pub linediv: i16,
    pub accumulate: i16,
    pub flbck_y: i32,
    pub flbck_x: i32,
    pub bord_u: i32,
    pub bord_l: i32,
    pub pix_time: f32,
    pub pix_clk: i16,
    pub trigger: i16,
    pub scan_x: i32,
    pub scan_y: i32,
    pub scan_rx: i32,
    pub scan_ry: i32,
    pub fifo_typ: i16,
    pub epx_div: i32,
    pub mod_type_code: u16,
    pub mod_fpga_ver: u16,
    pub overflow_corr_factor: f32,
    pub adc_zoom: i32,
    pub cycles: i32,
    /// Present when the block is long enough to carry it
    pub stop_info: Option<SdtStopInfo>,
}

/// Rates and status recorded when the measurement stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdtStopInfo {
    pub status: u16,
    pub flags: u16,
    pub stop_time: f32,
    pub cur_step: i32,
    pub cur_cycle: i32,
    pub cur_page: i32,
    pub min_sync_rate: f32,
    pub min_cfd_rate: f32,
    pub min_tac_rate: f32,
    pub min_adc_rate: f32,
    /// Laser sync rate in Hz
    pub max_sync_rate: f32,
    pub max_cfd_rate: f32,
    pub max_tac_rate: f32,
    pub max_adc_rate: f32,
}

fn text(c: &mut ByteCursor<'_>, len: usize) -> Result<String, DecodeError> {
    let bytes = c.take(len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).trim_end().to_string())
}

impl SdtMeasureInfo {
    fn parse(block: &[u8]) -> Result<Self, DecodeError> {
        if block.len() < MEASURE_INFO_LEN {
            return Err(DecodeError::InvalidHeader {
                format: FORMAT,
                message: format!(
                    "measurement description has {} bytes, need {}",
                    block.len(),
                    MEASURE_INFO_LEN
                ),
            });
        }
        let c = &mut ByteCursor::new(block, ByteOrder::LittleEndian);
        let mut info = SdtMeasureInfo {
            time: text(c, 9)?,
            date: text(c, 11)?,
            mod_ser_no: text(c, 16)?,
            meas_mode: c.read_i16()?,
            cfd_ll: c.read_f32()?,
            cfd_lh: c.read_f32()?,
            cfd_zc: c.read_f32()?,
            cfd_hf: c.read_f32()?,
            syn_zc: c.read_f32()?,
            syn_fd: c.read_i16()?,
            syn_fq: c.read_f32()?,
            syn_hf: c.read_f32()?,
            tac_r: c.read_f32()?,
            tac_g: c.read_i16()?,
            tac_of: c.read_f32()?,
            tac_ll: c.read_f32()?,
            tac_lh: c.read_f32()?,
            adc_re: c.read_i16()?,
            eal_de: c.read_i16()?,
            ncx: c.read_i16()?,
            ncy: c.read_i16()?,
            page: c.read_i16()?,
            col_t: c.read_f32()?,
            rep_t: c.read_f32()?,
            stopt: c.read_i16()?,
            overfl: c.read_u8()?,
            use_motor: c.read_i16()?,
            steps: c.read_u16()?,
            offset: c.read_f32()?,
            dither: c.read_i16()?,
            incr: c.read_i16()?,
            mem_bank: c.read_i16()?,
            mod_type: text(c, 16)?,
            syn_th: c.read_f32()?,
            dead_time_comp: c.read_i16()?,
            polarity_l: c.read_i16()?,
            polarity_f: c.read_i16()?,
            polarity_p: c.read_i16()?,
            linediv: c.read_i16()?,
            accumulate: c.read_i16()?,
            flbck_y: c.read_i32()?,
            flbck_x: c.read_i32()?,
            bord_u: c.read_i32()?,
            bord_l: c.read_i32()?,
            pix_time: c.read_f32()?,
            pix_clk: c.read_i16()?,
            trigger: c.read_i16()?,
            scan_x: c.read_i32()?,
            scan_y: c.read_i32()?,
            scan_rx: c.read_i32()?,
            scan_ry: c.read_i32()?,
            fifo_typ: c.read_i16()?,
            epx_div: c.read_i32()?,
            mod_type_code: c.read_u16()?,
            mod_fpga_ver: c.read_u16()?,
            overflow_corr_factor: c.read_f32()?,
            adc_zoom: c.read_i32()?,
            cycles: c.read_i32()?,
            stop_info: None,
        };

        if c.remaining() >= STOP_INFO_LEN {
            info.stop_info = Some(SdtStopInfo {
                status: c.read_u16()?,
                flags: c.read_u16()?,
                stop_time: c.read_f32()?,
                cur_step: c.read_i32()?,
                cur_cycle: c.read_i32()?,
                cur_page: c.read_i32()?,
                min_sync_rate: c.read_f32()?,
                min_cfd_rate: c.read_f32()?,
                min_tac_rate: c.read_f32()?,
                min_adc_rate: c.read_f32()?,
                max_sync_rate: c.read_f32()?,
                max_cfd_rate: c.read_f32()?,
                max_tac_rate: c.read_f32()?,
                max_adc_rate: c.read_f32()?,
            });
        }
        Ok(info)
    }

    /// Decay shape (scan_y, scan_x, adc_re), if all extents are positive.
    fn decay_shape(&self) -> Option<(usize, usize, usize)> {
        let y = usize::try_from(self.scan_y).ok()?;
        let x = usize::try_from(self.scan_x).ok()?;
        let bins = usize::try_from(self.adc_re).ok()?;
        (y > 0 && x > 0 && bins > 0).then_some((y, x, bins))
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode an SDT file into `u16` decays with axes (channel, bin, y, x).
pub fn decode(data: &[u8]) -> Result<SliceSample, DecodeError> {
    let header = FileHeader::parse(data)?;

    let mut infos = Vec::with_capacity(header.no_of_meas_desc_blocks);
    for i in 0..header.no_of_meas_desc_blocks {
        let start = header.meas_desc_block_offs + i * header.meas_desc_block_length;
        let mut c = ByteCursor::new(data, ByteOrder::LittleEndian);
        c.seek(start)?;
        infos.push(SdtMeasureInfo::parse(c.take(header.meas_desc_block_length)?)?);
    }

    let mut shape: Option<(usize, usize, usize)> = None;
    let mut values: Vec<u16> = Vec::new();
    let mut metadata = Vec::with_capacity(header.no_of_data_blocks);
    let mut cursor = ByteCursor::new(data, ByteOrder::LittleEndian);
    let mut offset = header.data_block_offs;

    for block_index in 0..header.no_of_data_blocks {
        cursor.seek(offset)?;
        let block = BlockHeader::parse(&mut cursor)?;

        if block.block_type & DATA_ZIPPED != 0 {
            return Err(DecodeError::UnsupportedCompression {
                format: FORMAT,
                message: format!("data block {} is zip-compressed", block_index),
            });
        }
        if block.block_type & DATA_TYPE_MASK != 0 {
            return Err(DecodeError::InvalidHeader {
                format: FORMAT,
                message: format!(
                    "data block {} has unsupported element type 0x{:04X}",
                    block_index, block.block_type
                ),
            });
        }

        let info = infos
            .get(block.meas_desc_block_no)
            .ok_or_else(|| DecodeError::InvalidHeader {
                format: FORMAT,
                message: format!(
                    "data block {} refers to measurement {} of {}",
                    block_index,
                    block.meas_desc_block_no,
                    infos.len()
                ),
            })?;
        let block_shape = info.decay_shape().ok_or_else(|| DecodeError::InvalidHeader {
            format: FORMAT,
            message: format!(
                "measurement {} has no decay shape ({} x {} x {})",
                block.meas_desc_block_no, info.scan_y, info.scan_x, info.adc_re
            ),
        })?;
        let (y, x, bins) = block_shape;
        if block.block_length != y * x * bins * 2 {
            return Err(DecodeError::InvalidHeader {
                format: FORMAT,
                message: format!(
                    "data block {} holds {} bytes, expected {} x {} x {} u16",
                    block_index, block.block_length, y, x, bins
                ),
            });
        }
        if shape.is_some_and(|s| s != block_shape) {
            return Err(DecodeError::InvalidHeader {
                format: FORMAT,
                message: format!("data block {} differs in shape from block 0", block_index),
            });
        }
        shape = Some(block_shape);

        let mut data_cursor = ByteCursor::new(data, ByteOrder::LittleEndian);
        data_cursor.seek(block.data_offs)?;
        let payload = data_cursor.take(block.block_length)?;
        values.extend(
            payload
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
        );
        metadata.push(ChannelMetadata::Sdt(info.clone()));

        offset = block.next_block_offs;
    }

    let (y, x, bins) = shape.ok_or(DecodeError::InvalidHeader {
        format: FORMAT,
        message: "file holds no data blocks".to_string(),
    })?;
    let channels = metadata.len();

    // (ch, y, x, ut) -> (ch, ut, y, x)
    let decays = Array4::from_shape_vec((channels, y, x, bins), values).map_err(|e| {
        DecodeError::InvalidHeader {
            format: FORMAT,
            message: e.to_string(),
        }
    })?;
    let counts = decays
        .permuted_axes([0, 3, 1, 2])
        .as_standard_layout()
        .into_owned();

    debug!(channels, bins, height = y, width = x, "Decoded SDT blocks");

    Ok(SliceSample {
        data: SliceArray::U16(counts),
        metadata,
    })
}
