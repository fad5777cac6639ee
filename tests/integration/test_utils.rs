//! Test utilities for integration tests.
//!
//! Builders for small but structurally complete FLIM files (multi-page TIFF,
//! PicoHarp PTU, Becker & Hickl SDT) and helpers for scratch folders.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

// =============================================================================
// Scratch Folders
// =============================================================================

/// A temporary folder named `name` holding the given files.
///
/// The folder name matters: the default store is `<folder>/<name>.zarr`.
pub fn folder_with(name: &str, files: &[(&str, Vec<u8>)]) -> (TempDir, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let folder = root.path().join(name);
    std::fs::create_dir(&folder).unwrap();
    for (file_name, data) in files {
        std::fs::write(folder.join(file_name), data).unwrap();
    }
    (root, folder)
}

/// Every file below `dir` with its contents, sorted by relative path.
pub fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let name = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.push((name, std::fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

// =============================================================================
// TIFF File Builder
// =============================================================================

#[derive(Clone, Copy, Debug)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

/// Builder for uncompressed multi-page TIFF files, one strip per page.
pub struct StackTiffBuilder {
    byte_order: ByteOrderType,
    is_bigtiff: bool,
    width: u32,
    height: u32,
    bits: u16,
    sample_format: u16,
    description: Option<String>,
    pages: Vec<Vec<u8>>,
}

impl StackTiffBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            byte_order: ByteOrderType::LittleEndian,
            is_bigtiff: false,
            width,
            height,
            bits: 16,
            sample_format: 1,
            description: None,
            pages: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrderType) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_bigtiff(mut self, is_bigtiff: bool) -> Self {
        self.is_bigtiff = is_bigtiff;
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn add_page_u8(mut self, values: &[u8]) -> Self {
        assert_eq!(values.len(), (self.width * self.height) as usize);
        self.bits = 8;
        self.sample_format = 1;
        self.pages.push(values.to_vec());
        self
    }

    pub fn add_page_u16(mut self, values: &[u16]) -> Self {
        assert_eq!(values.len(), (self.width * self.height) as usize);
        self.bits = 16;
        self.sample_format = 1;
        let order = self.byte_order;
        let plane = values
            .iter()
            .flat_map(|v| match order {
                ByteOrderType::LittleEndian => v.to_le_bytes(),
                ByteOrderType::BigEndian => v.to_be_bytes(),
            })
            .collect();
        self.pages.push(plane);
        self
    }

    pub fn add_page_f32(mut self, values: &[f32]) -> Self {
        assert_eq!(values.len(), (self.width * self.height) as usize);
        self.bits = 32;
        self.sample_format = 3;
        let order = self.byte_order;
        let plane = values
            .iter()
            .flat_map(|v| match order {
                ByteOrderType::LittleEndian => v.to_le_bytes(),
                ByteOrderType::BigEndian => v.to_be_bytes(),
            })
            .collect();
        self.pages.push(plane);
        self
    }

    /// Build the file: header, then per page its pixel data, description
    /// and IFD, with each IFD linked from the previous one.
    pub fn build(self) -> Vec<u8> {
        let mut data = Vec::new();
        match self.byte_order {
            ByteOrderType::LittleEndian => data.extend_from_slice(b"II"),
            ByteOrderType::BigEndian => data.extend_from_slice(b"MM"),
        }
        let offset_size = if self.is_bigtiff { 8 } else { 4 };
        if self.is_bigtiff {
            self.write(&mut data, 43, 2);
            self.write(&mut data, 8, 2);
            self.write(&mut data, 0, 2);
        } else {
            self.write(&mut data, 42, 2);
        }
        let mut link_pos = data.len();
        self.write(&mut data, 0, offset_size);

        for (index, plane) in self.pages.iter().enumerate() {
            let strip_offset = data.len() as u64;
            data.extend_from_slice(plane);

            let description = match (&self.description, index) {
                (Some(text), 0) => {
                    let at = data.len() as u64;
                    data.extend_from_slice(text.as_bytes());
                    data.push(0);
                    Some((at, text.len() as u64 + 1))
                }
                _ => None,
            };
            if data.len() % 2 == 1 {
                data.push(0);
            }

            let ifd_offset = data.len() as u64;
            self.patch(&mut data, link_pos, ifd_offset, offset_size);

            let offset_type = if self.is_bigtiff { 16 } else { 4 };
            let mut entries: Vec<(u16, u16, u64, u64)> = vec![
                (256, 4, 1, self.width as u64),
                (257, 4, 1, self.height as u64),
                (258, 3, 1, self.bits as u64),
                (259, 3, 1, 1),
                (273, offset_type, 1, strip_offset),
                (277, 3, 1, 1),
                (278, 4, 1, self.height as u64),
                (279, 4, 1, plane.len() as u64),
                (339, 3, 1, self.sample_format as u64),
            ];
            if let Some((at, len)) = description {
                entries.push((270, 2, len, at));
            }
            entries.sort_by_key(|e| e.0);

            self.write(&mut data, entries.len() as u64, if self.is_bigtiff { 8 } else { 2 });
            for (tag, field_type, count, value) in entries {
                self.write(&mut data, tag as u64, 2);
                self.write(&mut data, field_type as u64, 2);
                self.write(&mut data, count, offset_size);
                // Inline values are left-justified in the value field
                let size = match field_type {
                    3 => 2,
                    2 if tag == 270 => offset_size,
                    16 => 8,
                    _ => 4,
                };
                let size = size.min(offset_size);
                self.write(&mut data, value, size);
                for _ in size..offset_size {
                    data.push(0);
                }
            }
            link_pos = data.len();
            self.write(&mut data, 0, offset_size);
        }
        data
    }

    fn write(&self, data: &mut Vec<u8>, value: u64, size: usize) {
        let bytes = match self.byte_order {
            ByteOrderType::LittleEndian => value.to_le_bytes(),
            ByteOrderType::BigEndian => value.to_be_bytes(),
        };
        match self.byte_order {
            ByteOrderType::LittleEndian => data.extend_from_slice(&bytes[..size]),
            ByteOrderType::BigEndian => data.extend_from_slice(&bytes[8 - size..]),
        }
    }

    fn patch(&self, data: &mut [u8], at: usize, value: u64, size: usize) {
        let mut encoded = Vec::with_capacity(size);
        self.write(&mut encoded, value, size);
        data[at..at + size].copy_from_slice(&encoded);
    }
}

/// A little-endian u16 TIFF of shape (channels, bins, height, width) with a
/// JSON shape description; `value(c, bin, y, x)` gives each pixel.
pub fn tiff_u16(
    [channels, bins, height, width]: [usize; 4],
    value: impl Fn(usize, usize, usize, usize) -> u16,
) -> Vec<u8> {
    let mut builder = StackTiffBuilder::new(width as u32, height as u32).with_description(
        format!(
            r#"{{"shape": [{}, {}, {}, {}]}}"#,
            channels, bins, height, width
        ),
    );
    for c in 0..channels {
        for b in 0..bins {
            let plane: Vec<u16> = (0..height * width)
                .map(|i| value(c, b, i / width, i % width))
                .collect();
            builder = builder.add_page_u16(&plane);
        }
    }
    builder.build()
}

/// A u16 TIFF whose pixels all hold `fill`.
pub fn tiff_filled(shape: [usize; 4], fill: u16) -> Vec<u8> {
    tiff_u16(shape, |_, _, _, _| fill)
}

// =============================================================================
// PTU File Builder
// =============================================================================

const PTU_INT8: u32 = 0x1000_0008;
const PTU_FLOAT8: u32 = 0x2000_0008;
const PTU_EMPTY8: u32 = 0xFFFF_0008;
const PICOHARP_T3: i64 = 0x0001_0303;

fn ptu_tag(out: &mut Vec<u8>, name: &str, kind: u32, value: i64) {
    let mut ident = [0u8; 32];
    ident[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&ident);
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
}

/// A PicoHarp T3 file scanning a `pix_x` x `pix_y` grid, with marker bits
/// 1 (line start), 2 (line stop) and 4 (frame), a 20 MHz sync and 25 ns
/// resolution (2 bins).
pub fn picoharp_ptu(pix_x: i64, pix_y: i64, records: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"PQTTTR\0\0");
    out.extend_from_slice(b"1.0.00\0\0");
    ptu_tag(&mut out, "TTResultFormat_TTTRRecType", PTU_INT8, PICOHARP_T3);
    ptu_tag(&mut out, "TTResult_NumberOfRecords", PTU_INT8, records.len() as i64);
    ptu_tag(&mut out, "ImgHdr_PixX", PTU_INT8, pix_x);
    ptu_tag(&mut out, "ImgHdr_PixY", PTU_INT8, pix_y);
    ptu_tag(&mut out, "ImgHdr_LineStart", PTU_INT8, 1);
    ptu_tag(&mut out, "ImgHdr_LineStop", PTU_INT8, 2);
    ptu_tag(&mut out, "ImgHdr_Frame", PTU_INT8, 3);
    ptu_tag(
        &mut out,
        "MeasDesc_Resolution",
        PTU_FLOAT8,
        (2.5e-8f64).to_bits() as i64,
    );
    ptu_tag(&mut out, "TTResult_SyncRate", PTU_INT8, 20_000_000);
    ptu_tag(&mut out, "Header_End", PTU_EMPTY8, 0);
    for r in records {
        out.extend_from_slice(&r.to_le_bytes());
    }
    out
}

/// PicoHarp photon record; `channel` is 1-based.
pub fn ph_photon(channel: u32, dtime: u32, nsync: u32) -> u32 {
    (channel << 28) | (dtime << 16) | nsync
}

/// PicoHarp marker record.
pub fn ph_marker(bits: u32, nsync: u32) -> u32 {
    (0xF << 28) | (bits << 16) | nsync
}

/// A single-line scan (1 x `pix_x`) with `photons` photons in pixel 0.
pub fn one_line_ptu(pix_x: i64, photons: u32) -> Vec<u8> {
    let mut records = vec![ph_marker(4, 10), ph_marker(1, 100)];
    for i in 0..photons {
        records.push(ph_photon(1, 1, 101 + i));
    }
    records.push(ph_marker(2, 100 + 100 * pix_x as u32));
    picoharp_ptu(pix_x, 1, &records)
}

// =============================================================================
// SDT File Builder
// =============================================================================

const SDT_HEADER_LEN: usize = 42;
const SDT_INFO_LEN: usize = 275;

fn put<const N: usize>(buf: &mut [u8], at: usize, bytes: [u8; N]) {
    buf[at..at + N].copy_from_slice(&bytes);
}

/// An SDT file with one measurement description and `channels` u16 decay
/// blocks shaped (y, x, bins); `value(c, y, x, bin)` gives each count.
pub fn sdt_file(
    channels: usize,
    (y, x, bins): (usize, usize, usize),
    value: impl Fn(usize, usize, usize, usize) -> u16,
) -> Vec<u8> {
    let mut file = vec![0u8; SDT_HEADER_LEN + SDT_INFO_LEN];
    put(&mut file, 18, (channels as u16).to_le_bytes());
    put(&mut file, 24, (SDT_HEADER_LEN as u32).to_le_bytes());
    put(&mut file, 28, 1u16.to_le_bytes());
    put(&mut file, 30, (SDT_INFO_LEN as u16).to_le_bytes());
    put(&mut file, 32, 0x5555u16.to_le_bytes());

    let info = SDT_HEADER_LEN;
    put(&mut file, info + 86, (bins as i16).to_le_bytes());
    put(&mut file, info + 177, (x as i32).to_le_bytes());
    put(&mut file, info + 181, (y as i32).to_le_bytes());
    put(&mut file, info + 251, 80_000_000f32.to_le_bytes());

    let first_block = file.len();
    put(&mut file, 14, (first_block as u32).to_le_bytes());
    let block_len = y * x * bins * 2;
    for c in 0..channels {
        let data_offs = file.len() + 22;
        let mut header = vec![0u8; 22];
        put(&mut header, 0, (c as i16).to_le_bytes());
        put(&mut header, 2, (data_offs as u32).to_le_bytes());
        put(&mut header, 6, ((data_offs + block_len) as u32).to_le_bytes());
        put(&mut header, 18, (block_len as u32).to_le_bytes());
        file.extend(header);
        for yy in 0..y {
            for xx in 0..x {
                for b in 0..bins {
                    file.extend_from_slice(&value(c, yy, xx, b).to_le_bytes());
                }
            }
        }
    }
    file
}
