//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry (small values) or at an
//! offset in the file (arrays, strings).

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::{ByteOrder, RangeReader};

use super::parser::{IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values from a TIFF file, respecting its byte order.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw bytes of an entry's value, inline or fetched from its offset.
    pub fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ))
        } else {
            let offset = entry.value_offset(self.header.byte_order);
            Ok(self.reader.read_exact_at(offset, size as usize)?)
        }
    }

    /// Read a single integer value (Byte, Short, Long or Long8).
    pub fn read_u64(&self, entry: &IfdEntry, tag: TiffTag) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.header.byte_order) {
            return Ok(value);
        }
        if entry.count != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected count 1, got {}", entry.count),
            });
        }
        self.read_u64_array(entry, tag)?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: "empty value".to_string(),
            })
    }

    /// Read an integer array such as StripOffsets in one range request.
    pub fn read_u64_array(&self, entry: &IfdEntry, tag: TiffTag) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry)?;
        let order = self.header.byte_order;
        let width = field_type.size_in_bytes();
        let values = match field_type {
            FieldType::Byte => bytes.iter().map(|&b| u64::from(b)).collect(),
            FieldType::Short => bytes
                .chunks_exact(width)
                .map(|c| u64::from(order.read_u16(c)))
                .collect(),
            FieldType::Long => bytes
                .chunks_exact(width)
                .map(|c| u64::from(order.read_u32(c)))
                .collect(),
            FieldType::Long8 => bytes
                .chunks_exact(width)
                .map(|c| order.read_u64(c))
                .collect(),
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: tag.name(),
                    message: format!("expected an integer type, got {:?}", other),
                })
            }
        };
        Ok(values)
    }

    /// Read an ASCII value, stripping the NUL terminator.
    pub fn read_string(&self, entry: &IfdEntry, tag: TiffTag) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected Ascii, got type {}", entry.field_type_raw),
            });
        }
        let bytes = self.read_bytes(entry)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}
