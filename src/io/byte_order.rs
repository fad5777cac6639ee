use crate::error::IoError;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a binary file.
///
/// TIFF declares it in the first two bytes of the header; PTU and SDT files
/// are always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

macro_rules! read_fn {
    ($name:ident, $ty:ty) => {
        /// Read a value from the start of `bytes` using this byte order.
        ///
        /// # Panics
        /// Panics if the slice is shorter than the value.
        #[inline]
        pub fn $name(self, bytes: &[u8]) -> $ty {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
            match self {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(buf),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(buf),
            }
        }
    };
}

impl ByteOrder {
    read_fn!(read_u16, u16);
    read_fn!(read_i16, i16);
    read_fn!(read_u32, u32);
    read_fn!(read_i32, i32);
    read_fn!(read_u64, u64);
    read_fn!(read_i64, i64);
    read_fn!(read_f32, f32);
    read_fn!(read_f64, f64);
}

// =============================================================================
// ByteCursor
// =============================================================================

/// Sequential reader over a byte slice.
///
/// Every read is bounds-checked and reports `IoError::RangeOutOfBounds` when
/// the data ends early, so truncated files surface as errors.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    position: usize,
    order: ByteOrder,
}

macro_rules! cursor_fn {
    ($name:ident, $read:ident, $ty:ty) => {
        #[inline]
        pub fn $name(&mut self) -> Result<$ty, IoError> {
            let bytes = self.take(std::mem::size_of::<$ty>())?;
            Ok(self.order.$read(bytes))
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            position: 0,
            order,
        }
    }

    /// Current offset from the start of the data.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Move to an absolute offset.
    pub fn seek(&mut self, offset: usize) -> Result<(), IoError> {
        if offset > self.data.len() {
            return Err(self.out_of_bounds(offset, 0));
        }
        self.position = offset;
        Ok(())
    }

    /// Consume `len` bytes and return them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], IoError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.out_of_bounds(self.position, len))?;
        let data = self.data;
        let slice = &data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), IoError> {
        self.take(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, IoError> {
        Ok(self.take(1)?[0])
    }

    cursor_fn!(read_u16, read_u16, u16);
    cursor_fn!(read_i16, read_i16, i16);
    cursor_fn!(read_u32, read_u32, u32);
    cursor_fn!(read_i32, read_i32, i32);
    cursor_fn!(read_i64, read_i64, i64);
    cursor_fn!(read_f32, read_f32, f32);

    fn out_of_bounds(&self, offset: usize, len: usize) -> IoError {
        IoError::RangeOutOfBounds {
            offset: offset as u64,
            requested: len as u64,
            size: self.data.len() as u64,
        }
    }
}
