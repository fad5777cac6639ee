//! TIFF tag and field type definitions.

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// The size of each type decides whether a value fits inline in an IFD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,

    /// 8-bit ASCII character
    Ascii = 2,

    /// Unsigned 16-bit integer
    Short = 3,

    /// Unsigned 32-bit integer
    Long = 4,

    /// Two Longs: numerator and denominator
    Rational = 5,

    /// Undefined byte data
    Undefined = 7,

    /// IEEE single precision
    Float = 11,

    /// IEEE double precision
    Double = 12,

    /// Unsigned 64-bit integer (BigTIFF only)
    Long8 = 16,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long | FieldType::Float => 4,
            FieldType::Rational | FieldType::Double | FieldType::Long8 => 8,
        }
    }

    /// Returns `None` for unsupported or unknown type values.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Check if `count` values of this type fit in the entry's value field
    /// (4 bytes classic, 8 bytes BigTIFF).
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        (self.size_in_bytes() as u64)
            .checked_mul(count)
            .map(|total| total <= threshold)
            .unwrap_or(false)
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// TIFF tag IDs needed to decode plain uncompressed image pages.
///
/// Tags not listed here are ignored during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    ImageWidth = 256,

    /// Image height in pixels
    ImageLength = 257,

    BitsPerSample = 258,

    Compression = 259,

    /// Free text; tifffile stores a JSON shape here, ImageJ its hyperstack layout
    ImageDescription = 270,

    StripOffsets = 273,

    SamplesPerPixel = 277,

    RowsPerStrip = 278,

    StripByteCounts = 279,

    PlanarConfiguration = 284,

    /// Presence means the page is tiled, which is not decoded
    TileOffsets = 324,

    /// 1 = unsigned integer, 2 = signed integer, 3 = IEEE float
    SampleFormat = 339,
}

impl TiffTag {
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Tag name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::SampleFormat => "SampleFormat",
        }
    }
}

// =============================================================================
// Compression and SampleFormat Values
// =============================================================================

/// Compression value of an uncompressed page.
pub const COMPRESSION_NONE: u64 = 1;

/// TIFF `SampleFormat` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Unsigned,
    Signed,
    Float,
}

impl SampleFormat {
    /// Returns `None` for void and complex formats.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(SampleFormat::Unsigned),
            2 => Some(SampleFormat::Signed),
            3 => Some(SampleFormat::Float),
            _ => None,
        }
    }
}
