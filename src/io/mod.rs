mod byte_order;
mod range_reader;

pub use byte_order::{ByteCursor, ByteOrder};
pub use range_reader::{FileSource, RangeReader};
