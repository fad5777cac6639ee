//! Dense sample and stack arrays.
//!
//! Decoders produce 4-D slices with axes (channel, micro-time bin, y, x);
//! the in-memory assembler places them into a 6-D stack with axes
//! (channel, micro-time bin, time, z, y, x). Both are tagged unions over the
//! element types a FLIM file can carry.

use ndarray::{s, Array4, Array6, ArrayView4, ArrayView6, ArrayViewMut6, Axis};
use serde::{Deserialize, Serialize};
use zarrs::array::DataType;

use crate::io::ByteOrder;

// =============================================================================
// DType
// =============================================================================

/// Element type of a sample or stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    U16,
    U32,
    F32,
}

impl DType {
    /// Human-readable name, numpy style.
    pub const fn name(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::F32 => "float32",
        }
    }

    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::U16 => 2,
            DType::U32 | DType::F32 => 4,
        }
    }

    /// Zarr data type of stored elements.
    pub fn zarr_data_type(self) -> DataType {
        match self {
            DType::U8 => DataType::UInt8,
            DType::U16 => DataType::UInt16,
            DType::U32 => DataType::UInt32,
            DType::F32 => DataType::Float32,
        }
    }

    pub fn from_zarr_data_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::UInt8 => Some(DType::U8),
            DataType::UInt16 => Some(DType::U16),
            DataType::UInt32 => Some(DType::U32),
            DataType::Float32 => Some(DType::F32),
            _ => None,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Element
// =============================================================================

/// A scalar type that can live in a sample, a stack, or a store chunk.
pub trait Element:
    zarrs::array::ElementOwned + Copy + Default + PartialEq + std::fmt::Debug + 'static
{
    const DTYPE: DType;

    /// Decode one element from the start of `bytes`.
    fn from_bytes(bytes: &[u8], order: ByteOrder) -> Self;

    fn to_f64(self) -> f64;

    fn wrap_slice(array: Array4<Self>) -> SliceArray;

    fn slice_view(array: &SliceArray) -> Option<ArrayView4<'_, Self>>;

    fn wrap_stack(array: Array6<Self>) -> StackArray;

    fn stack_view(array: &StackArray) -> Option<ArrayView6<'_, Self>>;

    fn stack_view_mut(array: &mut StackArray) -> Option<ArrayViewMut6<'_, Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            #[inline]
            fn from_bytes(bytes: &[u8], order: ByteOrder) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                match order {
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(buf),
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(buf),
                }
            }

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            fn wrap_slice(array: Array4<Self>) -> SliceArray {
                SliceArray::$variant(array)
            }

            fn slice_view(array: &SliceArray) -> Option<ArrayView4<'_, Self>> {
                match array {
                    SliceArray::$variant(a) => Some(a.view()),
                    _ => None,
                }
            }

            fn wrap_stack(array: Array6<Self>) -> StackArray {
                StackArray::$variant(array)
            }

            fn stack_view(array: &StackArray) -> Option<ArrayView6<'_, Self>> {
                match array {
                    StackArray::$variant(a) => Some(a.view()),
                    _ => None,
                }
            }

            fn stack_view_mut(array: &mut StackArray) -> Option<ArrayViewMut6<'_, Self>> {
                match array {
                    StackArray::$variant(a) => Some(a.view_mut()),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, U8);
impl_element!(u16, U16);
impl_element!(u32, U32);
impl_element!(f32, F32);

/// Run `$body` with `$arr` bound to the typed array inside `$value`.
macro_rules! dispatch {
    ($kind:ident, $value:expr, $arr:ident => $body:expr) => {
        match $value {
            $kind::U8($arr) => $body,
            $kind::U16($arr) => $body,
            $kind::U32($arr) => $body,
            $kind::F32($arr) => $body,
        }
    };
}
pub(crate) use dispatch;

// =============================================================================
// SliceArray
// =============================================================================

/// One decoded acquisition: axes (channel, micro-time bin, y, x).
#[derive(Debug, Clone, PartialEq)]
pub enum SliceArray {
    U8(Array4<u8>),
    U16(Array4<u16>),
    U32(Array4<u32>),
    F32(Array4<f32>),
}

impl SliceArray {
    pub fn shape(&self) -> [usize; 4] {
        dispatch!(SliceArray, self, a => {
            let s = a.shape();
            [s[0], s[1], s[2], s[3]]
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            SliceArray::U8(_) => DType::U8,
            SliceArray::U16(_) => DType::U16,
            SliceArray::U32(_) => DType::U32,
            SliceArray::F32(_) => DType::F32,
        }
    }

    /// Bytes held by the element buffer.
    pub fn nbytes(&self) -> usize {
        self.shape().iter().product::<usize>() * self.dtype().size_in_bytes()
    }

    /// Typed view, `None` when `T` is not the stored element type.
    pub fn view<T: Element>(&self) -> Option<ArrayView4<'_, T>> {
        T::slice_view(self)
    }
}

// =============================================================================
// StackArray
// =============================================================================

fn copy_into<T: Element>(
    stack: &mut StackArray,
    time: usize,
    z: usize,
    src: &Array4<T>,
) -> Result<(), InsertError> {
    let stack_dtype = stack.dtype();
    let mut dst = T::stack_view_mut(stack).ok_or(InsertError::Dtype {
        stack: stack_dtype,
        slice: T::DTYPE,
    })?;
    let (c, b, h, w) = src.dim();
    dst.slice_mut(s![..c, ..b, time, z, ..h, ..w]).assign(src);
    Ok(())
}

/// A fully assembled in-memory stack: axes (channel, micro-time bin, time, z, y, x).
#[derive(Debug, Clone, PartialEq)]
pub enum StackArray {
    U8(Array6<u8>),
    U16(Array6<u16>),
    U32(Array6<u32>),
    F32(Array6<f32>),
}

/// Reasons a slice cannot be placed into a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// Element types differ
    Dtype { stack: DType, slice: DType },
    /// The slice is larger than the stack on some axis, or (t, z) is outside it
    OutOfBounds,
}

impl StackArray {
    /// A zero-filled stack.
    pub fn zeros(shape: [usize; 6], dtype: DType) -> Self {
        fn filled<T: Element>(shape: [usize; 6]) -> StackArray {
            T::wrap_stack(Array6::from_elem(shape, T::default()))
        }
        match dtype {
            DType::U8 => filled::<u8>(shape),
            DType::U16 => filled::<u16>(shape),
            DType::U32 => filled::<u32>(shape),
            DType::F32 => filled::<f32>(shape),
        }
    }

    /// A stack holding a single slice at time 0, z 0.
    pub fn from_slice(slice: SliceArray) -> Self {
        dispatch!(SliceArray, slice, a => {
            Element::wrap_stack(a.insert_axis(Axis(2)).insert_axis(Axis(3)))
        })
    }

    pub fn shape(&self) -> [usize; 6] {
        dispatch!(StackArray, self, a => {
            let s = a.shape();
            [s[0], s[1], s[2], s[3], s[4], s[5]]
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            StackArray::U8(_) => DType::U8,
            StackArray::U16(_) => DType::U16,
            StackArray::U32(_) => DType::U32,
            StackArray::F32(_) => DType::F32,
        }
    }

    /// Copy `slice` into `[:c, :b, time, z, :h, :w]`.
    ///
    /// Smaller slices fill only their own extent; the rest stays untouched.
    pub fn insert_slice(
        &mut self,
        time: usize,
        z: usize,
        slice: &SliceArray,
    ) -> Result<(), InsertError> {
        let shape = self.shape();
        let [c, b, h, w] = slice.shape();
        if time >= shape[2]
            || z >= shape[3]
            || c > shape[0]
            || b > shape[1]
            || h > shape[4]
            || w > shape[5]
        {
            return Err(InsertError::OutOfBounds);
        }

        dispatch!(SliceArray, slice, src => copy_into(self, time, z, src))
    }

    /// Typed view of the whole stack, `None` when `T` is not the stored type.
    pub fn view<T: Element>(&self) -> Option<ArrayView6<'_, T>> {
        T::stack_view(self)
    }

    /// Typed view of one (time, z) position, axes (channel, bin, y, x).
    pub fn slice_at<T: Element>(&self, time: usize, z: usize) -> Option<ArrayView4<'_, T>> {
        let view = T::stack_view(self)?;
        let shape = view.shape();
        if time >= shape[2] || z >= shape[3] {
            return None;
        }
        Some(view.slice_move(s![.., .., time, z, .., ..]))
    }

    /// Sum over the micro-time axis, keeping it with length 1.
    ///
    /// This is the intensity image shown next to the lifetime stack.
    pub fn summed_intensity(&self) -> Array6<f64> {
        dispatch!(StackArray, self, a => {
            let s = a.shape();
            let mut out = Array6::<f64>::zeros((s[0], 1, s[2], s[3], s[4], s[5]));
            {
                let mut acc = out.index_axis_mut(Axis(1), 0);
                for bin in a.axis_iter(Axis(1)) {
                    acc.zip_mut_with(&bin, |o, &v| *o += Element::to_f64(v));
                }
            }
            out
        })
    }
}
