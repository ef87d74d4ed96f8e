//! Endian-aware, bounds-checked reading and writing of primitive values.
//!
//! All multi-byte fields of the CIL container format are little-endian. This
//! module provides the safe primitives the rest of the crate builds on:
//! fixed-width reads and writes, the dynamic 2-or-4-byte forms used by
//! adaptive-width table fields, and the ECMA-335 compressed unsigned integer
//! encoding used by heaps and signatures.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - trait implemented for all primitive types
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - fixed-width reads
//! - [`crate::file::io::read_le_at_dyn`] - 2-or-4-byte reads for adaptive widths
//! - [`crate::file::io::write_le_at`] / [`crate::file::io::write_le_at_dyn`] - write counterparts
//! - [`crate::file::io::write_compressed_uint`] - ECMA-335 II.23.2 length encoding

use crate::Error::OutOfBounds;
use crate::Result;

/// Conversion between primitive values and their little-endian byte form.
///
/// Implemented for the unsigned/signed integers and floats that occur in the
/// container format. Used by the generic read/write helpers in this module.
pub trait CilIO: Sized {
    /// Byte-array type holding the encoded form of `Self`.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read `Self` from its little-endian byte form.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write `Self` to its little-endian byte form.
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty),*) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Arguments
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (will be advanced after reading)
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}

/// Reads a table index whose on-disk width depends on a size decision.
///
/// Adaptive-width fields (heap offsets, table indices, coded indices) are
/// stored as `u16` unless the referenced space is large, in which case they
/// widen to `u32`. The offset is advanced by the width actually read.
///
/// # Arguments
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (will be advanced after reading)
/// * `is_large` - `true` to read 4 bytes, `false` to read 2
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    if is_large {
        read_le_at::<u32>(data, offset)
    } else {
        Ok(u32::from(read_le_at::<u16>(data, offset)?))
    }
}

/// Safely writes a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()>
where
    T::Bytes: AsRef<[u8]>,
{
    let bytes = value.to_le_bytes();
    let type_len = bytes.as_ref().len();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..*offset + type_len].copy_from_slice(bytes.as_ref());
    *offset += type_len;

    Ok(())
}

/// Writes a table index as 2 or 4 bytes depending on the width decision.
///
/// Write counterpart of [`read_le_at_dyn`]; the offset advances by the width
/// actually written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small, or
/// [`crate::Error::EncodeOverflow`] if `value` exceeds `u16` range while the
/// narrow form was selected.
pub fn write_le_at_dyn(
    data: &mut [u8],
    offset: &mut usize,
    value: u32,
    is_large: bool,
) -> Result<()> {
    if is_large {
        write_le_at(data, offset, value)
    } else {
        let narrow = u16::try_from(value).map_err(|_| {
            crate::Error::EncodeOverflow(format!("index {value} does not fit a 2-byte field"))
        })?;
        write_le_at(data, offset, narrow)
    }
}

/// Appends a value of type `T` in little-endian byte order to a growable buffer.
pub fn push_le<T: CilIO>(data: &mut Vec<u8>, value: T)
where
    T::Bytes: AsRef<[u8]>,
{
    data.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Appends a table index as 2 or 4 bytes depending on the width decision.
///
/// Write counterpart of [`read_le_at_dyn`]. Values that do not fit the
/// narrow form when `is_large` is `false` indicate that the width decision
/// was taken against stale size information.
///
/// # Errors
/// Returns [`crate::Error::EncodeOverflow`] if `value` exceeds `u16` range
/// while the narrow form was selected.
pub fn push_le_dyn(data: &mut Vec<u8>, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        push_le(data, value);
    } else {
        let narrow = u16::try_from(value).map_err(|_| {
            crate::Error::EncodeOverflow(format!("index {value} does not fit a 2-byte field"))
        })?;
        push_le(data, narrow);
    }
    Ok(())
}

/// Appends an ECMA-335 II.23.2 compressed unsigned integer.
///
/// Values below `0x80` take one byte, below `0x4000` two bytes, and up to
/// `0x1FFF_FFFF` four bytes. Larger values cannot be represented.
///
/// # Errors
/// Returns [`crate::Error::EncodeOverflow`] for values above `0x1FFF_FFFF`.
pub fn write_compressed_uint(data: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => data.push(value as u8),
        0x80..=0x3FFF => {
            data.push((0x80 | (value >> 8)) as u8);
            data.push((value & 0xFF) as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            data.push((0xC0 | (value >> 24)) as u8);
            data.push(((value >> 16) & 0xFF) as u8);
            data.push(((value >> 8) & 0xFF) as u8);
            data.push((value & 0xFF) as u8);
        }
        _ => {
            return Err(crate::Error::EncodeOverflow(format!(
                "value {value} exceeds compressed uint range"
            )))
        }
    }
    Ok(())
}

/// Byte length of the compressed form of `value`, without encoding it.
#[must_use]
pub fn compressed_uint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_le_primitives() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;

        let first: u16 = read_le_at(&data, &mut offset).unwrap();
        let second: u16 = read_le_at(&data, &mut offset).unwrap();
        let third: u32 = read_le_at(&data, &mut offset).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 3);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_le_out_of_bounds() {
        let data = [0x01, 0x02];
        let mut offset = 1;
        assert!(read_le_at::<u32>(&data, &mut offset).is_err());
        // Offset untouched on failure
        assert_eq!(offset, 1);
    }

    #[test]
    fn dyn_width_read() {
        let data = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&data, &mut offset, false).unwrap(), 0x1234);
        assert_eq!(read_le_at_dyn(&data, &mut offset, true).unwrap(), 0x1234_5678);
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut data = [0u8; 8];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0xABCDu16).unwrap();
        write_le_at(&mut data, &mut offset, 0x1234_5678u32).unwrap();

        let mut read_offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut read_offset).unwrap(), 0xABCD);
        assert_eq!(
            read_le_at::<u32>(&data, &mut read_offset).unwrap(),
            0x1234_5678
        );
    }

    #[test]
    fn dyn_width_push() {
        let mut data = Vec::new();
        push_le_dyn(&mut data, 0x1234, false).unwrap();
        push_le_dyn(&mut data, 0x1234, true).unwrap();
        assert_eq!(data, [0x34, 0x12, 0x34, 0x12, 0x00, 0x00]);

        assert!(push_le_dyn(&mut data, 0x1_0000, false).is_err());
    }

    #[test]
    fn compressed_uint_forms() {
        let mut data = Vec::new();
        write_compressed_uint(&mut data, 0x03).unwrap();
        assert_eq!(data, [0x03]);

        data.clear();
        write_compressed_uint(&mut data, 0x80).unwrap();
        assert_eq!(data, [0x80, 0x80]);

        data.clear();
        write_compressed_uint(&mut data, 0x4000).unwrap();
        assert_eq!(data, [0xC0, 0x00, 0x40, 0x00]);

        data.clear();
        assert!(write_compressed_uint(&mut data, 0x2000_0000).is_err());
    }

    #[test]
    fn compressed_uint_lengths() {
        assert_eq!(compressed_uint_len(0x7F), 1);
        assert_eq!(compressed_uint_len(0x80), 2);
        assert_eq!(compressed_uint_len(0x3FFF), 2);
        assert_eq!(compressed_uint_len(0x4000), 4);
    }
}
