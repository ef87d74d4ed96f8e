//! User string heap (`#US`) reader.
//!
//! The `#US` heap stores string literals referenced by `ldstr` tokens. Each
//! entry is a compressed length prefix, the UTF-16LE code units, and one
//! trailing flag byte. The length counts the UTF-16 bytes plus that flag byte.

use widestring::U16String;

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Read view over the `#US` heap.
///
/// Offsets come from the low 24 bits of `0x70`-prefixed tokens embedded in
/// `ldstr` instructions.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::metadata::streams::UserStrings;
/// let data = &[0u8, 0x03, 0x41, 0x00, 0x00];
/// let us = UserStrings::from(data).unwrap();
/// assert_eq!(us.get(1).unwrap().to_string_lossy(), "A");
/// ```
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Create a `UserStrings` view from heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap is empty or the leading null entry is missing
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #US heap"));
        }

        Ok(UserStrings { data })
    }

    /// Decode the string entry starting at the given heap offset.
    ///
    /// # Errors
    /// Returns an error if the offset is out of bounds, the entry is truncated,
    /// or the declared length does not cover whole UTF-16 code units
    pub fn get(&self, index: usize) -> Result<U16String> {
        let raw = self.get_raw(index)?;
        if raw.is_empty() {
            return Ok(U16String::new());
        }

        // The final byte flags whether any character needs special handling.
        let utf16_bytes = &raw[..raw.len() - 1];
        if utf16_bytes.len() % 2 != 0 {
            return Err(malformed_error!(
                "Invalid string data length at index - {}",
                index
            ));
        }

        let units: Vec<u16> = utf16_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(U16String::from_vec(units))
    }

    /// Raw entry bytes (UTF-16 payload plus flag byte) at the given offset.
    ///
    /// # Errors
    /// Returns an error if the offset is out of bounds or the entry is truncated
    pub fn get_raw(&self, index: usize) -> Result<&'a [u8]> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;

        let Some(data_start) = index.checked_add(parser.pos()) else {
            return Err(OutOfBounds);
        };
        let Some(data_end) = data_start.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if data_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[data_start..data_end])
    }
}

#[cfg(test)]
mod tests {
    use widestring::u16str;

    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data: [u8; 29] = [
            0x00,
            0x1b, // 13 UTF-16 code units (26 bytes) + flag byte
            0x48, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x6c, 0x00, 0x6f, 0x00, 0x2c, 0x00, 0x20, 0x00,
            0x57, 0x00, 0x6f, 0x00, 0x72, 0x00, 0x6c, 0x00, 0x64, 0x00, 0x21, 0x00,
            0x00,
        ];

        let us = UserStrings::from(&data).unwrap();
        assert_eq!(us.get(1).unwrap(), u16str!("Hello, World!"));
    }

    #[test]
    fn empty_entry() {
        let data = [0x00, 0x00];
        let us = UserStrings::from(&data).unwrap();
        assert_eq!(us.get(1).unwrap(), U16String::new());
    }

    #[test]
    fn invalid() {
        assert!(UserStrings::from(&[]).is_err());
        assert!(UserStrings::from(&[0x22, 0x00]).is_err());

        // Even declared length cannot carry whole code units plus the flag byte.
        let data = [0x00, 0x02, 0x41, 0x00];
        let us = UserStrings::from(&data).unwrap();
        assert!(us.get(1).is_err());

        let truncated = [0x00, 0x05, 0x41, 0x00];
        let us = UserStrings::from(&truncated).unwrap();
        assert!(us.get(1).is_err());
    }
}
