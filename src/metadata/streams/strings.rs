//! String heap (`#Strings`) reader.
//!
//! The `#Strings` heap stores null-terminated UTF-8 identifier strings. Offset 0
//! always holds the empty string, and metadata table columns reference entries
//! by byte offset into the heap.

use std::ffi::CStr;

use crate::{Error::OutOfBounds, Result};

/// Read view over the `#Strings` heap.
///
/// Identifier strings (type names, method names, namespaces) live here as raw
/// null-terminated UTF-8. Entries may overlap; any byte offset that starts a
/// valid string is addressable.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::metadata::streams::Strings;
/// let data = &[0u8, b'H', b'e', b'l', b'l', b'o', 0u8];
/// let strings = Strings::from(data).unwrap();
/// assert_eq!(strings.get(1).unwrap(), "Hello");
/// ```
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Create a `Strings` view from heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap is empty or the leading null entry is missing
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Provided #Strings heap is empty"));
        }

        Ok(Strings { data })
    }

    /// Resolve the string starting at the given heap offset.
    ///
    /// # Errors
    /// Returns an error if the offset is out of bounds, the string is not
    /// terminated, or the bytes are not valid UTF-8
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(raw) => raw
                .to_str()
                .map_err(|_| malformed_error!("Invalid string at index - {}", index)),
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }

    /// Total heap size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the heap holds only the leading null entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }
}
