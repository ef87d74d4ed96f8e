//! GUID heap (`#GUID`) reader.
//!
//! The `#GUID` heap is a flat array of 16-byte GUIDs. Unlike the other heaps it
//! is indexed 1-based by ordinal, not by byte offset, and index 0 means "no GUID".

use crate::{Error::OutOfBounds, Result};

/// Read view over the `#GUID` heap.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::metadata::streams::Guid;
/// let data = &[0u8; 16];
/// let guids = Guid::from(data).unwrap();
/// assert!(guids.get(1).is_ok());
/// ```
pub struct Guid<'a> {
    data: &'a [u8],
}

impl<'a> Guid<'a> {
    /// Create a `Guid` view from heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap size is not a multiple of 16 bytes
    pub fn from(data: &'a [u8]) -> Result<Guid<'a>> {
        if data.len() % 16 != 0 {
            return Err(malformed_error!(
                "#GUID heap size {} is not a multiple of 16",
                data.len()
            ));
        }

        Ok(Guid { data })
    }

    /// Returns the GUID at the given 1-based index.
    ///
    /// # Errors
    /// Returns an error if the index is zero or past the end of the heap
    pub fn get(&self, index: usize) -> Result<uguid::Guid> {
        if index == 0 {
            return Err(OutOfBounds);
        }

        let Some(end) = index.checked_mul(16) else {
            return Err(OutOfBounds);
        };
        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        let mut buffer = [0u8; 16];
        buffer.copy_from_slice(&self.data[end - 16..end]);

        Ok(uguid::Guid::from_bytes(buffer))
    }

    /// Number of GUIDs in the heap.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / 16
    }
}
