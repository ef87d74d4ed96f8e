//! Blob heap (`#Blob`) reader.
//!
//! The `#Blob` heap stores length-prefixed binary entries (signatures, constant
//! values, attribute payloads). Each entry starts with an ECMA compressed
//! unsigned length followed by that many bytes of content.

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Read view over the `#Blob` heap.
///
/// Offset 0 always holds the empty blob. Table columns reference entries by
/// byte offset; the compressed length prefix at that offset determines how
/// many content bytes follow.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::metadata::streams::Blob;
/// let data = &[0u8, 0x03, 0x41, 0x42, 0x43];
/// let blob = Blob::from(data).unwrap();
/// assert_eq!(blob.get(1).unwrap(), &[0x41, 0x42, 0x43]);
/// ```
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Create a `Blob` view from heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap is empty or the leading null entry is missing
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob { data })
    }

    /// Resolve the blob starting at the given heap offset.
    ///
    /// # Errors
    /// Returns an error if the offset is out of bounds or the length prefix
    /// claims more bytes than the heap holds
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let mut data = vec![0u8];
        data.push(0x03);
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        data.push(0x81); // two-byte length: 0x0140
        data.push(0x40);
        data.extend_from_slice(&[0xEE; 0x140]);

        let blob = Blob::from(&data).unwrap();

        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(blob.get(5).unwrap().len(), 0x140);
    }

    #[test]
    fn truncated_entry() {
        let data = [0x00, 0x05, 0x41, 0x42];
        let blob = Blob::from(&data).unwrap();
        assert!(blob.get(1).is_err());
    }

    #[test]
    fn invalid() {
        assert!(Blob::from(&[]).is_err());
        assert!(Blob::from(&[0x01, 0x41]).is_err());

        let data = [0x00, 0x02, 0x41, 0x42];
        let blob = Blob::from(&data).unwrap();
        assert!(blob.get(100).is_err());
    }
}
