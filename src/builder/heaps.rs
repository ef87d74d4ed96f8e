//! Deduplicating heap builders for the write side.
//!
//! Each builder accumulates one heap's bytes in its final on-disk encoding
//! and hands out the offset (or, for `#US`, the token) a table column stores.
//! Content is deduplicated: adding the same value twice returns the same
//! offset without growing the heap. [`HeapManager`] gathers the four builders
//! and derives the `HeapSizes` flag byte once all content is collected, so
//! index widths are frozen before any table row is serialized.

use std::collections::HashMap;

use widestring::U16String;

use crate::{
    file::io::write_compressed_uint,
    metadata::token::Token,
    Error::EncodeOverflow,
    Result,
};

/// Large-heap flag: `#Strings` indexes are 4 bytes.
pub const HEAP_SIZES_STRINGS: u8 = 0x01;
/// Large-heap flag: `#GUID` indexes are 4 bytes.
pub const HEAP_SIZES_GUID: u8 = 0x02;
/// Large-heap flag: `#Blob` indexes are 4 bytes.
pub const HEAP_SIZES_BLOB: u8 = 0x04;

fn heap_offset(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| EncodeOverflow(format!("{what} heap exceeds 4 GiB")))
}

/// Builder for the `#Strings` heap of null-terminated UTF-8 identifiers.
///
/// Offset 0 is the mandatory empty entry; adding `""` returns 0 without
/// growing the heap.
pub struct StringsHeapBuilder {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for StringsHeapBuilder {
    fn default() -> Self {
        StringsHeapBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }
}

impl StringsHeapBuilder {
    /// Create an empty builder holding only the null entry.
    #[must_use]
    pub fn new() -> Self {
        StringsHeapBuilder::default()
    }

    /// Add a string, returning its heap offset.
    ///
    /// # Errors
    /// Returns an error if the string contains an interior null byte or the
    /// heap outgrows the offset space
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }
        if value.bytes().any(|byte| byte == 0) {
            return Err(crate::Error::InvalidOperand(format!(
                "identifier string {value:?} contains a null byte"
            )));
        }

        let offset = heap_offset(self.data.len(), "#Strings")?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.offsets.insert(value.to_string(), offset);
        Ok(offset)
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The accumulated heap bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Builder for the `#Blob` heap of length-prefixed binary entries.
pub struct BlobHeapBuilder {
    data: Vec<u8>,
    offsets: HashMap<Vec<u8>, u32>,
}

impl Default for BlobHeapBuilder {
    fn default() -> Self {
        BlobHeapBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }
}

impl BlobHeapBuilder {
    /// Create an empty builder holding only the null entry.
    #[must_use]
    pub fn new() -> Self {
        BlobHeapBuilder::default()
    }

    /// Add a blob, returning its heap offset. The empty blob is offset 0.
    ///
    /// # Errors
    /// Returns an error if the blob is too large for a compressed length
    /// prefix or the heap outgrows the offset space
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }

        let offset = heap_offset(self.data.len(), "#Blob")?;
        let length = u32::try_from(value.len())
            .map_err(|_| EncodeOverflow(format!("blob of {} bytes", value.len())))?;
        write_compressed_uint(&mut self.data, length)?;
        self.data.extend_from_slice(value);
        self.offsets.insert(value.to_vec(), offset);
        Ok(offset)
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The accumulated heap bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Builder for the `#GUID` heap, a flat array of 16-byte entries indexed
/// 1-based by ordinal.
#[derive(Default)]
pub struct GuidHeapBuilder {
    data: Vec<u8>,
    indices: HashMap<[u8; 16], u32>,
}

impl GuidHeapBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        GuidHeapBuilder::default()
    }

    /// Add a GUID, returning its 1-based heap index.
    #[must_use]
    pub fn add(&mut self, guid: uguid::Guid) -> u32 {
        let bytes = guid.to_bytes();
        if let Some(index) = self.indices.get(&bytes) {
            return *index;
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = (self.data.len() / 16) as u32 + 1;
        self.data.extend_from_slice(&bytes);
        self.indices.insert(bytes, index);
        index
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The accumulated heap bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Builder for the `#US` heap of `ldstr` string literals.
///
/// Entries are UTF-16LE with a compressed length prefix counting the code
/// unit bytes plus one trailing flag byte. Returned tokens carry the `0x70`
/// pseudo-table tag with the heap offset in the low 24 bits.
pub struct UserStringHeapBuilder {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for UserStringHeapBuilder {
    fn default() -> Self {
        UserStringHeapBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }
}

impl UserStringHeapBuilder {
    /// Create an empty builder holding only the null entry.
    #[must_use]
    pub fn new() -> Self {
        UserStringHeapBuilder::default()
    }

    /// Add a string literal, returning its `0x70`-tagged token.
    ///
    /// # Errors
    /// Returns an error if the entry would push the heap past the 24-bit
    /// offset space a token can address
    pub fn add(&mut self, value: &str) -> Result<Token> {
        if value.is_empty() {
            return Ok(Token::new(0x7000_0000));
        }
        if let Some(offset) = self.offsets.get(value) {
            return Ok(Token::new(0x7000_0000 | *offset));
        }

        let offset = heap_offset(self.data.len(), "#US")?;
        if offset > 0x00FF_FFFF {
            return Err(EncodeOverflow(
                "#US heap exceeds the 24-bit token offset space".into(),
            ));
        }

        let units = U16String::from_str(value);
        let byte_length = u32::try_from(units.len() * 2 + 1)
            .map_err(|_| EncodeOverflow(format!("user string of {} code units", units.len())))?;
        write_compressed_uint(&mut self.data, byte_length)?;
        for unit in units.as_slice() {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(needs_handling_flag(units.as_slice()));

        self.offsets.insert(value.to_string(), offset);
        Ok(Token::new(0x7000_0000 | offset))
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The accumulated heap bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// ECMA-335 II.24.2.4: the trailing byte is 1 when any code unit falls
/// outside the simple ASCII range runtimes can compare bytewise.
fn needs_handling_flag(units: &[u16]) -> u8 {
    let special = units.iter().any(|unit| {
        *unit > 0x7F
            || matches!(
                *unit,
                0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F
            )
    });
    u8::from(special)
}

/// The four heap builders of one container under construction.
#[derive(Default)]
pub struct HeapManager {
    /// `#Strings` builder
    pub strings: StringsHeapBuilder,
    /// `#Blob` builder
    pub blob: BlobHeapBuilder,
    /// `#GUID` builder
    pub guid: GuidHeapBuilder,
    /// `#US` builder
    pub user_strings: UserStringHeapBuilder,
}

impl HeapManager {
    /// Create a manager with four empty heaps.
    #[must_use]
    pub fn new() -> Self {
        HeapManager::default()
    }

    /// `true` if `#Strings` offsets need 4 bytes.
    #[must_use]
    pub fn large_strings(&self) -> bool {
        self.strings.size() > 0xFFFF
    }

    /// `true` if `#GUID` indexes need 4 bytes.
    #[must_use]
    pub fn large_guid(&self) -> bool {
        self.guid.size() > 0xFFFF
    }

    /// `true` if `#Blob` offsets need 4 bytes.
    #[must_use]
    pub fn large_blob(&self) -> bool {
        self.blob.size() > 0xFFFF
    }

    /// The `HeapSizes` byte of the `#~` stream header.
    ///
    /// Valid only once collection is complete; adding more content after
    /// reading the flags can invalidate the width decision.
    #[must_use]
    pub fn heap_size_flags(&self) -> u8 {
        let mut flags = 0;
        if self.large_strings() {
            flags |= HEAP_SIZES_STRINGS;
        }
        if self.large_guid() {
            flags |= HEAP_SIZES_GUID;
        }
        if self.large_blob() {
            flags |= HEAP_SIZES_BLOB;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::streams::{Blob, Guid, Strings, UserStrings};

    #[test]
    fn strings_dedup_and_roundtrip() {
        let mut builder = StringsHeapBuilder::new();
        let first = builder.add("Program").unwrap();
        let second = builder.add("Main").unwrap();
        let again = builder.add("Program").unwrap();

        assert_eq!(first, 1);
        assert_eq!(first, again);
        assert_ne!(first, second);
        assert_eq!(builder.add("").unwrap(), 0);

        let heap = Strings::from(builder.bytes()).unwrap();
        assert_eq!(heap.get(first as usize).unwrap(), "Program");
        assert_eq!(heap.get(second as usize).unwrap(), "Main");
        assert_eq!(heap.get(0).unwrap(), "");
    }

    #[test]
    fn strings_reject_interior_null() {
        let mut builder = StringsHeapBuilder::new();
        assert!(builder.add("bad\0name").is_err());
    }

    #[test]
    fn blob_dedup_and_roundtrip() {
        let mut builder = BlobHeapBuilder::new();
        let sig = builder.add(&[0x20, 0x00, 0x01]).unwrap();
        let same = builder.add(&[0x20, 0x00, 0x01]).unwrap();
        let other = builder.add(&[0x06, 0x08]).unwrap();

        assert_eq!(sig, same);
        assert_ne!(sig, other);
        assert_eq!(builder.add(&[]).unwrap(), 0);

        let heap = Blob::from(builder.bytes()).unwrap();
        assert_eq!(heap.get(sig as usize).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(heap.get(other as usize).unwrap(), &[0x06, 0x08]);
    }

    #[test]
    fn blob_long_entry_uses_wide_prefix() {
        let mut builder = BlobHeapBuilder::new();
        let payload = vec![0xAB; 0x90]; // needs the 2-byte compressed form
        let offset = builder.add(&payload).unwrap();

        let heap = Blob::from(builder.bytes()).unwrap();
        assert_eq!(heap.get(offset as usize).unwrap(), payload.as_slice());
    }

    #[test]
    fn guid_indexes_are_ordinal() {
        let mut builder = GuidHeapBuilder::new();
        let mvid = uguid::guid!("12345678-1234-5678-1234-567812345678");
        let other = uguid::guid!("87654321-4321-8765-4321-876543218765");

        assert_eq!(builder.add(mvid), 1);
        assert_eq!(builder.add(other), 2);
        assert_eq!(builder.add(mvid), 1);
        assert_eq!(builder.size(), 32);

        let heap = Guid::from(builder.bytes()).unwrap();
        assert_eq!(heap.get(1).unwrap(), mvid);
        assert_eq!(heap.get(2).unwrap(), other);
    }

    #[test]
    fn user_strings_token_roundtrip() {
        let mut builder = UserStringHeapBuilder::new();
        let token = builder.add("Hello, World!").unwrap();
        let again = builder.add("Hello, World!").unwrap();

        assert_eq!(token.table(), 0x70);
        assert_eq!(token, again);
        assert_eq!(builder.add("").unwrap().value(), 0x7000_0000);

        let heap = UserStrings::from(builder.bytes()).unwrap();
        assert_eq!(
            heap.get(token.row() as usize).unwrap().to_string_lossy(),
            "Hello, World!"
        );
    }

    #[test]
    fn user_strings_flag_byte() {
        let mut builder = UserStringHeapBuilder::new();
        let ascii = builder.add("plain").unwrap();
        let wide = builder.add("héllo").unwrap();

        let ascii_entry = UserStrings::from(builder.bytes())
            .unwrap()
            .get_raw(ascii.row() as usize)
            .unwrap();
        assert_eq!(*ascii_entry.last().unwrap(), 0);

        let wide_entry = UserStrings::from(builder.bytes())
            .unwrap()
            .get_raw(wide.row() as usize)
            .unwrap();
        assert_eq!(*wide_entry.last().unwrap(), 1);
    }

    #[test]
    fn heap_size_flags_follow_final_sizes() {
        let mut manager = HeapManager::new();
        assert_eq!(manager.heap_size_flags(), 0);

        // Push #Strings past the 2-byte index range
        let mut name = String::new();
        for index in 0..4000 {
            name.clear();
            name.push_str("very_long_identifier_name_for_width_testing_");
            name.push_str(&index.to_string());
            manager.strings.add(&name).unwrap();
        }

        assert!(manager.large_strings());
        assert_eq!(manager.heap_size_flags(), HEAP_SIZES_STRINGS);
        assert!(!manager.large_blob());
    }
}
