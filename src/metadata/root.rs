//! Metadata root header and stream directory.
//!
//! The metadata root is the entry point of the physical metadata blob inside a
//! PE image. It starts with the `BSJB` signature, carries a null-padded
//! version string, and ends with a directory of stream headers whose offsets
//! are relative to the start of the root itself.

use crate::{
    file::io::{read_le, read_le_at},
    Error::OutOfBounds,
    Result,
};

/// Magic signature for physical metadata, "BSJB" in little-endian byte order.
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Names a metadata stream may legally carry.
const VALID_STREAM_NAMES: [&str; 5] = ["#~", "#Strings", "#US", "#Blob", "#GUID"];

/// One entry of the stream directory.
///
/// The header length is not fixed: the name is a null-terminated string padded
/// to a 4-byte boundary.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    /// Stream start, relative to the metadata root
    pub offset: u32,
    /// Stream size in bytes
    pub size: u32,
    /// Stream name, e.g. `#~` or `#Strings`
    pub name: String,
}

impl StreamHeader {
    /// Read a stream header from the given bytes.
    ///
    /// # Errors
    /// Returns an error if the data is too short or the name is not one of the
    /// five defined stream names
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(OutOfBounds);
        }

        let name_bytes = &data[8..];
        let name_len = name_bytes
            .iter()
            .take(32)
            .position(|byte| *byte == 0)
            .ok_or_else(|| malformed_error!("Unterminated stream header name"))?;

        let name = std::str::from_utf8(&name_bytes[..name_len])
            .map_err(|_| malformed_error!("Stream header name is not valid UTF-8"))?
            .to_string();

        if !VALID_STREAM_NAMES.contains(&name.as_str()) {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Size of this header on disk: offset, size, and the name padded to 4 bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        8 + (((self.name.len() + 1) + 3) & !3)
    }
}

/// The metadata root header with its stream directory.
///
/// Parsing the root is the first step of reading a container; each stream
/// header then locates one heap or the `#~` tables stream within the blob.
pub struct Root {
    /// Magic signature, [`METADATA_SIGNATURE`]
    pub signature: u32,
    /// `MajorVersion`, typically 1
    pub major_version: u16,
    /// `MinorVersion`, typically 1
    pub minor_version: u16,
    /// Reserved, always 0
    pub reserved: u32,
    /// Bytes allocated for the version string, including null padding
    pub length: u32,
    /// Version string with padding trimmed
    pub version: String,
    /// Reserved flags, always 0
    pub flags: u16,
    /// Number of streams
    pub stream_number: u16,
    /// The stream directory
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Read a metadata root from the start of the metadata blob.
    ///
    /// # Errors
    /// Returns an error if the signature does not match, the version string or
    /// stream directory runs past the end of the data, or a stream range is
    /// out of bounds
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 20 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != METADATA_SIGNATURE {
            return Err(malformed_error!(
                "Metadata signature does not match - {:#010X}",
                signature
            ));
        }

        let version_length = read_le::<u32>(&data[12..])? as usize;
        let Some(version_end) = version_length.checked_add(16) else {
            return Err(malformed_error!(
                "Version string length causes integer overflow - {}",
                version_length
            ));
        };
        if version_end + 4 > data.len() {
            return Err(OutOfBounds);
        }

        let version_bytes = &data[16..version_end];
        let trimmed = match version_bytes.iter().position(|byte| *byte == 0) {
            Some(null_pos) => &version_bytes[..null_pos],
            None => version_bytes,
        };
        let version = std::str::from_utf8(trimmed)
            .map_err(|_| malformed_error!("Version string is not valid UTF-8"))?
            .to_string();

        let mut offset = version_end;
        let flags = read_le_at::<u16>(data, &mut offset)?;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;
        if stream_count == 0 || stream_count > 5 {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut streams = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            if offset > data.len() {
                return Err(OutOfBounds);
            }

            let header = StreamHeader::from(&data[offset..])?;
            let Some(range_end) = header.offset.checked_add(header.size) else {
                return Err(malformed_error!(
                    "Stream offset and size cause integer overflow - {} + {}",
                    header.offset,
                    header.size
                ));
            };
            if range_end as usize > data.len() {
                return Err(OutOfBounds);
            }

            offset += header.byte_size();
            streams.push(header);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length: u32::try_from(version_length)
                .map_err(|_| malformed_error!("Version string length too large"))?,
            flags,
            stream_number: stream_count,
            stream_headers: streams,
            version,
        })
    }

    /// Find a stream header by name.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers
            .iter()
            .find(|header| header.name == name)
    }
}
