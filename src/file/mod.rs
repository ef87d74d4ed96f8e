//! PE container access: backends, section directory and RVA translation.
//!
//! [`crate::file::File`] wraps a loaded container (memory-mapped or in-memory)
//! together with the facts this crate needs from its PE envelope: the section
//! directory for RVA↔offset translation and the CLR runtime header location.
//! The envelope itself is parsed once with goblin at load time; everything the
//! metadata layers touch afterwards goes through bounds-checked slices of the
//! raw data.

use std::path::Path;

use goblin::pe::{section_table::SectionTable, PE};

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};

pub(crate) mod io;
mod memory;
pub(crate) mod parser;
mod physical;

use memory::Memory;
use physical::Physical;

/// Data source for a loaded container.
///
/// Implemented by the memory-mapped and in-memory backends; provides
/// bounds-checked access to the raw bytes.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire underlying data.
    fn data(&self) -> &[u8];

    /// Returns the length of the underlying data.
    fn len(&self) -> usize;
}

/// A loaded CIL PE container.
///
/// Owns the raw bytes and the parsed section directory. All address
/// translation between RVAs and file offsets happens here; the metadata
/// layers only ever see file offsets.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::File;
/// use std::path::Path;
///
/// let file = File::from_file(Path::new("library.dll"))?;
/// let (clr_rva, clr_size) = file.clr();
/// let clr_offset = file.rva_to_offset(clr_rva)?;
/// let header = file.data_slice(clr_offset, clr_size)?;
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// Section directory, copied out of the PE header at load time.
    sections: Vec<SectionTable>,
    /// CLR runtime header data directory: (rva, size).
    clr: (usize, usize),
    /// Preferred load address from the optional header.
    imagebase: u64,
}

impl File {
    /// Loads a PE container from the given path, memory-mapping it.
    ///
    /// # Arguments
    /// * `file` - Path to the PE file on disk
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a valid PE, or
    /// carries no CLR runtime header directory.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE container from a memory buffer.
    ///
    /// # Arguments
    /// * `data` - The bytes of the PE file
    ///
    /// # Errors
    /// Returns an error if the buffer is empty, not a valid PE, or carries
    /// no CLR runtime header directory.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    /// Internal loader for any backend.
    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let (sections, clr, imagebase) = match PE::parse(data.data()) {
            Ok(pe) => match pe.header.optional_header {
                Some(optional_header) => {
                    match optional_header.data_directories.get_clr_runtime_header() {
                        Some(clr_dir) => (
                            pe.sections,
                            (clr_dir.virtual_address as usize, clr_dir.size as usize),
                            optional_header.windows_fields.image_base,
                        ),
                        None => {
                            return Err(malformed_error!(
                                "File does not have a CLR runtime header directory"
                            ))
                        }
                    }
                }
                None => return Err(malformed_error!("File does not have an OptionalHeader")),
            },
            Err(error) => return Err(GoblinErr(error)),
        };

        Ok(File {
            data: Box::new(data),
            sections,
            clr,
            imagebase,
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the preferred load address from the optional header.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.imagebase
    }

    /// Returns the CLR runtime header data directory as `(rva, size)`.
    #[must_use]
    pub fn clr(&self) -> (usize, usize) {
        self.clr
    }

    /// Returns an iterator over the section headers of the PE file.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.sections.iter()
    }

    /// Returns the entire raw data of the container.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns a bounds-checked slice of the raw data.
    ///
    /// # Arguments
    /// * `offset` - Starting file offset
    /// * `len` - Length of the slice in bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Converts a relative virtual address to a file offset via the section directory.
    ///
    /// # Arguments
    /// * `rva` - The RVA to convert
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the RVA falls outside every section.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        let rva_u32 =
            u32::try_from(rva).map_err(|_| malformed_error!("RVA too large: {}", rva))?;

        for section in &self.sections {
            let Some(section_max) = section.virtual_address.checked_add(section.virtual_size)
            else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    section.virtual_address,
                    section.virtual_size
                ));
            };

            if section.virtual_address <= rva_u32 && section_max > rva_u32 {
                return Ok((rva - section.virtual_address as usize)
                    + section.pointer_to_raw_data as usize);
            }
        }

        Err(malformed_error!(
            "RVA could not be converted to offset - {}",
            rva
        ))
    }

    /// Converts a file offset back to a relative virtual address.
    ///
    /// Inverse of [`File::rva_to_offset`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the offset falls outside every section.
    pub fn offset_to_rva(&self, offset: usize) -> Result<usize> {
        let offset_u32 =
            u32::try_from(offset).map_err(|_| malformed_error!("Offset too large: {}", offset))?;

        for section in &self.sections {
            let Some(section_max) = section
                .pointer_to_raw_data
                .checked_add(section.size_of_raw_data)
            else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    section.pointer_to_raw_data,
                    section.size_of_raw_data
                ));
            };

            if section.pointer_to_raw_data <= offset_u32 && section_max > offset_u32 {
                return Ok((offset - section.pointer_to_raw_data as usize)
                    + section.virtual_address as usize);
            }
        }

        Err(malformed_error!(
            "Offset could not be converted to RVA - {}",
            offset
        ))
    }
}
