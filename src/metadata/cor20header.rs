//! CLR runtime header (cor20) parsing.
//!
//! The cor20 header sits at the start of the COM descriptor data directory of
//! a PE image and locates the metadata blob, the entry point and the managed
//! resources.

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Flag bit: image contains only IL code.
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;

/// The CLR runtime header of a managed PE image.
pub struct Cor20Header {
    /// Size of the header in bytes, always 72
    pub cb: u32,
    /// Minimum runtime major version required to run this image
    pub major_runtime_version: u16,
    /// Minor portion of the required runtime version
    pub minor_runtime_version: u16,
    /// RVA of the metadata blob
    pub meta_data_rva: u32,
    /// Size of the metadata blob
    pub meta_data_size: u32,
    /// Runtime flags, e.g. [`COMIMAGE_FLAGS_ILONLY`]
    pub flags: u32,
    /// `MethodDef` or File token of the image entry point, 0 if none
    pub entry_point_token: u32,
    /// RVA of the managed resources
    pub resource_rva: u32,
    /// Size of the managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature hash
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature hash
    pub strong_name_signature_size: u32,
    /// Reserved, always 0
    pub code_manager_table_rva: u32,
    /// Reserved, always 0
    pub code_manager_table_size: u32,
    /// RVA of the vtable fixup array
    pub vtable_fixups_rva: u32,
    /// Size of the vtable fixup array
    pub vtable_fixups_size: u32,
    /// Reserved, always 0
    pub export_address_table_jmp_rva: u32,
    /// Reserved, always 0
    pub export_address_table_jmp_size: u32,
    /// Reserved, always 0
    pub managed_native_header_rva: u32,
    /// Reserved, always 0
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// Read a cor20 header from the given bytes.
    ///
    /// # Errors
    /// Returns an error if the data is too short, the declared size is not 72,
    /// or the metadata RVA or size is zero
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < 72 {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != 72 {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Image has no metadata"));
        }

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags: parser.read_le::<u32>()?,
            entry_point_token: parser.read_le::<u32>()?,
            resource_rva: parser.read_le::<u32>()?,
            resource_size: parser.read_le::<u32>()?,
            strong_name_signature_rva: parser.read_le::<u32>()?,
            strong_name_signature_size: parser.read_le::<u32>()?,
            code_manager_table_rva: parser.read_le::<u32>()?,
            code_manager_table_size: parser.read_le::<u32>()?,
            vtable_fixups_rva: parser.read_le::<u32>()?,
            vtable_fixups_size: parser.read_le::<u32>()?,
            export_address_table_jmp_rva: parser.read_le::<u32>()?,
            export_address_table_jmp_size: parser.read_le::<u32>()?,
            managed_native_header_rva: parser.read_le::<u32>()?,
            managed_native_header_size: parser.read_le::<u32>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let mut data = vec![0u8; 72];
        data[0] = 72; // cb
        data[4] = 2; // major runtime version
        data[8..12].copy_from_slice(&0x2060_u32.to_le_bytes()); // metadata rva
        data[12..16].copy_from_slice(&0x400_u32.to_le_bytes()); // metadata size
        data[16] = 0x01; // IL only
        data[20..24].copy_from_slice(&0x0600_0001_u32.to_le_bytes()); // entry point

        let header = Cor20Header::read(&data).unwrap();
        assert_eq!(header.cb, 72);
        assert_eq!(header.major_runtime_version, 2);
        assert_eq!(header.meta_data_rva, 0x2060);
        assert_eq!(header.meta_data_size, 0x400);
        assert_eq!(header.flags, COMIMAGE_FLAGS_ILONLY);
        assert_eq!(header.entry_point_token, 0x0600_0001);
    }

    #[test]
    fn rejects_bad_size() {
        let mut data = vec![0u8; 72];
        data[0] = 64;
        assert!(Cor20Header::read(&data).is_err());
        assert!(Cor20Header::read(&data[..40]).is_err());
    }

    #[test]
    fn rejects_missing_metadata() {
        let mut data = vec![0u8; 72];
        data[0] = 72;
        data[4] = 2;
        assert!(Cor20Header::read(&data).is_err());
    }
}
