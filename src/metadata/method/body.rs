//! Decoding of CIL method body headers and exception sections.
//!
//! A method body starts with either a tiny header (one byte, code size up to
//! 63 bytes, default stack depth, no locals, no extra sections) or a fat
//! header (12 bytes with explicit max stack, local signature token and flags).
//! Fat bodies may be followed by 4-byte-aligned exception sections in a
//! compact or extended clause format.

use bitflags::bitflags;

use crate::{
    file::io::{read_le, read_le_at},
    metadata::method::{ExceptionHandler, ExceptionHandlerFlags},
    Error::OutOfBounds,
    Result,
};

/// Default operand stack depth for bodies without an explicit value.
pub const DEFAULT_MAX_STACK: u16 = 8;

/// Largest code size a tiny header can express.
pub const TINY_MAX_CODE_SIZE: usize = 63;

bitflags! {
    /// Flags of the fat method body header, including the two format bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Body uses the tiny one-byte header
        const TINY_FORMAT = 0x0002;
        /// Body uses the fat 12-byte header
        const FAT_FORMAT = 0x0003;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x0008;
        /// Zero-initialize all local variables on entry
        const INIT_LOCALS = 0x0010;
    }
}

bitflags! {
    /// Flags of one extra data section following the method code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Section holds exception handling clauses
        const EHTABLE = 0x01;
        /// Section uses the extended 24-byte clause format
        const FAT_FORMAT = 0x40;
        /// Another section follows this one
        const MORE_SECTS = 0x80;
    }
}

/// A decoded method body header with its exception regions.
///
/// The IL code itself is not copied; it lives at `size_header..size_header +
/// size_code` within the slice the body was decoded from.
pub struct MethodBody {
    /// IL code length in bytes
    pub size_code: usize,
    /// Header length in bytes, 1 for tiny and 12 for fat
    pub size_header: usize,
    /// `StandAloneSig` token describing the local variables, 0 if none
    pub local_var_sig_token: u32,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Whether the body uses the fat header
    pub is_fat: bool,
    /// Whether locals are zero-initialized on entry
    pub is_init_local: bool,
    /// Exception handling regions, in encounter order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Decode a method body starting at the header byte.
    ///
    /// # Errors
    /// Returns an error if the format bits are invalid or any declared size
    /// runs past the end of the data
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match first_byte & 0b11 {
            0b10 => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: DEFAULT_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            0b11 => Self::read_fat(data),
            _ => Err(malformed_error!(
                "Method header is neither fat nor tiny - {:#04X}",
                first_byte
            )),
        }
    }

    fn read_fat(data: &[u8]) -> Result<MethodBody> {
        if data.len() < 12 {
            return Err(OutOfBounds);
        }

        let first_duo = read_le::<u16>(data)?;
        let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
        let size_header = ((first_duo >> 12) * 4) as usize;
        if size_header < 12 {
            return Err(malformed_error!(
                "Fat header size below minimum - {}",
                size_header
            ));
        }

        let max_stack = read_le::<u16>(&data[2..])?;
        let size_code = read_le::<u32>(&data[4..])? as usize;
        let local_var_sig_token = read_le::<u32>(&data[8..])?;

        let Some(code_end) = size_header.checked_add(size_code) else {
            return Err(OutOfBounds);
        };
        if data.len() < code_end {
            return Err(OutOfBounds);
        }

        let mut exception_handlers = Vec::new();
        if flags.contains(MethodBodyFlags::MORE_SECTS) {
            Self::read_sections(data, code_end, &mut exception_handlers)?;
        }

        Ok(MethodBody {
            size_code,
            size_header,
            local_var_sig_token,
            max_stack,
            is_fat: true,
            is_init_local: flags.contains(MethodBodyFlags::INIT_LOCALS),
            exception_handlers,
        })
    }

    /// Walk the extra data sections after the code, collecting EH clauses.
    fn read_sections(
        data: &[u8],
        code_end: usize,
        handlers: &mut Vec<ExceptionHandler>,
    ) -> Result<()> {
        // Sections start at the next 4-byte boundary after the code
        let mut cursor = (code_end + 3) & !3;

        loop {
            if cursor + 4 > data.len() {
                return Err(OutOfBounds);
            }

            let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
            if !section_flags.contains(SectionFlags::EHTABLE) {
                return Err(malformed_error!(
                    "Extra data section is not an exception table"
                ));
            }

            if section_flags.contains(SectionFlags::FAT_FORMAT) {
                let section_size = (read_le::<u32>(&data[cursor..])? >> 8) as usize;
                if section_size < 4 || cursor + section_size > data.len() {
                    return Err(OutOfBounds);
                }

                let mut offset = cursor + 4;
                for _ in 0..(section_size - 4) / 24 {
                    #[allow(clippy::cast_possible_truncation)]
                    let flags = ExceptionHandlerFlags::from_bits_truncate(
                        read_le_at::<u32>(data, &mut offset)? as u16,
                    );
                    handlers.push(ExceptionHandler {
                        flags,
                        try_offset: read_le_at::<u32>(data, &mut offset)?,
                        try_length: read_le_at::<u32>(data, &mut offset)?,
                        handler_offset: read_le_at::<u32>(data, &mut offset)?,
                        handler_length: read_le_at::<u32>(data, &mut offset)?,
                        handler_data: read_le_at::<u32>(data, &mut offset)?,
                    });
                }

                cursor += section_size;
            } else {
                let section_size = read_le::<u8>(&data[cursor + 1..])? as usize;
                if section_size < 4 || cursor + section_size > data.len() {
                    return Err(OutOfBounds);
                }

                let mut offset = cursor + 4;
                for _ in 0..(section_size - 4) / 12 {
                    handlers.push(ExceptionHandler {
                        flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                            data,
                            &mut offset,
                        )?),
                        try_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                        try_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                        handler_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                        handler_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                        handler_data: read_le_at::<u32>(data, &mut offset)?,
                    });
                }

                cursor += section_size;
            }

            if !section_flags.contains(SectionFlags::MORE_SECTS) {
                return Ok(());
            }
        }
    }

    /// Full size of the body: header plus code, without trailing sections.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        // 4 bytes of code: ldc.i4.1, ldc.i4.2, add, ret
        let data = [0x04 << 2 | 0x02, 0x17, 0x18, 0x58, 0x2A];

        let body = MethodBody::from(&data).unwrap();
        assert!(!body.is_fat);
        assert_eq!(body.size_code, 4);
        assert_eq!(body.size_header, 1);
        assert_eq!(body.size(), 5);
        assert_eq!(body.max_stack, DEFAULT_MAX_STACK);
        assert_eq!(body.local_var_sig_token, 0);
        assert!(body.exception_handlers.is_empty());
    }

    #[test]
    fn fat() {
        let mut data = vec![
            0x13, 0x30, // fat, init locals, header size 3 dwords
            0x02, 0x00, // max stack
            0x03, 0x00, 0x00, 0x00, // code size
            0x01, 0x00, 0x00, 0x11, // local var sig token
        ];
        data.extend_from_slice(&[0x02, 0x03, 0x2A]); // ldarg.0, ldarg.1, ret

        let body = MethodBody::from(&data).unwrap();
        assert!(body.is_fat);
        assert!(body.is_init_local);
        assert_eq!(body.size_header, 12);
        assert_eq!(body.size_code, 3);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.local_var_sig_token, 0x1100_0001);
    }

    #[test]
    fn fat_with_compact_exception_section() {
        let mut data = vec![
            0x1B, 0x30, // fat, init locals, more sects
            0x01, 0x00, // max stack
            0x06, 0x00, 0x00, 0x00, // code size
            0x00, 0x00, 0x00, 0x00, // no locals
        ];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x2A, 0x00, 0x2A]); // code
        data.extend_from_slice(&[0x00, 0x00]); // align to 4

        data.push(0x01); // EHTABLE, compact
        data.push(16); // section size: 4 + 1 clause * 12
        data.extend_from_slice(&[0x00, 0x00]); // reserved
        data.extend_from_slice(&[0x00, 0x00]); // flags: typed catch
        data.extend_from_slice(&[0x00, 0x00]); // try offset
        data.push(0x03); // try length
        data.extend_from_slice(&[0x03, 0x00]); // handler offset
        data.push(0x03); // handler length
        data.extend_from_slice(&[0x05, 0x00, 0x00, 0x01]); // class token

        let body = MethodBody::from(&data).unwrap();
        assert_eq!(body.exception_handlers.len(), 1);

        let handler = &body.exception_handlers[0];
        assert_eq!(handler.flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!(handler.try_offset, 0);
        assert_eq!(handler.try_length, 3);
        assert_eq!(handler.handler_offset, 3);
        assert_eq!(handler.handler_length, 3);
        assert_eq!(handler.handler_data, 0x0100_0005);
    }

    #[test]
    fn fat_with_extended_exception_section() {
        let mut data = vec![
            0x0B, 0x30, // fat, more sects
            0x01, 0x00, // max stack
            0x04, 0x00, 0x00, 0x00, // code size
            0x00, 0x00, 0x00, 0x00, // no locals
        ];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x2A]); // code, already aligned

        data.push(0x41); // EHTABLE | FAT_FORMAT
        // section size 4 + 24 = 28, little-endian 3-byte length
        data.extend_from_slice(&[28, 0x00, 0x00]);
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]); // flags: finally
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // try offset
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]); // try length
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]); // handler offset
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]); // handler length
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // unused

        let body = MethodBody::from(&data).unwrap();
        assert_eq!(body.exception_handlers.len(), 1);

        let handler = &body.exception_handlers[0];
        assert_eq!(handler.flags, ExceptionHandlerFlags::FINALLY);
        assert_eq!(handler.try_length, 2);
        assert_eq!(handler.handler_offset, 2);
    }

    #[test]
    fn rejects_invalid_format() {
        assert!(MethodBody::from(&[0x00]).is_err());
        assert!(MethodBody::from(&[0x01]).is_err());
        assert!(MethodBody::from(&[]).is_err());
    }

    #[test]
    fn rejects_truncated_code() {
        // Tiny header claiming 10 bytes of code, only 2 present
        let data = [0x0A << 2 | 0x02, 0x00, 0x2A];
        assert!(MethodBody::from(&data).is_err());
    }
}
