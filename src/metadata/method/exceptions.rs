//! Exception handling clauses of CIL method bodies.

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Clause kind of an exception handling region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed catch clause; the clause carries the metadata token of the
        /// caught exception type.
        const EXCEPTION = 0x0000;
        /// A filter clause; the clause carries the IL offset of the filter code.
        const FILTER = 0x0001;
        /// A finally clause, which runs on both normal and exceptional exit.
        const FINALLY = 0x0002;
        /// A fault clause, which runs only on exceptional exit.
        const FAULT = 0x0004;
    }
}

/// One try/handler region of a method body.
///
/// All offsets and lengths are in bytes relative to the start of the IL code,
/// regardless of whether the region was encoded in the compact or the extended
/// clause format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler code
    pub handler_offset: u32,
    /// Length of the handler code
    pub handler_length: u32,
    /// Class token for typed clauses, filter code offset for filter clauses,
    /// unused otherwise
    pub handler_data: u32,
}

impl ExceptionHandler {
    /// Token of the caught exception type, for typed catch clauses.
    #[must_use]
    pub fn class_token(&self) -> Option<Token> {
        if self.flags.intersection(ExceptionHandlerFlags::FILTER
            | ExceptionHandlerFlags::FINALLY
            | ExceptionHandlerFlags::FAULT)
            .is_empty()
        {
            Some(Token::new(self.handler_data))
        } else {
            None
        }
    }

    /// IL offset of the filter code, for filter clauses.
    #[must_use]
    pub fn filter_offset(&self) -> Option<u32> {
        if self.flags.contains(ExceptionHandlerFlags::FILTER) {
            Some(self.handler_data)
        } else {
            None
        }
    }

    /// Whether this clause fits the compact 12-byte encoding.
    ///
    /// The compact form carries the try offset and handler offset as `u16` and
    /// both lengths as `u8`; any larger value forces the extended form.
    #[must_use]
    pub fn fits_compact(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}
