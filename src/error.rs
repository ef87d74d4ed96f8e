use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all failure modes of reading and writing CIL metadata containers:
/// binary parsing, reference resolution, instruction-buffer authoring, layout encoding,
/// and stack-depth verification. Each variant carries the context needed to act on the
/// failure.
///
/// # Error Categories
///
/// ## Container Parsing Errors
/// - [`Error::InvalidOffset`] - Invalid file offset during parsing
/// - [`Error::Malformed`] - Corrupted or invalid container structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::NotSupported`] - Unsupported container feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
///
/// ## Resolution Errors
/// - [`Error::UnresolvedReference`] - Token or coded index pointing at an absent row
///
/// ## Authoring Errors
/// - [`Error::InvalidOperand`] - Operand kind does not match the opcode
/// - [`Error::DuplicateLabel`] / [`Error::UndefinedLabel`] / [`Error::UnplacedLabel`] -
///   Label lifecycle misuse
/// - [`Error::BranchOutOfRange`] - A branch displacement exceeds the long form
/// - [`Error::EncodeOverflow`] - A structural field exceeds its widest encodable range
///
/// ## Verification Errors
/// - [`Error::StackInconsistent`] - Two control-flow paths disagree on stack depth (hard)
/// - [`Error::StackUnknowable`] - Depth could not be determined (soft, caller may fall
///   back to a conservative default)
#[derive(Error, Debug)]
pub enum Error {
    /// Encountered an invalid offset while parsing file structures.
    ///
    /// Raised when an RVA or stream offset does not translate to a valid
    /// location inside the container.
    #[error("Could not retrieve a valid offset!")]
    InvalidOffset,

    /// The container is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the container.
    ///
    /// Safety check preventing buffer overruns during decode.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This container feature is not supported.
    ///
    /// Raised for inputs that are not CIL PE executables, or that carry
    /// metadata tables this library does not materialize.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// A token or coded index refers to a row that does not exist.
    ///
    /// Raised by the resolve pass after table decode; a container with a
    /// dangling reference cannot produce a usable graph.
    #[error("Unresolvable reference - {0}")]
    UnresolvedReference(Token),

    /// An instruction was given an operand of the wrong kind, or a required
    /// operand was missing.
    ///
    /// Producer-API misuse is reported at the call site, never deferred.
    #[error("Invalid operand - {0}")]
    InvalidOperand(String),

    /// A label was placed more than once in the same instruction buffer.
    #[error("Label placed more than once - {0}")]
    DuplicateLabel(u32),

    /// A label id was used that this buffer never created.
    #[error("Unknown label - {0}")]
    UndefinedLabel(u32),

    /// Layout was requested while a referenced label was never placed.
    #[error("Label referenced but never placed - {0}")]
    UnplacedLabel(u32),

    /// A branch displacement exceeds the 32-bit long form.
    #[error("Branch displacement out of range at IL offset 0x{offset:04X}")]
    BranchOutOfRange {
        /// Byte offset of the branch instruction
        offset: u32,
    },

    /// A structural value exceeds the widest form its encoding allows.
    ///
    /// Examples: a branch displacement outside `i32` range, or an exception
    /// clause field beyond the extended 24-byte clause layout.
    #[error("Value exceeds encodable range - {0}")]
    EncodeOverflow(String),

    /// Two control-flow paths reach the same basic block with different
    /// evaluation-stack depths.
    ///
    /// This is a hard error reporting the offending block's byte offset; it
    /// is never silently patched.
    #[error("Inconsistent stack depth at IL offset 0x{offset:04X}")]
    StackInconsistent {
        /// Byte offset of the basic block reached with conflicting depths
        offset: u32,
    },

    /// The stack-depth verifier could not complete its analysis.
    ///
    /// Soft counterpart of [`Error::StackInconsistent`]: callers that only
    /// need a `maxStack` value may substitute a conservative default.
    #[error("Could not determine stack depth - {0}")]
    StackUnknowable(String),
}
