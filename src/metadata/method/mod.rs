//! Method body headers and exception handling regions.

mod body;
mod exceptions;

pub use body::{MethodBody, MethodBodyFlags, SectionFlags, DEFAULT_MAX_STACK, TINY_MAX_CODE_SIZE};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
