//! CIL instruction stream support.
//!
//! The raw side lives in [`decoder`] and the opcode tables in
//! [`instructions`]; the authoring side is the [`InstructionBuffer`], which
//! holds tagged instruction records and produces byte layouts on demand. The
//! [`verifier`] walks a laid-out buffer's basic blocks to compute the stack
//! depth a method declares as `maxStack`, and [`MethodBodyBuilder`] assembles
//! the complete body with its header and exception sections.

mod body;
mod buffer;
mod decoder;
mod instruction;
pub mod instructions;
pub mod opcodes;
mod verifier;

pub use body::{ExceptionRegion, MethodBodyBuilder, RegionKind, COMPACT_MAX_CLAUSES};
pub use buffer::{DebugEventSink, InstructionBuffer, InstructionRecord, LabelId, Layout};
pub use decoder::{decode_instruction, decode_stream};
pub use instruction::{
    FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior,
};
pub use verifier::{verify_stack_depth, HandlerEntry};
