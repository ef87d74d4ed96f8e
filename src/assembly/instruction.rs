//! Decoded CIL instruction representation.

use crate::metadata::token::Token;

/// Operand encoding of an opcode, fixed per opcode by the ECMA instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand bytes follow the opcode
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate
    UInt8,
    /// Signed 16-bit immediate
    Int16,
    /// Unsigned 16-bit immediate
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit IEEE float immediate
    Float32,
    /// 64-bit IEEE float immediate
    Float64,
    /// 4-byte metadata or user-string token
    Token,
    /// Case count followed by that many 32-bit relative targets
    Switch,
}

/// Control flow effect of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Two successors, the branch target and the fall-through
    ConditionalBranch,
    /// One successor, the branch target
    UnconditionalBranch,
    /// One successor per case, plus the fall-through
    Switch,
    /// Call-family instruction whose stack effect depends on the callee
    /// signature
    Call,
    /// Terminates the instruction stream (`ret`, `endfinally`, `endfilter`,
    /// `jmp`)
    Return,
    /// Raises an exception (`throw`, `rethrow`)
    Throw,
}

/// A decoded immediate operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit value
    Int8(i8),
    /// Unsigned 8-bit value
    UInt8(u8),
    /// Signed 16-bit value
    Int16(i16),
    /// Unsigned 16-bit value
    UInt16(u16),
    /// Signed 32-bit value
    Int32(i32),
    /// Signed 64-bit value
    Int64(i64),
    /// 32-bit float value
    Float32(f32),
    /// 64-bit float value
    Float64(f64),
}

impl Immediate {
    /// The value as a signed 64-bit integer, for displacement arithmetic.
    ///
    /// Float immediates have no integer interpretation and yield 0; branch
    /// opcodes never carry float operands.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            Immediate::Int8(value) => i64::from(*value),
            Immediate::UInt8(value) => i64::from(*value),
            Immediate::Int16(value) => i64::from(*value),
            Immediate::UInt16(value) => i64::from(*value),
            Immediate::Int32(value) => i64::from(*value),
            Immediate::Int64(value) => *value,
            Immediate::Float32(_) | Immediate::Float64(_) => 0,
        }
    }
}

/// The operand of a decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Opcode takes no operand
    None,
    /// Immediate value
    Immediate(Immediate),
    /// Metadata or user-string token
    Token(Token),
    /// Switch case targets as relative displacements
    Switch(Vec<i32>),
}

/// Stack transition of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Slots removed from the evaluation stack
    pub pops: u8,
    /// Slots placed onto the evaluation stack
    pub pushes: u8,
    /// `pushes - pops`
    pub net_effect: i8,
}

/// One decoded CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the instruction within the IL stream
    pub offset: u32,
    /// Encoded size including opcode and operand bytes
    pub size: u32,
    /// Opcode byte; second byte for two-byte opcodes
    pub opcode: u8,
    /// `0xFE` for two-byte opcodes, 0 otherwise
    pub prefix: u8,
    /// Instruction mnemonic
    pub mnemonic: &'static str,
    /// Control flow effect
    pub flow_type: FlowType,
    /// Stack transition
    pub stack_behavior: StackBehavior,
    /// Decoded operand
    pub operand: Operand,
    /// Absolute IL offsets of branch or switch targets
    pub branch_targets: Vec<u32>,
}

impl Instruction {
    /// Whether this instruction ends a basic block.
    #[must_use]
    pub fn is_block_terminator(&self) -> bool {
        !matches!(self.flow_type, FlowType::Sequential | FlowType::Call)
    }
}
