//! Named opcode byte values for the opcodes the codec treats specially.
//!
//! The full instruction set is described by the tables in
//! [`crate::assembly::instructions`]; these constants exist so control-flow
//! and encoding logic can match on opcode bytes by name.

/// Prefix byte introducing a two-byte opcode.
pub const PREFIX_FE: u8 = 0xFE;

/// `nop`
pub const NOP: u8 = 0x00;
/// `dup`
pub const DUP: u8 = 0x25;
/// `pop`
pub const POP: u8 = 0x26;
/// `jmp`
pub const JMP: u8 = 0x27;
/// `call`
pub const CALL: u8 = 0x28;
/// `calli`
pub const CALLI: u8 = 0x29;
/// `ret`
pub const RET: u8 = 0x2A;
/// `br.s`, first of the short branch range
pub const BR_S: u8 = 0x2B;
/// `blt.un.s`, last of the short branch range
pub const BLT_UN_S: u8 = 0x37;
/// `br`, first of the long branch range
pub const BR: u8 = 0x38;
/// `blt.un`, last of the long branch range
pub const BLT_UN: u8 = 0x44;
/// `switch`
pub const SWITCH: u8 = 0x45;
/// `callvirt`
pub const CALLVIRT: u8 = 0x6F;
/// `ldstr`
pub const LDSTR: u8 = 0x72;
/// `newobj`
pub const NEWOBJ: u8 = 0x73;
/// `throw`
pub const THROW: u8 = 0x7A;
/// `endfinally`
pub const ENDFINALLY: u8 = 0xDC;
/// `leave`
pub const LEAVE: u8 = 0xDD;
/// `leave.s`
pub const LEAVE_S: u8 = 0xDE;

/// `endfilter` (after the `0xFE` prefix)
pub const ENDFILTER_FE: u8 = 0x11;
/// `rethrow` (after the `0xFE` prefix)
pub const RETHROW_FE: u8 = 0x1A;

/// Whether the opcode byte is a branch with a label operand, in either form.
#[must_use]
pub fn is_branch(opcode: u8) -> bool {
    matches!(opcode, BR_S..=BLT_UN | LEAVE | LEAVE_S)
}

/// Whether the opcode byte is a call-family instruction.
#[must_use]
pub fn is_call(opcode: u8) -> bool {
    matches!(opcode, CALL | CALLI | CALLVIRT | NEWOBJ)
}
