//! Const opcode metadata tables for the CIL instruction set.
//!
//! One entry per opcode byte: mnemonic, operand encoding, control flow
//! effect, and the fixed stack transition. Reserved opcode values carry an
//! empty mnemonic and are rejected by the decoder. Call-family opcodes have
//! no fixed stack transition; their effect comes from the callee signature
//! and is supplied explicitly when authoring.

use crate::assembly::instruction::{FlowType, OperandType};

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    /// Instruction mnemonic, empty for reserved opcode values
    pub mnemonic: &'static str,
    /// Operand encoding
    pub operand: OperandType,
    /// Control flow effect
    pub flow: FlowType,
    /// Slots removed from the evaluation stack
    pub pops: u8,
    /// Slots placed onto the evaluation stack
    pub pushes: u8,
}

const fn op(
    mnemonic: &'static str,
    operand: OperandType,
    flow: FlowType,
    pops: u8,
    pushes: u8,
) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operand,
        flow,
        pops,
        pushes,
    }
}

const RESERVED: OpcodeInfo = op("", OperandType::None, FlowType::Sequential, 0, 0);

use FlowType::{Call, ConditionalBranch, Return, Sequential, Switch, Throw, UnconditionalBranch};
use OperandType as Ot;

/// One-byte opcode table, indexed by the opcode byte.
#[rustfmt::skip]
pub static OPCODES: [OpcodeInfo; 256] = {
    let mut table = [RESERVED; 256];
    table[0x00] = op("nop", Ot::None, Sequential, 0, 0);
    table[0x01] = op("break", Ot::None, Sequential, 0, 0);
    table[0x02] = op("ldarg.0", Ot::None, Sequential, 0, 1);
    table[0x03] = op("ldarg.1", Ot::None, Sequential, 0, 1);
    table[0x04] = op("ldarg.2", Ot::None, Sequential, 0, 1);
    table[0x05] = op("ldarg.3", Ot::None, Sequential, 0, 1);
    table[0x06] = op("ldloc.0", Ot::None, Sequential, 0, 1);
    table[0x07] = op("ldloc.1", Ot::None, Sequential, 0, 1);
    table[0x08] = op("ldloc.2", Ot::None, Sequential, 0, 1);
    table[0x09] = op("ldloc.3", Ot::None, Sequential, 0, 1);
    table[0x0A] = op("stloc.0", Ot::None, Sequential, 1, 0);
    table[0x0B] = op("stloc.1", Ot::None, Sequential, 1, 0);
    table[0x0C] = op("stloc.2", Ot::None, Sequential, 1, 0);
    table[0x0D] = op("stloc.3", Ot::None, Sequential, 1, 0);
    table[0x0E] = op("ldarg.s", Ot::UInt8, Sequential, 0, 1);
    table[0x0F] = op("ldarga.s", Ot::UInt8, Sequential, 0, 1);
    table[0x10] = op("starg.s", Ot::UInt8, Sequential, 1, 0);
    table[0x11] = op("ldloc.s", Ot::UInt8, Sequential, 0, 1);
    table[0x12] = op("ldloca.s", Ot::UInt8, Sequential, 0, 1);
    table[0x13] = op("stloc.s", Ot::UInt8, Sequential, 1, 0);
    table[0x14] = op("ldnull", Ot::None, Sequential, 0, 1);
    table[0x15] = op("ldc.i4.m1", Ot::None, Sequential, 0, 1);
    table[0x16] = op("ldc.i4.0", Ot::None, Sequential, 0, 1);
    table[0x17] = op("ldc.i4.1", Ot::None, Sequential, 0, 1);
    table[0x18] = op("ldc.i4.2", Ot::None, Sequential, 0, 1);
    table[0x19] = op("ldc.i4.3", Ot::None, Sequential, 0, 1);
    table[0x1A] = op("ldc.i4.4", Ot::None, Sequential, 0, 1);
    table[0x1B] = op("ldc.i4.5", Ot::None, Sequential, 0, 1);
    table[0x1C] = op("ldc.i4.6", Ot::None, Sequential, 0, 1);
    table[0x1D] = op("ldc.i4.7", Ot::None, Sequential, 0, 1);
    table[0x1E] = op("ldc.i4.8", Ot::None, Sequential, 0, 1);
    table[0x1F] = op("ldc.i4.s", Ot::Int8, Sequential, 0, 1);
    table[0x20] = op("ldc.i4", Ot::Int32, Sequential, 0, 1);
    table[0x21] = op("ldc.i8", Ot::Int64, Sequential, 0, 1);
    table[0x22] = op("ldc.r4", Ot::Float32, Sequential, 0, 1);
    table[0x23] = op("ldc.r8", Ot::Float64, Sequential, 0, 1);
    table[0x25] = op("dup", Ot::None, Sequential, 1, 2);
    table[0x26] = op("pop", Ot::None, Sequential, 1, 0);
    table[0x27] = op("jmp", Ot::Token, Return, 0, 0);
    table[0x28] = op("call", Ot::Token, Call, 0, 0);
    table[0x29] = op("calli", Ot::Token, Call, 0, 0);
    table[0x2A] = op("ret", Ot::None, Return, 0, 0);
    table[0x2B] = op("br.s", Ot::Int8, UnconditionalBranch, 0, 0);
    table[0x2C] = op("brfalse.s", Ot::Int8, ConditionalBranch, 1, 0);
    table[0x2D] = op("brtrue.s", Ot::Int8, ConditionalBranch, 1, 0);
    table[0x2E] = op("beq.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x2F] = op("bge.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x30] = op("bgt.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x31] = op("ble.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x32] = op("blt.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x33] = op("bne.un.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x34] = op("bge.un.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x35] = op("bgt.un.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x36] = op("ble.un.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x37] = op("blt.un.s", Ot::Int8, ConditionalBranch, 2, 0);
    table[0x38] = op("br", Ot::Int32, UnconditionalBranch, 0, 0);
    table[0x39] = op("brfalse", Ot::Int32, ConditionalBranch, 1, 0);
    table[0x3A] = op("brtrue", Ot::Int32, ConditionalBranch, 1, 0);
    table[0x3B] = op("beq", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x3C] = op("bge", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x3D] = op("bgt", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x3E] = op("ble", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x3F] = op("blt", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x40] = op("bne.un", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x41] = op("bge.un", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x42] = op("bgt.un", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x43] = op("ble.un", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x44] = op("blt.un", Ot::Int32, ConditionalBranch, 2, 0);
    table[0x45] = op("switch", Ot::Switch, Switch, 1, 0);
    table[0x46] = op("ldind.i1", Ot::None, Sequential, 1, 1);
    table[0x47] = op("ldind.u1", Ot::None, Sequential, 1, 1);
    table[0x48] = op("ldind.i2", Ot::None, Sequential, 1, 1);
    table[0x49] = op("ldind.u2", Ot::None, Sequential, 1, 1);
    table[0x4A] = op("ldind.i4", Ot::None, Sequential, 1, 1);
    table[0x4B] = op("ldind.u4", Ot::None, Sequential, 1, 1);
    table[0x4C] = op("ldind.i8", Ot::None, Sequential, 1, 1);
    table[0x4D] = op("ldind.i", Ot::None, Sequential, 1, 1);
    table[0x4E] = op("ldind.r4", Ot::None, Sequential, 1, 1);
    table[0x4F] = op("ldind.r8", Ot::None, Sequential, 1, 1);
    table[0x50] = op("ldind.ref", Ot::None, Sequential, 1, 1);
    table[0x51] = op("stind.ref", Ot::None, Sequential, 2, 0);
    table[0x52] = op("stind.i1", Ot::None, Sequential, 2, 0);
    table[0x53] = op("stind.i2", Ot::None, Sequential, 2, 0);
    table[0x54] = op("stind.i4", Ot::None, Sequential, 2, 0);
    table[0x55] = op("stind.i8", Ot::None, Sequential, 2, 0);
    table[0x56] = op("stind.r4", Ot::None, Sequential, 2, 0);
    table[0x57] = op("stind.r8", Ot::None, Sequential, 2, 0);
    table[0x58] = op("add", Ot::None, Sequential, 2, 1);
    table[0x59] = op("sub", Ot::None, Sequential, 2, 1);
    table[0x5A] = op("mul", Ot::None, Sequential, 2, 1);
    table[0x5B] = op("div", Ot::None, Sequential, 2, 1);
    table[0x5C] = op("div.un", Ot::None, Sequential, 2, 1);
    table[0x5D] = op("rem", Ot::None, Sequential, 2, 1);
    table[0x5E] = op("rem.un", Ot::None, Sequential, 2, 1);
    table[0x5F] = op("and", Ot::None, Sequential, 2, 1);
    table[0x60] = op("or", Ot::None, Sequential, 2, 1);
    table[0x61] = op("xor", Ot::None, Sequential, 2, 1);
    table[0x62] = op("shl", Ot::None, Sequential, 2, 1);
    table[0x63] = op("shr", Ot::None, Sequential, 2, 1);
    table[0x64] = op("shr.un", Ot::None, Sequential, 2, 1);
    table[0x65] = op("neg", Ot::None, Sequential, 1, 1);
    table[0x66] = op("not", Ot::None, Sequential, 1, 1);
    table[0x67] = op("conv.i1", Ot::None, Sequential, 1, 1);
    table[0x68] = op("conv.i2", Ot::None, Sequential, 1, 1);
    table[0x69] = op("conv.i4", Ot::None, Sequential, 1, 1);
    table[0x6A] = op("conv.i8", Ot::None, Sequential, 1, 1);
    table[0x6B] = op("conv.r4", Ot::None, Sequential, 1, 1);
    table[0x6C] = op("conv.r8", Ot::None, Sequential, 1, 1);
    table[0x6D] = op("conv.u4", Ot::None, Sequential, 1, 1);
    table[0x6E] = op("conv.u8", Ot::None, Sequential, 1, 1);
    table[0x6F] = op("callvirt", Ot::Token, Call, 0, 0);
    table[0x70] = op("cpobj", Ot::Token, Sequential, 2, 0);
    table[0x71] = op("ldobj", Ot::Token, Sequential, 1, 1);
    table[0x72] = op("ldstr", Ot::Token, Sequential, 0, 1);
    table[0x73] = op("newobj", Ot::Token, Call, 0, 1);
    table[0x74] = op("castclass", Ot::Token, Sequential, 1, 1);
    table[0x75] = op("isinst", Ot::Token, Sequential, 1, 1);
    table[0x76] = op("conv.r.un", Ot::None, Sequential, 1, 1);
    table[0x79] = op("unbox", Ot::Token, Sequential, 1, 1);
    table[0x7A] = op("throw", Ot::None, Throw, 1, 0);
    table[0x7B] = op("ldfld", Ot::Token, Sequential, 1, 1);
    table[0x7C] = op("ldflda", Ot::Token, Sequential, 1, 1);
    table[0x7D] = op("stfld", Ot::Token, Sequential, 2, 0);
    table[0x7E] = op("ldsfld", Ot::Token, Sequential, 0, 1);
    table[0x7F] = op("ldsflda", Ot::Token, Sequential, 0, 1);
    table[0x80] = op("stsfld", Ot::Token, Sequential, 1, 0);
    table[0x81] = op("stobj", Ot::Token, Sequential, 2, 0);
    table[0x82] = op("conv.ovf.i1.un", Ot::None, Sequential, 1, 1);
    table[0x83] = op("conv.ovf.i2.un", Ot::None, Sequential, 1, 1);
    table[0x84] = op("conv.ovf.i4.un", Ot::None, Sequential, 1, 1);
    table[0x85] = op("conv.ovf.i8.un", Ot::None, Sequential, 1, 1);
    table[0x86] = op("conv.ovf.u1.un", Ot::None, Sequential, 1, 1);
    table[0x87] = op("conv.ovf.u2.un", Ot::None, Sequential, 1, 1);
    table[0x88] = op("conv.ovf.u4.un", Ot::None, Sequential, 1, 1);
    table[0x89] = op("conv.ovf.u8.un", Ot::None, Sequential, 1, 1);
    table[0x8A] = op("conv.ovf.i.un", Ot::None, Sequential, 1, 1);
    table[0x8B] = op("conv.ovf.u.un", Ot::None, Sequential, 1, 1);
    table[0x8C] = op("box", Ot::Token, Sequential, 1, 1);
    table[0x8D] = op("newarr", Ot::Token, Sequential, 1, 1);
    table[0x8E] = op("ldlen", Ot::None, Sequential, 1, 1);
    table[0x8F] = op("ldelema", Ot::Token, Sequential, 2, 1);
    table[0x90] = op("ldelem.i1", Ot::None, Sequential, 2, 1);
    table[0x91] = op("ldelem.u1", Ot::None, Sequential, 2, 1);
    table[0x92] = op("ldelem.i2", Ot::None, Sequential, 2, 1);
    table[0x93] = op("ldelem.u2", Ot::None, Sequential, 2, 1);
    table[0x94] = op("ldelem.i4", Ot::None, Sequential, 2, 1);
    table[0x95] = op("ldelem.u4", Ot::None, Sequential, 2, 1);
    table[0x96] = op("ldelem.i8", Ot::None, Sequential, 2, 1);
    table[0x97] = op("ldelem.i", Ot::None, Sequential, 2, 1);
    table[0x98] = op("ldelem.r4", Ot::None, Sequential, 2, 1);
    table[0x99] = op("ldelem.r8", Ot::None, Sequential, 2, 1);
    table[0x9A] = op("ldelem.ref", Ot::None, Sequential, 2, 1);
    table[0x9B] = op("stelem.i", Ot::None, Sequential, 3, 0);
    table[0x9C] = op("stelem.i1", Ot::None, Sequential, 3, 0);
    table[0x9D] = op("stelem.i2", Ot::None, Sequential, 3, 0);
    table[0x9E] = op("stelem.i4", Ot::None, Sequential, 3, 0);
    table[0x9F] = op("stelem.i8", Ot::None, Sequential, 3, 0);
    table[0xA0] = op("stelem.r4", Ot::None, Sequential, 3, 0);
    table[0xA1] = op("stelem.r8", Ot::None, Sequential, 3, 0);
    table[0xA2] = op("stelem.ref", Ot::None, Sequential, 3, 0);
    table[0xA3] = op("ldelem", Ot::Token, Sequential, 2, 1);
    table[0xA4] = op("stelem", Ot::Token, Sequential, 3, 0);
    table[0xA5] = op("unbox.any", Ot::Token, Sequential, 1, 1);
    table[0xB3] = op("conv.ovf.i1", Ot::None, Sequential, 1, 1);
    table[0xB4] = op("conv.ovf.u1", Ot::None, Sequential, 1, 1);
    table[0xB5] = op("conv.ovf.i2", Ot::None, Sequential, 1, 1);
    table[0xB6] = op("conv.ovf.u2", Ot::None, Sequential, 1, 1);
    table[0xB7] = op("conv.ovf.i4", Ot::None, Sequential, 1, 1);
    table[0xB8] = op("conv.ovf.u4", Ot::None, Sequential, 1, 1);
    table[0xB9] = op("conv.ovf.i8", Ot::None, Sequential, 1, 1);
    table[0xBA] = op("conv.ovf.u8", Ot::None, Sequential, 1, 1);
    table[0xC2] = op("refanyval", Ot::Token, Sequential, 1, 1);
    table[0xC3] = op("ckfinite", Ot::None, Sequential, 1, 1);
    table[0xC6] = op("mkrefany", Ot::Token, Sequential, 1, 1);
    table[0xD0] = op("ldtoken", Ot::Token, Sequential, 0, 1);
    table[0xD1] = op("conv.u2", Ot::None, Sequential, 1, 1);
    table[0xD2] = op("conv.u1", Ot::None, Sequential, 1, 1);
    table[0xD3] = op("conv.i", Ot::None, Sequential, 1, 1);
    table[0xD4] = op("conv.ovf.i", Ot::None, Sequential, 1, 1);
    table[0xD5] = op("conv.ovf.u", Ot::None, Sequential, 1, 1);
    table[0xD6] = op("add.ovf", Ot::None, Sequential, 2, 1);
    table[0xD7] = op("add.ovf.un", Ot::None, Sequential, 2, 1);
    table[0xD8] = op("mul.ovf", Ot::None, Sequential, 2, 1);
    table[0xD9] = op("mul.ovf.un", Ot::None, Sequential, 2, 1);
    table[0xDA] = op("sub.ovf", Ot::None, Sequential, 2, 1);
    table[0xDB] = op("sub.ovf.un", Ot::None, Sequential, 2, 1);
    table[0xDC] = op("endfinally", Ot::None, Return, 0, 0);
    table[0xDD] = op("leave", Ot::Int32, UnconditionalBranch, 0, 0);
    table[0xDE] = op("leave.s", Ot::Int8, UnconditionalBranch, 0, 0);
    table[0xDF] = op("stind.i", Ot::None, Sequential, 2, 0);
    table[0xE0] = op("conv.u", Ot::None, Sequential, 1, 1);
    table
};

/// Two-byte opcode table, indexed by the byte after the `0xFE` prefix.
#[rustfmt::skip]
pub static OPCODES_FE: [OpcodeInfo; 31] = {
    let mut table = [RESERVED; 31];
    table[0x00] = op("arglist", Ot::None, Sequential, 0, 1);
    table[0x01] = op("ceq", Ot::None, Sequential, 2, 1);
    table[0x02] = op("cgt", Ot::None, Sequential, 2, 1);
    table[0x03] = op("cgt.un", Ot::None, Sequential, 2, 1);
    table[0x04] = op("clt", Ot::None, Sequential, 2, 1);
    table[0x05] = op("clt.un", Ot::None, Sequential, 2, 1);
    table[0x06] = op("ldftn", Ot::Token, Sequential, 0, 1);
    table[0x07] = op("ldvirtftn", Ot::Token, Sequential, 1, 1);
    table[0x09] = op("ldarg", Ot::UInt16, Sequential, 0, 1);
    table[0x0A] = op("ldarga", Ot::UInt16, Sequential, 0, 1);
    table[0x0B] = op("starg", Ot::UInt16, Sequential, 1, 0);
    table[0x0C] = op("ldloc", Ot::UInt16, Sequential, 0, 1);
    table[0x0D] = op("ldloca", Ot::UInt16, Sequential, 0, 1);
    table[0x0E] = op("stloc", Ot::UInt16, Sequential, 1, 0);
    table[0x0F] = op("localloc", Ot::None, Sequential, 1, 1);
    table[0x11] = op("endfilter", Ot::None, Return, 1, 0);
    table[0x12] = op("unaligned.", Ot::UInt8, Sequential, 0, 0);
    table[0x13] = op("volatile.", Ot::None, Sequential, 0, 0);
    table[0x14] = op("tail.", Ot::None, Sequential, 0, 0);
    table[0x15] = op("initobj", Ot::Token, Sequential, 1, 0);
    table[0x16] = op("constrained.", Ot::Token, Sequential, 0, 0);
    table[0x17] = op("cpblk", Ot::None, Sequential, 3, 0);
    table[0x18] = op("initblk", Ot::None, Sequential, 3, 0);
    table[0x19] = op("no.", Ot::UInt8, Sequential, 0, 0);
    table[0x1A] = op("rethrow", Ot::None, Throw, 0, 0);
    table[0x1C] = op("sizeof", Ot::Token, Sequential, 0, 1);
    table[0x1D] = op("refanytype", Ot::None, Sequential, 1, 1);
    table[0x1E] = op("readonly.", Ot::None, Sequential, 0, 0);
    table
};

/// Look up an opcode by mnemonic, returning `(prefix, opcode, info)`.
///
/// The prefix is `0xFE` for two-byte opcodes and 0 otherwise.
#[must_use]
pub fn find_opcode(mnemonic: &str) -> Option<(u8, u8, &'static OpcodeInfo)> {
    for (index, info) in OPCODES.iter().enumerate() {
        if info.mnemonic == mnemonic {
            #[allow(clippy::cast_possible_truncation)]
            return Some((0, index as u8, info));
        }
    }
    for (index, info) in OPCODES_FE.iter().enumerate() {
        if !info.mnemonic.is_empty() && info.mnemonic == mnemonic {
            #[allow(clippy::cast_possible_truncation)]
            return Some((0xFE, index as u8, info));
        }
    }
    None
}

/// Look up the metadata for a decoded `(prefix, opcode)` pair.
#[must_use]
pub fn opcode_info(prefix: u8, opcode: u8) -> Option<&'static OpcodeInfo> {
    let info = match prefix {
        0 => OPCODES.get(opcode as usize)?,
        0xFE => OPCODES_FE.get(opcode as usize)?,
        _ => return None,
    };

    if info.mnemonic.is_empty() {
        None
    } else {
        Some(info)
    }
}

/// Map a one-byte branch opcode to its long (4-byte displacement) form.
///
/// Long-form opcodes map to themselves. Returns `None` for opcodes that are
/// not branches.
#[must_use]
pub fn long_form(opcode: u8) -> Option<u8> {
    match opcode {
        // br.s through blt.un.s sit a fixed distance below their long forms
        0x2B..=0x37 => Some(opcode + 0x0D),
        0x38..=0x44 => Some(opcode),
        0xDE => Some(0xDD), // leave.s -> leave
        0xDD => Some(0xDD),
        _ => None,
    }
}

/// Map a one-byte branch opcode to its short (1-byte displacement) form.
///
/// Short-form opcodes map to themselves. Returns `None` for opcodes that are
/// not branches.
#[must_use]
pub fn short_form(opcode: u8) -> Option<u8> {
    match opcode {
        0x2B..=0x37 => Some(opcode),
        0x38..=0x44 => Some(opcode - 0x0D),
        0xDD => Some(0xDE), // leave -> leave.s
        0xDE => Some(0xDE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_consistency() {
        // Every named opcode round-trips through the mnemonic lookup
        for (index, info) in OPCODES.iter().enumerate() {
            if info.mnemonic.is_empty() {
                continue;
            }
            let (prefix, opcode, _) = find_opcode(info.mnemonic).unwrap();
            assert_eq!(prefix, 0, "{}", info.mnemonic);
            assert_eq!(opcode as usize, index, "{}", info.mnemonic);
        }
        for (index, info) in OPCODES_FE.iter().enumerate() {
            if info.mnemonic.is_empty() {
                continue;
            }
            let (prefix, opcode, _) = find_opcode(info.mnemonic).unwrap();
            assert_eq!(prefix, 0xFE, "{}", info.mnemonic);
            assert_eq!(opcode as usize, index, "{}", info.mnemonic);
        }
    }

    #[test]
    fn known_entries() {
        assert_eq!(OPCODES[0x2A].mnemonic, "ret");
        assert_eq!(OPCODES[0x58].mnemonic, "add");
        assert_eq!(OPCODES[0x58].pops, 2);
        assert_eq!(OPCODES[0x58].pushes, 1);
        assert_eq!(OPCODES[0x45].operand, OperandType::Switch);
        assert_eq!(OPCODES_FE[0x01].mnemonic, "ceq");
        assert!(OPCODES[0x24].mnemonic.is_empty());
    }

    #[test]
    fn branch_forms() {
        assert_eq!(long_form(0x2B), Some(0x38)); // br.s -> br
        assert_eq!(short_form(0x38), Some(0x2B));
        assert_eq!(long_form(0x37), Some(0x44)); // blt.un.s -> blt.un
        assert_eq!(long_form(0xDE), Some(0xDD)); // leave.s -> leave
        assert_eq!(short_form(0xDD), Some(0xDE));
        assert_eq!(long_form(0x2A), None); // ret is not a branch
        assert_eq!(short_form(0x45), None); // switch has no short form
    }

    #[test]
    fn reserved_lookup() {
        assert!(opcode_info(0, 0x24).is_none());
        assert!(opcode_info(0xFE, 0x08).is_none());
        assert!(opcode_info(0xFE, 0xFF).is_none());
        assert!(opcode_info(0, 0x00).is_some());
    }
}
