//! Raw CIL instruction decoding.
//!
//! [`decode_instruction`] and [`decode_stream`] turn IL bytes into
//! [`crate::assembly::Instruction`] values without any method-body context;
//! they are usable directly on a code slice and are the foundation the
//! instruction-buffer lift is built on.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilforge::{assembly::decode_stream, Parser};
//!
//! let code = [0x00, 0x2A]; // nop, ret
//! let mut parser = Parser::new(&code);
//! let instructions = decode_stream(&mut parser)?;
//! assert_eq!(instructions.len(), 2);
//! # Ok::<(), cilforge::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior},
        instructions::{OPCODES, OPCODES_FE},
    },
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

/// Decode one instruction at the parser's current position.
///
/// The instruction's `offset` is the parser position at entry; branch and
/// switch displacements are converted to absolute IL offsets relative to the
/// start of the parsed slice.
///
/// # Errors
/// Returns an error for reserved or unknown opcode bytes, truncated operand
/// data, or a branch displacement that lands outside the `u32` offset space
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let (info, prefix, opcode) = match first_byte {
        0xFE => {
            let second_byte = parser.read_le::<u8>()?;
            match OPCODES_FE.get(second_byte as usize) {
                Some(info) => (info, 0xFE, second_byte),
                None => {
                    return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte));
                }
            }
        }
        _ => (&OPCODES[first_byte as usize], 0, first_byte),
    };

    if info.mnemonic.is_empty() {
        return Err(malformed_error!(
            "Reserved opcode: {:02X} {:02X}",
            prefix,
            opcode
        ));
    }

    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::Int16 => Operand::Immediate(Immediate::Int16(parser.read_le::<i16>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()?;

            // Each case is 4 bytes; an absurd count is a truncation in disguise
            if (case_count as usize) * 4 > parser.len().saturating_sub(parser.pos()) {
                return Err(out_of_bounds_error!());
            }

            let mut displacements = Vec::with_capacity(case_count as usize);
            for _ in 0..case_count {
                displacements.push(parser.read_le::<i32>()?);
            }

            Operand::Switch(displacements)
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    let size = (parser.pos() - start) as u32;
    #[allow(clippy::cast_possible_truncation)]
    let offset = start as u32;

    let mut instruction = Instruction {
        offset,
        size,
        opcode,
        prefix,
        mnemonic: info.mnemonic,
        flow_type: info.flow,
        stack_behavior: StackBehavior {
            pops: info.pops,
            pushes: info.pushes,
            #[allow(clippy::cast_possible_wrap)]
            net_effect: info.pushes as i8 - info.pops as i8,
        },
        operand,
        branch_targets: Vec::new(),
    };

    match instruction.flow_type {
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch => {
            if let Operand::Immediate(value) = instruction.operand {
                let target = branch_target(offset, size, value.as_i64())?;
                instruction.branch_targets.push(target);
            }
        }
        FlowType::Switch => {
            if let Operand::Switch(displacements) = &instruction.operand {
                for &displacement in displacements {
                    let target = branch_target(offset, size, i64::from(displacement))?;
                    instruction.branch_targets.push(target);
                }
            }
        }
        _ => {}
    }

    Ok(instruction)
}

/// Resolve a displacement relative to the end of the instruction.
fn branch_target(offset: u32, size: u32, displacement: i64) -> Result<u32> {
    let target = i64::from(offset) + i64::from(size) + displacement;
    u32::try_from(target)
        .map_err(|_| malformed_error!("Branch target out of range at offset {:#X}", offset))
}

/// Decode instructions sequentially until the parser runs out of data.
///
/// # Errors
/// Returns the first decode error encountered; instructions decoded before it
/// are discarded
pub fn decode_stream(parser: &mut Parser) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(parser)?);
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::instruction::{FlowType, Immediate, Operand};

    #[test]
    fn no_operand() {
        let mut parser = Parser::new(&[0x2A]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "ret");
        assert_eq!(instruction.offset, 0);
        assert_eq!(instruction.size, 1);
        assert_eq!(instruction.prefix, 0);
        assert_eq!(instruction.flow_type, FlowType::Return);
        assert_eq!(instruction.operand, Operand::None);
    }

    #[test]
    fn short_immediate() {
        // ldc.i4.s -3
        let mut parser = Parser::new(&[0x1F, 0xFD]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "ldc.i4.s");
        assert_eq!(instruction.size, 2);
        assert_eq!(
            instruction.operand,
            Operand::Immediate(Immediate::Int8(-3))
        );
    }

    #[test]
    fn two_byte_opcode() {
        let mut parser = Parser::new(&[0xFE, 0x01]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "ceq");
        assert_eq!(instruction.prefix, 0xFE);
        assert_eq!(instruction.opcode, 0x01);
        assert_eq!(instruction.stack_behavior.net_effect, -1);
    }

    #[test]
    fn token_operand() {
        let mut parser = Parser::new(&[0x72, 0x01, 0x00, 0x00, 0x70]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "ldstr");
        assert_eq!(
            instruction.operand,
            Operand::Token(Token::new(0x7000_0001))
        );
    }

    #[test]
    fn short_branch_forward() {
        // br.s +4: target is end of instruction (2) + 4
        let mut parser = Parser::new(&[0x2B, 0x04, 0, 0, 0, 0, 0x2A]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.flow_type, FlowType::UnconditionalBranch);
        assert_eq!(instruction.branch_targets, vec![6]);
    }

    #[test]
    fn short_branch_backward() {
        let mut parser = Parser::new(&[0x00, 0x2B, 0xFD]); // nop; br.s -3
        parser.seek(1).unwrap();
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.offset, 1);
        assert_eq!(instruction.branch_targets, vec![0]);
    }

    #[test]
    fn branch_before_stream_start_rejected() {
        let mut parser = Parser::new(&[0x2B, 0xF0]);
        assert!(decode_instruction(&mut parser).is_err());
    }

    #[test]
    fn switch_targets() {
        let mut parser = Parser::new(&[
            0x45, 0x02, 0x00, 0x00, 0x00, // switch, 2 cases
            0x02, 0x00, 0x00, 0x00, // +2
            0x05, 0x00, 0x00, 0x00, // +5
            0x2A, 0x2A, 0x2A, 0x2A, 0x2A, 0x2A, 0x2A,
        ]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "switch");
        assert_eq!(instruction.size, 13);
        assert_eq!(instruction.branch_targets, vec![15, 18]);
    }

    #[test]
    fn switch_count_exceeding_data_rejected() {
        let mut parser = Parser::new(&[0x45, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(decode_instruction(&mut parser).is_err());
    }

    #[test]
    fn reserved_opcodes_rejected() {
        assert!(decode_instruction(&mut Parser::new(&[0x24])).is_err());
        assert!(decode_instruction(&mut Parser::new(&[0xFE, 0x08])).is_err());
        assert!(decode_instruction(&mut Parser::new(&[0xFE, 0x40])).is_err());
        assert!(decode_instruction(&mut Parser::new(&[0xFF])).is_err());
    }

    #[test]
    fn stream_tracks_offsets() {
        let code = [0x00, 0x17, 0x18, 0x58, 0x2A]; // nop, ldc.i4.1, ldc.i4.2, add, ret
        let mut parser = Parser::new(&code);
        let instructions = decode_stream(&mut parser).unwrap();

        assert_eq!(instructions.len(), 5);
        let offsets: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
        assert_eq!(instructions[3].mnemonic, "add");
    }

    #[test]
    fn stream_truncated_operand() {
        let code = [0x00, 0x20, 0x01]; // nop, then ldc.i4 missing 3 bytes
        let mut parser = Parser::new(&code);
        assert!(decode_stream(&mut parser).is_err());
    }
}
