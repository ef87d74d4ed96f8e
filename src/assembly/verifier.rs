//! Structural stack-depth verification over basic blocks.
//!
//! [`verify_stack_depth`] partitions an instruction buffer into basic
//! blocks, builds the control flow graph, and propagates evaluation-stack
//! depths breadth-first from the method entry and every handler entry. Two
//! paths reaching one block with different depths is a hard
//! [`crate::Error::StackInconsistent`]; situations where a depth cannot be
//! determined at all (a call without a known stack effect, stack underflow,
//! unreachable code) are the soft [`crate::Error::StackUnknowable`], which
//! callers may answer with a conservative default.

use std::collections::{HashMap, VecDeque};

use crate::{
    assembly::{
        buffer::{InstructionBuffer, InstructionRecord, LabelId, Layout},
        instruction::FlowType,
        instructions::opcode_info,
    },
    Error::{StackInconsistent, StackUnknowable},
    Result,
};

/// One additional entry point into the control flow graph.
///
/// Exception handlers are reachable only through the runtime; their first
/// blocks are traversal roots. Catch and filter entries start with the
/// exception object already on the stack.
#[derive(Debug, Clone, Copy)]
pub struct HandlerEntry {
    /// Label at the start of the handler (or filter) code
    pub label: LabelId,
    /// Whether the runtime pushes the exception object on entry
    pub exception_on_stack: bool,
}

/// Control flow out of a basic block.
enum BlockExit {
    /// Falls through to the next block
    FallThrough,
    /// Conditional branch: target plus fall-through
    Conditional(LabelId),
    /// Unconditional branch: target only
    Unconditional(LabelId),
    /// Switch: all targets plus fall-through
    Switch(Vec<LabelId>),
    /// Return or throw, no successors
    Terminal,
}

struct Block {
    /// Byte offset of the first instruction
    offset: u32,
    /// Least entry depth that keeps every pop in range
    min_entry: i32,
    /// Highest depth above the entry depth reached within the block
    max_within: i32,
    /// Net depth change across the block
    exit_delta: i32,
    /// Whether the block contains an instruction with an unknowable effect
    unknowable: bool,
    exit: BlockExit,
}

/// Compute the required `maxStack` for a laid-out instruction buffer.
///
/// `handlers` lists the handler and filter entry labels of the method's
/// exception regions; they become extra traversal roots.
///
/// # Errors
/// Returns [`crate::Error::StackInconsistent`] when two control flow paths
/// reach the same block with different depths, and
/// [`crate::Error::StackUnknowable`] when a depth cannot be determined
pub fn verify_stack_depth(
    buffer: &InstructionBuffer,
    layout: &Layout,
    handlers: &[HandlerEntry],
) -> Result<u16> {
    let (blocks, label_blocks) = build_blocks(buffer, layout)?;
    if blocks.is_empty() {
        return Ok(0);
    }

    let mut entry_depths: Vec<Option<i32>> = vec![None; blocks.len()];
    let mut queue = VecDeque::new();

    entry_depths[0] = Some(0);
    queue.push_back(0);

    for handler in handlers {
        let Some(&block) = label_blocks.get(&handler.label) else {
            return Err(StackUnknowable(format!(
                "handler entry label {} has no code",
                handler.label.0
            )));
        };
        let depth = i32::from(handler.exception_on_stack);

        match entry_depths[block] {
            None => {
                entry_depths[block] = Some(depth);
                queue.push_back(block);
            }
            Some(existing) if existing != depth => {
                return Err(StackInconsistent {
                    offset: blocks[block].offset,
                });
            }
            Some(_) => {}
        }
    }

    let mut max_depth = 0i32;

    while let Some(index) = queue.pop_front() {
        let block = &blocks[index];
        let entry = match entry_depths[index] {
            Some(depth) => depth,
            None => continue,
        };

        if block.unknowable {
            return Err(StackUnknowable(format!(
                "call at offset {:#X} has no known stack effect",
                block.offset
            )));
        }
        if entry < block.min_entry {
            return Err(StackUnknowable(format!(
                "stack underflow at offset {:#X}",
                block.offset
            )));
        }

        max_depth = max_depth.max(entry + block.max_within);
        let exit_depth = entry + block.exit_delta;

        let mut successors = Vec::new();
        match &block.exit {
            BlockExit::FallThrough => successors.push(fall_through(index, &blocks)),
            BlockExit::Conditional(target) => {
                successors.push(label_blocks.get(target).copied());
                successors.push(fall_through(index, &blocks));
            }
            BlockExit::Unconditional(target) => {
                successors.push(label_blocks.get(target).copied());
            }
            BlockExit::Switch(targets) => {
                for target in targets {
                    successors.push(label_blocks.get(target).copied());
                }
                successors.push(fall_through(index, &blocks));
            }
            BlockExit::Terminal => {}
        }

        for successor in successors.into_iter().flatten() {
            match entry_depths[successor] {
                None => {
                    entry_depths[successor] = Some(exit_depth);
                    queue.push_back(successor);
                }
                Some(existing) if existing != exit_depth => {
                    return Err(StackInconsistent {
                        offset: blocks[successor].offset,
                    });
                }
                Some(_) => {}
            }
        }
    }

    if let Some(unreached) = entry_depths.iter().position(Option::is_none) {
        return Err(StackUnknowable(format!(
            "unreachable code at offset {:#X}",
            blocks[unreached].offset
        )));
    }

    u16::try_from(max_depth)
        .map_err(|_| StackUnknowable(format!("stack depth {max_depth} exceeds u16")))
}

/// A branch target past the last block has no code to execute; treat it as
/// leaving the method.
fn fall_through(index: usize, blocks: &[Block]) -> Option<usize> {
    (index + 1 < blocks.len()).then_some(index + 1)
}

#[allow(clippy::type_complexity)]
fn build_blocks(
    buffer: &InstructionBuffer,
    layout: &Layout,
) -> Result<(Vec<Block>, HashMap<LabelId, usize>)> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut label_blocks = HashMap::new();
    // Labels seen since the last executable record; they bind to the next
    // block that materializes
    let mut pending_labels: Vec<LabelId> = Vec::new();
    let mut current: Option<Block> = None;

    for (index, record) in buffer.records().iter().enumerate() {
        let (pops, pushes, exit) = match record {
            InstructionRecord::Label(label) => {
                // A label splits the block: its depth may be joined from
                // elsewhere
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                pending_labels.push(*label);
                continue;
            }
            InstructionRecord::SequencePoint { .. }
            | InstructionRecord::ScopeOpen
            | InstructionRecord::ScopeClose => continue,
            InstructionRecord::Op { prefix, opcode }
            | InstructionRecord::Immediate { prefix, opcode, .. } => {
                let Some(info) = opcode_info(*prefix, *opcode) else {
                    return Err(StackUnknowable(format!(
                        "unknown opcode {prefix:02X} {opcode:02X}"
                    )));
                };
                let exit = match info.flow {
                    FlowType::Return | FlowType::Throw => Some(BlockExit::Terminal),
                    _ => None,
                };
                (i32::from(info.pops), i32::from(info.pushes), exit)
            }
            InstructionRecord::TokenOp { prefix, opcode, .. } => {
                let Some(info) = opcode_info(*prefix, *opcode) else {
                    return Err(StackUnknowable(format!(
                        "unknown opcode {prefix:02X} {opcode:02X}"
                    )));
                };
                if info.flow == FlowType::Call {
                    // A lifted call carries no signature; its effect is not
                    // derivable here
                    let block = current.get_or_insert_with(|| {
                        new_block(layout.offsets[index], &mut pending_labels, &mut label_blocks, blocks.len())
                    });
                    block.unknowable = true;
                    continue;
                }
                let exit = match info.flow {
                    FlowType::Return | FlowType::Throw => Some(BlockExit::Terminal),
                    _ => None,
                };
                (i32::from(info.pops), i32::from(info.pushes), exit)
            }
            InstructionRecord::Call { pops, pushes, .. } => {
                (i32::from(*pops), i32::from(*pushes), None)
            }
            InstructionRecord::Branch { opcode, target } => {
                let Some(info) = opcode_info(0, *opcode) else {
                    return Err(StackUnknowable(format!("unknown opcode {opcode:02X}")));
                };
                let exit = if info.flow == FlowType::ConditionalBranch {
                    BlockExit::Conditional(*target)
                } else {
                    BlockExit::Unconditional(*target)
                };
                (i32::from(info.pops), i32::from(info.pushes), Some(exit))
            }
            InstructionRecord::Switch { targets } => {
                (1, 0, Some(BlockExit::Switch(targets.clone())))
            }
        };

        let block = current.get_or_insert_with(|| {
            new_block(layout.offsets[index], &mut pending_labels, &mut label_blocks, blocks.len())
        });

        // Pops happen before pushes, so the entry depth must cover them
        block.min_entry = block.min_entry.max(pops - block.exit_delta);
        block.exit_delta += pushes - pops;
        block.max_within = block.max_within.max(block.exit_delta);

        if let Some(exit) = exit {
            if let Some(mut finished) = current.take() {
                finished.exit = exit;
                blocks.push(finished);
            }
        }
    }

    if let Some(block) = current.take() {
        blocks.push(block);
    }

    // Trailing labels bind past the last block; branches to them leave the
    // method and resolve to no successor
    Ok((blocks, label_blocks))
}

fn new_block(
    offset: u32,
    pending_labels: &mut Vec<LabelId>,
    label_blocks: &mut HashMap<LabelId, usize>,
    index: usize,
) -> Block {
    for label in pending_labels.drain(..) {
        label_blocks.insert(label, index);
    }

    Block {
        offset,
        min_entry: 0,
        max_within: 0,
        exit_delta: 0,
        unknowable: false,
        exit: BlockExit::FallThrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, Error};

    fn depth_of(buffer: &InstructionBuffer) -> Result<u16> {
        let layout = buffer.layout()?;
        verify_stack_depth(buffer, &layout, &[])
    }

    #[test]
    fn straight_line_depth() {
        let mut buf = InstructionBuffer::new();
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.emit_i4("ldc.i4", 2).unwrap();
        buf.emit("add").unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        assert_eq!(depth_of(&buf).unwrap(), 2);
    }

    #[test]
    fn empty_buffer_is_zero() {
        let buf = InstructionBuffer::new();
        assert_eq!(depth_of(&buf).unwrap(), 0);
    }

    #[test]
    fn call_effect_from_record() {
        let mut buf = InstructionBuffer::new();
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.emit_i4("ldc.i4", 2).unwrap();
        buf.emit_call("call", Token::new(0x0600_0001), 2, 1).unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        assert_eq!(depth_of(&buf).unwrap(), 2);
    }

    #[test]
    fn lifted_call_is_unknowable() {
        // A call lifted from raw bytes has no signature to derive the stack
        // effect from
        let code = [
            0x28, 0x01, 0x00, 0x00, 0x06, // call 0x06000001
            0x2A, // ret
        ];
        let buf = InstructionBuffer::from_code(&code).unwrap();
        assert!(matches!(depth_of(&buf), Err(Error::StackUnknowable(_))));
    }

    #[test]
    fn merge_agreeing_depths() {
        // Both paths reach the join with one value on the stack
        let mut buf = InstructionBuffer::new();
        let other = buf.new_label();
        let join = buf.new_label();
        buf.emit_i4("ldc.i4", 0).unwrap();
        buf.emit_branch("brtrue", other).unwrap();
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.emit_branch("br", join).unwrap();
        buf.place_label(other).unwrap();
        buf.emit_i4("ldc.i4", 2).unwrap();
        buf.place_label(join).unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        assert_eq!(depth_of(&buf).unwrap(), 1);
    }

    #[test]
    fn merge_conflicting_depths() {
        // One path pushes two values, the other one; the join is inconsistent
        let mut buf = InstructionBuffer::new();
        let other = buf.new_label();
        let join = buf.new_label();
        buf.emit_i4("ldc.i4", 0).unwrap();
        buf.emit_branch("brtrue", other).unwrap();
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.emit_i4("ldc.i4", 2).unwrap();
        buf.emit_branch("br", join).unwrap();
        buf.place_label(other).unwrap();
        buf.emit_i4("ldc.i4", 3).unwrap();
        buf.place_label(join).unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        assert!(matches!(
            depth_of(&buf),
            Err(Error::StackInconsistent { .. })
        ));
    }

    #[test]
    fn catch_entry_starts_at_one() {
        let mut buf = InstructionBuffer::new();
        let handler = buf.new_label();
        let done = buf.new_label();

        buf.emit("nop").unwrap();
        buf.emit_branch("leave", done).unwrap();
        buf.place_label(handler).unwrap();
        buf.emit("pop").unwrap(); // pops the exception object
        buf.emit_branch("leave", done).unwrap();
        buf.place_label(done).unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let handlers = [HandlerEntry {
            label: handler,
            exception_on_stack: true,
        }];
        assert_eq!(
            verify_stack_depth(&buf, &layout, &handlers).unwrap(),
            1
        );
    }

    #[test]
    fn handler_unreachable_without_entry() {
        // The same shape with no handler root cannot reach the pop block
        let mut buf = InstructionBuffer::new();
        let handler = buf.new_label();
        let done = buf.new_label();

        buf.emit("nop").unwrap();
        buf.emit_branch("leave", done).unwrap();
        buf.place_label(handler).unwrap();
        buf.emit("pop").unwrap();
        buf.emit_branch("leave", done).unwrap();
        buf.place_label(done).unwrap();
        buf.emit("ret").unwrap();

        assert!(matches!(depth_of(&buf), Err(Error::StackUnknowable(_))));
    }

    #[test]
    fn underflow_is_soft() {
        let mut buf = InstructionBuffer::new();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        assert!(matches!(depth_of(&buf), Err(Error::StackUnknowable(_))));
    }

    #[test]
    fn switch_successors_checked() {
        let mut buf = InstructionBuffer::new();
        let case0 = buf.new_label();
        let case1 = buf.new_label();
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.emit_i4("ldc.i4", 0).unwrap();
        buf.emit_switch(&[case0, case1]).unwrap();
        buf.place_label(case0).unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();
        buf.place_label(case1).unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        // switch pops the selector; both cases see depth 1
        assert_eq!(depth_of(&buf).unwrap(), 2);
    }

    #[test]
    fn loop_converges() {
        let mut buf = InstructionBuffer::new();
        let top = buf.new_label();
        buf.place_label(top).unwrap();
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.emit_branch("brtrue", top).unwrap();
        buf.emit("ret").unwrap();

        assert_eq!(depth_of(&buf).unwrap(), 1);
    }
}
