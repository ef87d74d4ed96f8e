//! Mutable instruction buffer with label resolution and branch form layout.
//!
//! [`InstructionBuffer`] is the authoring surface of the codec: instructions
//! are appended as records, branch targets are symbolic [`LabelId`] values,
//! and nothing has a byte offset until [`InstructionBuffer::layout`] runs.
//! Layout assigns offsets with every branch in its short form and promotes
//! branches to the long form until the assignment reaches a fixed point; the
//! result is a separate [`Layout`] value, so the records themselves are never
//! rewritten and the buffer can be edited and laid out again.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilforge::assembly::InstructionBuffer;
//!
//! let mut buf = InstructionBuffer::new();
//! let done = buf.new_label();
//! buf.emit("ldarg.0")?;
//! buf.emit_branch("brfalse", done)?;
//! buf.emit_i4("ldc.i4", 1)?;
//! buf.emit("pop")?;
//! buf.place_label(done)?;
//! buf.emit("ret")?;
//!
//! let layout = buf.layout()?;
//! let bytes = buf.encode(&layout)?;
//! # Ok::<(), cilforge::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        decoder::decode_stream,
        instruction::{FlowType, Immediate, Operand, OperandType},
        instructions::{find_opcode, long_form, short_form},
        opcodes,
    },
    file::{io::push_le, parser::Parser},
    metadata::token::Token,
    Error::{
        BranchOutOfRange, DuplicateLabel, InvalidOperand, UndefinedLabel, UnplacedLabel,
    },
    Result,
};

/// Symbolic reference to a position in an [`InstructionBuffer`].
///
/// Labels are created with [`InstructionBuffer::new_label`], referenced by
/// branch and switch records, and bound to a position with
/// [`InstructionBuffer::place_label`]. Several branches may share one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) u32);

/// One authored instruction or marker.
///
/// Branch records store the long-form opcode; the short/long decision is a
/// layout product, not record state.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionRecord {
    /// Opcode without operand
    Op {
        /// `0xFE` for two-byte opcodes, 0 otherwise
        prefix: u8,
        /// Opcode byte
        opcode: u8,
    },
    /// Opcode with an immediate operand; the variant matches the opcode's
    /// operand width
    Immediate {
        /// `0xFE` for two-byte opcodes, 0 otherwise
        prefix: u8,
        /// Opcode byte
        opcode: u8,
        /// Operand value
        value: Immediate,
    },
    /// Opcode with a metadata or user-string token operand
    TokenOp {
        /// `0xFE` for two-byte opcodes, 0 otherwise
        prefix: u8,
        /// Opcode byte
        opcode: u8,
        /// Operand token
        token: Token,
    },
    /// Call-family opcode with its stack effect taken from the callee
    /// signature
    Call {
        /// Opcode byte
        opcode: u8,
        /// Callee token
        token: Token,
        /// Slots the call removes, including any `this` argument
        pops: u8,
        /// Slots the call pushes, 0 or 1
        pushes: u8,
    },
    /// Branch to a label, stored with the long-form opcode
    Branch {
        /// Long-form opcode byte
        opcode: u8,
        /// Branch target
        target: LabelId,
    },
    /// Switch over a list of labels
    Switch {
        /// Case targets in case order
        targets: Vec<LabelId>,
    },
    /// Binds a label to this position
    Label(LabelId),
    /// Debug marker: the next instruction maps to this source line range
    SequencePoint {
        /// First source line
        line_start: u32,
        /// Last source line
        line_end: u32,
    },
    /// Debug marker: a lexical scope opens at this position
    ScopeOpen,
    /// Debug marker: the innermost open lexical scope closes at this position
    ScopeClose,
}

/// Resolved byte offsets for a buffer, produced by
/// [`InstructionBuffer::layout`].
///
/// A layout is only meaningful for the exact record sequence it was computed
/// from; editing the buffer invalidates it.
pub struct Layout {
    /// Byte offset of each record
    pub(crate) offsets: Vec<u32>,
    /// Encoded size of each record, 0 for markers
    pub(crate) sizes: Vec<u32>,
    /// Whether each branch record encodes in the short form
    pub(crate) short: Vec<bool>,
    /// Resolved offset per label id, `None` for labels never placed
    pub(crate) labels: Vec<Option<u32>>,
    /// Total encoded code size
    code_size: u32,
}

impl Layout {
    /// Total encoded size of the instruction stream in bytes.
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// Resolved byte offset of a placed label.
    ///
    /// # Errors
    /// Returns [`crate::Error::UndefinedLabel`] if the label does not belong
    /// to the buffer this layout was computed from
    pub fn label_offset(&self, label: LabelId) -> Result<u32> {
        match self.labels.get(label.0 as usize) {
            Some(Some(offset)) => Ok(*offset),
            Some(None) => Err(UnplacedLabel(label.0)),
            None => Err(UndefinedLabel(label.0)),
        }
    }
}

/// Receiver for debug events produced after layout.
///
/// The codec emits byte offsets and forwards the source ranges it was given;
/// it persists none of this data itself.
pub trait DebugEventSink {
    /// One sequence point: the instruction at `offset` maps to the given
    /// source line range.
    fn sequence_point(&mut self, offset: u32, line_start: u32, line_end: u32);

    /// One lexical scope spanning `open_offset..close_offset`.
    fn scope(&mut self, open_offset: u32, close_offset: u32);
}

/// Mutable sequence of instruction records with symbolic branch targets.
#[derive(Default)]
pub struct InstructionBuffer {
    records: Vec<InstructionRecord>,
    /// Placement state per label id
    placed: Vec<bool>,
    /// Currently open lexical scopes
    open_scopes: u32,
}

impl InstructionBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        InstructionBuffer::default()
    }

    /// The authored records, in order.
    #[must_use]
    pub fn records(&self) -> &[InstructionRecord] {
        &self.records
    }

    /// Number of records, including markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Create a new, unplaced label.
    pub fn new_label(&mut self) -> LabelId {
        #[allow(clippy::cast_possible_truncation)]
        let id = LabelId(self.placed.len() as u32);
        self.placed.push(false);
        id
    }

    /// Bind a label to the current end of the buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::UndefinedLabel`] for a foreign label and
    /// [`crate::Error::DuplicateLabel`] if the label was already placed
    pub fn place_label(&mut self, label: LabelId) -> Result<()> {
        match self.placed.get_mut(label.0 as usize) {
            None => Err(UndefinedLabel(label.0)),
            Some(true) => Err(DuplicateLabel(label.0)),
            Some(placed) => {
                *placed = true;
                self.records.push(InstructionRecord::Label(label));
                Ok(())
            }
        }
    }

    /// Append an instruction that takes no operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] for an unknown mnemonic or
    /// one that requires an operand
    pub fn emit(&mut self, mnemonic: &str) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if info.operand != OperandType::None {
            return Err(InvalidOperand(format!(
                "{mnemonic} requires an operand"
            )));
        }

        self.records.push(InstructionRecord::Op { prefix, opcode });
        Ok(())
    }

    /// Append an instruction with an integer operand of up to 32 bits.
    ///
    /// The value is range-checked against the opcode's actual operand width,
    /// so `emit_i4("ldloc.s", 3)` encodes a single operand byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the opcode takes no
    /// integer operand, is a branch (use [`InstructionBuffer::emit_branch`]),
    /// or the value does not fit the operand width
    pub fn emit_i4(&mut self, mnemonic: &str, value: i32) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if prefix == 0 && opcodes::is_branch(opcode) {
            return Err(InvalidOperand(format!(
                "{mnemonic} takes a label, not an immediate"
            )));
        }

        let immediate = match info.operand {
            OperandType::Int8 => Immediate::Int8(narrow(mnemonic, value, i8::try_from(value))?),
            OperandType::UInt8 => Immediate::UInt8(narrow(mnemonic, value, u8::try_from(value))?),
            OperandType::Int16 => Immediate::Int16(narrow(mnemonic, value, i16::try_from(value))?),
            OperandType::UInt16 => {
                Immediate::UInt16(narrow(mnemonic, value, u16::try_from(value))?)
            }
            OperandType::Int32 => Immediate::Int32(value),
            _ => {
                return Err(InvalidOperand(format!(
                    "{mnemonic} does not take an integer operand"
                )));
            }
        };

        self.records.push(InstructionRecord::Immediate {
            prefix,
            opcode,
            value: immediate,
        });
        Ok(())
    }

    /// Append an instruction with a 64-bit integer operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the opcode does not take a
    /// 64-bit operand
    pub fn emit_i8(&mut self, mnemonic: &str, value: i64) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if info.operand != OperandType::Int64 {
            return Err(InvalidOperand(format!(
                "{mnemonic} does not take a 64-bit operand"
            )));
        }

        self.records.push(InstructionRecord::Immediate {
            prefix,
            opcode,
            value: Immediate::Int64(value),
        });
        Ok(())
    }

    /// Append an instruction with a 32-bit float operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the opcode does not take a
    /// float operand
    pub fn emit_r4(&mut self, mnemonic: &str, value: f32) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if info.operand != OperandType::Float32 {
            return Err(InvalidOperand(format!(
                "{mnemonic} does not take a float32 operand"
            )));
        }

        self.records.push(InstructionRecord::Immediate {
            prefix,
            opcode,
            value: Immediate::Float32(value),
        });
        Ok(())
    }

    /// Append an instruction with a 64-bit float operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the opcode does not take a
    /// float operand
    pub fn emit_r8(&mut self, mnemonic: &str, value: f64) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if info.operand != OperandType::Float64 {
            return Err(InvalidOperand(format!(
                "{mnemonic} does not take a float64 operand"
            )));
        }

        self.records.push(InstructionRecord::Immediate {
            prefix,
            opcode,
            value: Immediate::Float64(value),
        });
        Ok(())
    }

    /// Append an instruction with a metadata token operand.
    ///
    /// Call-family opcodes are rejected here; they carry a stack effect and
    /// go through [`InstructionBuffer::emit_call`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the opcode does not take a
    /// token or is call-family
    pub fn emit_token(&mut self, mnemonic: &str, token: Token) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if info.operand != OperandType::Token {
            return Err(InvalidOperand(format!(
                "{mnemonic} does not take a token operand"
            )));
        }
        if info.flow == FlowType::Call {
            return Err(InvalidOperand(format!(
                "{mnemonic} needs an explicit stack effect, use emit_call"
            )));
        }

        self.records.push(InstructionRecord::TokenOp {
            prefix,
            opcode,
            token,
        });
        Ok(())
    }

    /// Append `ldstr` with a user-string token.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the token is not a
    /// user-string token
    pub fn emit_ldstr(&mut self, token: Token) -> Result<()> {
        if token.table() != 0x70 {
            return Err(InvalidOperand(format!(
                "ldstr takes a user-string token, got {token}"
            )));
        }

        self.records.push(InstructionRecord::TokenOp {
            prefix: 0,
            opcode: opcodes::LDSTR,
            token,
        });
        Ok(())
    }

    /// Append a call-family instruction with its stack effect.
    ///
    /// `pops` counts every slot the call consumes, including the `this`
    /// argument of instance calls; `pushes` is 1 for a non-void return (or
    /// the constructed object of `newobj`), 0 otherwise. Both come from the
    /// callee signature, which this codec does not interpret.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the mnemonic is not
    /// call-family
    pub fn emit_call(
        &mut self,
        mnemonic: &str,
        token: Token,
        pops: u8,
        pushes: u8,
    ) -> Result<()> {
        let (prefix, opcode, info) = lookup(mnemonic)?;

        if prefix != 0 || info.flow != FlowType::Call {
            return Err(InvalidOperand(format!(
                "{mnemonic} is not a call-family instruction"
            )));
        }

        self.records.push(InstructionRecord::Call {
            opcode,
            token,
            pops,
            pushes,
        });
        Ok(())
    }

    /// Append a branch to a label.
    ///
    /// Either form of the mnemonic is accepted (`br` or `br.s`); the encoded
    /// form is decided during layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the mnemonic is not a
    /// branch, or [`crate::Error::UndefinedLabel`] for a foreign label
    pub fn emit_branch(&mut self, mnemonic: &str, target: LabelId) -> Result<()> {
        let (prefix, opcode, _) = lookup(mnemonic)?;

        let Some(opcode) = (prefix == 0).then(|| long_form(opcode)).flatten() else {
            return Err(InvalidOperand(format!("{mnemonic} is not a branch")));
        };

        self.check_label(target)?;
        self.records.push(InstructionRecord::Branch { opcode, target });
        Ok(())
    }

    /// Append a `switch` over the given case labels.
    ///
    /// # Errors
    /// Returns [`crate::Error::UndefinedLabel`] if any label is foreign
    pub fn emit_switch(&mut self, targets: &[LabelId]) -> Result<()> {
        for &target in targets {
            self.check_label(target)?;
        }

        self.records.push(InstructionRecord::Switch {
            targets: targets.to_vec(),
        });
        Ok(())
    }

    /// Record that the next instruction maps to the given source line range.
    pub fn sequence_point(&mut self, line_start: u32, line_end: u32) {
        self.records.push(InstructionRecord::SequencePoint {
            line_start,
            line_end,
        });
    }

    /// Open a lexical scope at the current position.
    pub fn scope_open(&mut self) {
        self.open_scopes += 1;
        self.records.push(InstructionRecord::ScopeOpen);
    }

    /// Close the innermost open lexical scope.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if no scope is open
    pub fn scope_close(&mut self) -> Result<()> {
        if self.open_scopes == 0 {
            return Err(InvalidOperand("scope close without open scope".into()));
        }

        self.open_scopes -= 1;
        self.records.push(InstructionRecord::ScopeClose);
        Ok(())
    }

    fn check_label(&self, label: LabelId) -> Result<()> {
        if (label.0 as usize) < self.placed.len() {
            Ok(())
        } else {
            Err(UndefinedLabel(label.0))
        }
    }

    /// Compute byte offsets and branch forms for the current records.
    ///
    /// Offsets are prefix sums of record sizes with every branch tentatively
    /// short; any short branch whose displacement misses the `i8` range is
    /// promoted to the long form and the sums are recomputed. Promotion is
    /// monotonic: code only grows, so a promoted branch never fits short
    /// again and the iteration terminates at the minimal fixed point.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnplacedLabel`] if a referenced label was
    /// never placed, or [`crate::Error::BranchOutOfRange`] if a displacement
    /// exceeds even the long form
    pub fn layout(&self) -> Result<Layout> {
        for record in &self.records {
            match record {
                InstructionRecord::Branch { target, .. } => {
                    if !self.placed[target.0 as usize] {
                        return Err(UnplacedLabel(target.0));
                    }
                }
                InstructionRecord::Switch { targets } => {
                    for target in targets {
                        if !self.placed[target.0 as usize] {
                            return Err(UnplacedLabel(target.0));
                        }
                    }
                }
                _ => {}
            }
        }

        let mut short = vec![false; self.records.len()];
        for (index, record) in self.records.iter().enumerate() {
            if matches!(record, InstructionRecord::Branch { .. }) {
                short[index] = true;
            }
        }

        loop {
            let (offsets, sizes, labels, code_size) = self.assign_offsets(&short);

            let mut promoted = false;
            for (index, record) in self.records.iter().enumerate() {
                let InstructionRecord::Branch { target, .. } = record else {
                    continue;
                };
                if !short[index] {
                    continue;
                }

                let target_offset = labels[target.0 as usize].unwrap_or(0);
                let end = i64::from(offsets[index]) + i64::from(sizes[index]);
                let displacement = i64::from(target_offset) - end;
                if i8::try_from(displacement).is_err() {
                    short[index] = false;
                    promoted = true;
                }
            }

            if !promoted {
                // Long displacements can still overflow i32 in pathological
                // code; that is an encode error, not a promotion candidate
                for (index, record) in self.records.iter().enumerate() {
                    let targets: &[LabelId] = match record {
                        InstructionRecord::Branch { target, .. } => std::slice::from_ref(target),
                        InstructionRecord::Switch { targets } => targets,
                        _ => continue,
                    };
                    if matches!(record, InstructionRecord::Branch { .. }) && short[index] {
                        continue;
                    }

                    let end = i64::from(offsets[index]) + i64::from(sizes[index]);
                    for target in targets {
                        let target_offset = labels[target.0 as usize].unwrap_or(0);
                        let displacement = i64::from(target_offset) - end;
                        if i32::try_from(displacement).is_err() {
                            return Err(BranchOutOfRange {
                                offset: offsets[index],
                            });
                        }
                    }
                }

                return Ok(Layout {
                    offsets,
                    sizes,
                    short,
                    labels,
                    code_size,
                });
            }
        }
    }

    /// One prefix-sum pass over the records for a given branch form choice.
    #[allow(clippy::type_complexity)]
    fn assign_offsets(
        &self,
        short: &[bool],
    ) -> (Vec<u32>, Vec<u32>, Vec<Option<u32>>, u32) {
        let mut offsets = Vec::with_capacity(self.records.len());
        let mut sizes = Vec::with_capacity(self.records.len());
        let mut labels = vec![None; self.placed.len()];
        let mut cursor = 0u32;

        for (index, record) in self.records.iter().enumerate() {
            let size = match record {
                InstructionRecord::Op { prefix, .. } => opcode_bytes(*prefix),
                InstructionRecord::Immediate { prefix, value, .. } => {
                    opcode_bytes(*prefix) + immediate_bytes(value)
                }
                InstructionRecord::TokenOp { prefix, .. } => opcode_bytes(*prefix) + 4,
                InstructionRecord::Call { .. } => 5,
                InstructionRecord::Branch { .. } => {
                    if short[index] {
                        2
                    } else {
                        5
                    }
                }
                #[allow(clippy::cast_possible_truncation)]
                InstructionRecord::Switch { targets } => 5 + 4 * targets.len() as u32,
                InstructionRecord::Label(label) => {
                    labels[label.0 as usize] = Some(cursor);
                    0
                }
                InstructionRecord::SequencePoint { .. }
                | InstructionRecord::ScopeOpen
                | InstructionRecord::ScopeClose => 0,
            };

            offsets.push(cursor);
            sizes.push(size);
            cursor += size;
        }

        (offsets, sizes, labels, cursor)
    }

    /// Encode the records into IL bytes using a previously computed layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the layout does not match
    /// the buffer, for example after the buffer was edited
    pub fn encode(&self, layout: &Layout) -> Result<Vec<u8>> {
        if layout.offsets.len() != self.records.len() {
            return Err(InvalidOperand(
                "layout does not match the buffer contents".into(),
            ));
        }

        let mut code = Vec::with_capacity(layout.code_size as usize);

        for (index, record) in self.records.iter().enumerate() {
            match record {
                InstructionRecord::Op { prefix, opcode } => {
                    push_opcode(&mut code, *prefix, *opcode);
                }
                InstructionRecord::Immediate {
                    prefix,
                    opcode,
                    value,
                } => {
                    push_opcode(&mut code, *prefix, *opcode);
                    push_immediate(&mut code, value);
                }
                InstructionRecord::TokenOp {
                    prefix,
                    opcode,
                    token,
                } => {
                    push_opcode(&mut code, *prefix, *opcode);
                    push_le::<u32>(&mut code, token.value());
                }
                InstructionRecord::Call { opcode, token, .. } => {
                    code.push(*opcode);
                    push_le::<u32>(&mut code, token.value());
                }
                InstructionRecord::Branch { opcode, target } => {
                    let target_offset = layout.label_offset(*target)?;
                    let end = i64::from(layout.offsets[index]) + i64::from(layout.sizes[index]);
                    let displacement = i64::from(target_offset) - end;

                    if layout.short[index] {
                        let Some(short_opcode) = short_form(*opcode) else {
                            return Err(InvalidOperand(format!(
                                "opcode {opcode:#04X} has no short form"
                            )));
                        };
                        code.push(short_opcode);
                        #[allow(clippy::cast_possible_truncation)]
                        push_le::<i8>(&mut code, displacement as i8);
                    } else {
                        code.push(*opcode);
                        #[allow(clippy::cast_possible_truncation)]
                        push_le::<i32>(&mut code, displacement as i32);
                    }
                }
                InstructionRecord::Switch { targets } => {
                    code.push(opcodes::SWITCH);
                    #[allow(clippy::cast_possible_truncation)]
                    push_le::<u32>(&mut code, targets.len() as u32);

                    let end = i64::from(layout.offsets[index]) + i64::from(layout.sizes[index]);
                    for target in targets {
                        let target_offset = layout.label_offset(*target)?;
                        let displacement = i64::from(target_offset) - end;
                        #[allow(clippy::cast_possible_truncation)]
                        push_le::<i32>(&mut code, displacement as i32);
                    }
                }
                InstructionRecord::Label(_)
                | InstructionRecord::SequencePoint { .. }
                | InstructionRecord::ScopeOpen
                | InstructionRecord::ScopeClose => {}
            }
        }

        Ok(code)
    }

    /// Replay the debug markers against a layout, driving the given sink.
    ///
    /// Sequence points report the offset of the instruction that follows the
    /// marker; scopes report their open and close offsets as a pair once the
    /// close marker is seen.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the layout does not match
    /// the buffer or a scope was left open
    pub fn emit_debug_events(
        &self,
        layout: &Layout,
        sink: &mut dyn DebugEventSink,
    ) -> Result<()> {
        if layout.offsets.len() != self.records.len() {
            return Err(InvalidOperand(
                "layout does not match the buffer contents".into(),
            ));
        }

        let mut scope_stack = Vec::new();

        for (index, record) in self.records.iter().enumerate() {
            match record {
                InstructionRecord::SequencePoint {
                    line_start,
                    line_end,
                } => {
                    sink.sequence_point(layout.offsets[index], *line_start, *line_end);
                }
                InstructionRecord::ScopeOpen => {
                    scope_stack.push(layout.offsets[index]);
                }
                InstructionRecord::ScopeClose => {
                    let Some(open_offset) = scope_stack.pop() else {
                        return Err(InvalidOperand("scope close without open scope".into()));
                    };
                    sink.scope(open_offset, layout.offsets[index]);
                }
                _ => {}
            }
        }

        if scope_stack.is_empty() {
            Ok(())
        } else {
            Err(InvalidOperand("lexical scope left open".into()))
        }
    }

    /// Lift raw IL bytes into an editable buffer.
    ///
    /// The stream is decoded instruction by instruction; every branch and
    /// switch target becomes a shared label, created in ascending offset
    /// order so that targets at the same offset collapse into one label.
    ///
    /// # Errors
    /// Returns an error if the stream does not decode or a branch target
    /// does not fall on an instruction boundary
    pub fn from_code(code: &[u8]) -> Result<InstructionBuffer> {
        let mut parser = Parser::new(code);
        let instructions = decode_stream(&mut parser)?;

        let mut boundaries: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
        #[allow(clippy::cast_possible_truncation)]
        boundaries.push(code.len() as u32);

        let mut target_offsets: Vec<u32> = instructions
            .iter()
            .flat_map(|i| i.branch_targets.iter().copied())
            .collect();
        target_offsets.sort_unstable();
        target_offsets.dedup();

        for &target in &target_offsets {
            if boundaries.binary_search(&target).is_err() {
                return Err(malformed_error!(
                    "Branch target {:#X} is not an instruction boundary",
                    target
                ));
            }
        }

        let mut buffer = InstructionBuffer::new();
        let labels: HashMap<u32, LabelId> = target_offsets
            .iter()
            .map(|&offset| (offset, buffer.new_label()))
            .collect();

        for instruction in &instructions {
            if let Some(&label) = labels.get(&instruction.offset) {
                buffer.place_label(label)?;
            }

            buffer.lift_instruction(instruction, &labels)?;
        }

        // A branch may legitimately target the end of the stream
        #[allow(clippy::cast_possible_truncation)]
        if let Some(&label) = labels.get(&(code.len() as u32)) {
            buffer.place_label(label)?;
        }

        Ok(buffer)
    }

    fn lift_instruction(
        &mut self,
        instruction: &crate::assembly::instruction::Instruction,
        labels: &HashMap<u32, LabelId>,
    ) -> Result<()> {
        match &instruction.operand {
            Operand::None => self.records.push(InstructionRecord::Op {
                prefix: instruction.prefix,
                opcode: instruction.opcode,
            }),
            Operand::Immediate(value) => match instruction.flow_type {
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch => {
                    let target = instruction.branch_targets[0];
                    let Some(opcode) = long_form(instruction.opcode) else {
                        return Err(malformed_error!(
                            "Branch flow on non-branch opcode {:#04X}",
                            instruction.opcode
                        ));
                    };
                    self.records.push(InstructionRecord::Branch {
                        opcode,
                        target: labels[&target],
                    });
                }
                _ => self.records.push(InstructionRecord::Immediate {
                    prefix: instruction.prefix,
                    opcode: instruction.opcode,
                    value: *value,
                }),
            },
            Operand::Token(token) => self.records.push(InstructionRecord::TokenOp {
                prefix: instruction.prefix,
                opcode: instruction.opcode,
                token: *token,
            }),
            Operand::Switch(_) => {
                let targets = instruction
                    .branch_targets
                    .iter()
                    .map(|target| labels[target])
                    .collect();
                self.records.push(InstructionRecord::Switch { targets });
            }
        }

        Ok(())
    }
}

fn lookup(mnemonic: &str) -> Result<(u8, u8, &'static crate::assembly::instructions::OpcodeInfo)> {
    find_opcode(mnemonic).ok_or_else(|| InvalidOperand(format!("unknown mnemonic {mnemonic}")))
}

fn narrow<T, E>(mnemonic: &str, value: i32, narrowed: std::result::Result<T, E>) -> Result<T> {
    narrowed.map_err(|_| {
        InvalidOperand(format!(
            "operand {value} does not fit the encoding of {mnemonic}"
        ))
    })
}

fn opcode_bytes(prefix: u8) -> u32 {
    if prefix == 0 {
        1
    } else {
        2
    }
}

fn immediate_bytes(value: &Immediate) -> u32 {
    match value {
        Immediate::Int8(_) | Immediate::UInt8(_) => 1,
        Immediate::Int16(_) | Immediate::UInt16(_) => 2,
        Immediate::Int32(_) | Immediate::Float32(_) => 4,
        Immediate::Int64(_) | Immediate::Float64(_) => 8,
    }
}

fn push_opcode(code: &mut Vec<u8>, prefix: u8, opcode: u8) {
    if prefix != 0 {
        code.push(prefix);
    }
    code.push(opcode);
}

fn push_immediate(code: &mut Vec<u8>, value: &Immediate) {
    match value {
        Immediate::Int8(v) => push_le::<i8>(code, *v),
        Immediate::UInt8(v) => push_le::<u8>(code, *v),
        Immediate::Int16(v) => push_le::<i16>(code, *v),
        Immediate::UInt16(v) => push_le::<u16>(code, *v),
        Immediate::Int32(v) => push_le::<i32>(code, *v),
        Immediate::Int64(v) => push_le::<i64>(code, *v),
        Immediate::Float32(v) => push_le::<f32>(code, *v),
        Immediate::Float64(v) => push_le::<f64>(code, *v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn straight_line_encode() {
        let mut buf = InstructionBuffer::new();
        buf.emit_i4("ldc.i4", 7).unwrap();
        buf.emit_i4("ldc.i4.s", 3).unwrap();
        buf.emit("add").unwrap();
        buf.emit("pop").unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();
        assert_eq!(
            code,
            vec![0x20, 0x07, 0x00, 0x00, 0x00, 0x1F, 0x03, 0x58, 0x26, 0x2A]
        );
        assert_eq!(layout.code_size(), 10);
    }

    #[test]
    fn operand_kind_checks() {
        let mut buf = InstructionBuffer::new();
        assert!(matches!(
            buf.emit("ldc.i4"),
            Err(Error::InvalidOperand(_))
        ));
        assert!(matches!(
            buf.emit_i4("ret", 1),
            Err(Error::InvalidOperand(_))
        ));
        assert!(matches!(
            buf.emit_i4("ldc.i4.s", 1000),
            Err(Error::InvalidOperand(_))
        ));
        assert!(matches!(
            buf.emit_i8("ldc.i4", 1),
            Err(Error::InvalidOperand(_))
        ));
        assert!(matches!(
            buf.emit("no.such.opcode"),
            Err(Error::InvalidOperand(_))
        ));
        // Branches want labels, not immediates
        assert!(matches!(
            buf.emit_i4("br.s", 2),
            Err(Error::InvalidOperand(_))
        ));
        // Call family wants an explicit stack effect
        assert!(matches!(
            buf.emit_token("call", Token::new(0x0A00_0001)),
            Err(Error::InvalidOperand(_))
        ));
    }

    #[test]
    fn ldstr_token_check() {
        let mut buf = InstructionBuffer::new();
        assert!(buf.emit_ldstr(Token::new(0x7000_0001)).is_ok());
        assert!(matches!(
            buf.emit_ldstr(Token::new(0x0600_0001)),
            Err(Error::InvalidOperand(_))
        ));
    }

    #[test]
    fn label_lifecycle_errors() {
        let mut buf = InstructionBuffer::new();
        let label = buf.new_label();

        assert!(matches!(
            buf.place_label(LabelId(42)),
            Err(Error::UndefinedLabel(42))
        ));
        buf.place_label(label).unwrap();
        assert!(matches!(
            buf.place_label(label),
            Err(Error::DuplicateLabel(0))
        ));

        let mut other = InstructionBuffer::new();
        assert!(matches!(
            other.emit_branch("br", label),
            Err(Error::UndefinedLabel(0))
        ));
    }

    #[test]
    fn unplaced_label_fails_layout() {
        let mut buf = InstructionBuffer::new();
        let label = buf.new_label();
        buf.emit_branch("br", label).unwrap();
        buf.emit("ret").unwrap();

        assert!(matches!(buf.layout(), Err(Error::UnplacedLabel(0))));
    }

    #[test]
    fn short_forward_branch() {
        let mut buf = InstructionBuffer::new();
        let skip = buf.new_label();
        buf.emit_branch("br", skip).unwrap();
        buf.emit("nop").unwrap();
        buf.place_label(skip).unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();
        // br.s +1, nop, ret
        assert_eq!(code, vec![0x2B, 0x01, 0x00, 0x2A]);
    }

    #[test]
    fn backward_branch() {
        let mut buf = InstructionBuffer::new();
        let top = buf.new_label();
        buf.place_label(top).unwrap();
        buf.emit("nop").unwrap();
        buf.emit_branch("br", top).unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();
        // nop, then br.s back over both instructions
        assert_eq!(code, vec![0x00, 0x2B, 0xFD]);
    }

    #[test]
    fn long_branch_promotion() {
        let mut buf = InstructionBuffer::new();
        let end = buf.new_label();
        buf.emit_branch("br", end).unwrap();
        for _ in 0..200 {
            buf.emit("nop").unwrap();
        }
        buf.place_label(end).unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();

        assert_eq!(code[0], 0x38); // long br
        assert_eq!(&code[1..5], &200i32.to_le_bytes());
        assert_eq!(code.len(), 5 + 200 + 1);
        assert_eq!(code[code.len() - 1], 0x2A);
    }

    #[test]
    fn chained_promotion_converges() {
        // 40 branches to the end, each separated by 124 bytes of nops: every
        // branch fits short on the first pass only if the ones after it stay
        // short, and each promotion pushes its predecessors over the edge.
        let mut buf = InstructionBuffer::new();
        let end = buf.new_label();
        for _ in 0..40 {
            buf.emit_branch("br", end).unwrap();
            for _ in 0..124 {
                buf.emit("nop").unwrap();
            }
        }
        buf.place_label(end).unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();

        // Verify self-consistency: decode every branch and check its target
        // is the final ret
        let mut parser = Parser::new(&code);
        let instructions = decode_stream(&mut parser).unwrap();
        let ret_offset = instructions.last().unwrap().offset;
        for instruction in &instructions {
            if !instruction.branch_targets.is_empty() {
                assert_eq!(instruction.branch_targets, vec![ret_offset]);
            }
        }
    }

    #[test]
    fn switch_roundtrip() {
        let mut buf = InstructionBuffer::new();
        let case0 = buf.new_label();
        let case1 = buf.new_label();
        buf.emit_i4("ldc.i4", 0).unwrap();
        buf.emit_switch(&[case0, case1]).unwrap();
        buf.place_label(case0).unwrap();
        buf.emit("nop").unwrap();
        buf.place_label(case1).unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();

        let mut parser = Parser::new(&code);
        let instructions = decode_stream(&mut parser).unwrap();
        let switch = &instructions[1];
        assert_eq!(switch.mnemonic, "switch");
        assert_eq!(switch.branch_targets.len(), 2);
        assert_eq!(switch.branch_targets[1], switch.branch_targets[0] + 1);
    }

    #[test]
    fn lift_collapses_shared_targets() {
        // Two branches to the same offset share one label after lifting
        let code = [
            0x2C, 0x03, // brfalse.s +3 -> offset 5
            0x2B, 0x01, // br.s +1      -> offset 5
            0x00, // nop
            0x2A, // ret (offset 5)
        ];

        let buf = InstructionBuffer::from_code(&code).unwrap();
        let branch_targets: Vec<LabelId> = buf
            .records()
            .iter()
            .filter_map(|record| match record {
                InstructionRecord::Branch { target, .. } => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(branch_targets.len(), 2);
        assert_eq!(branch_targets[0], branch_targets[1]);

        // Re-encoding reproduces the original bytes
        let layout = buf.layout().unwrap();
        assert_eq!(buf.encode(&layout).unwrap(), code);
    }

    #[test]
    fn lift_rejects_misaligned_target() {
        // br.s +1 lands inside the ldc.i4 operand
        let code = [0x2B, 0x01, 0x20, 0x01, 0x00, 0x00, 0x00, 0x2A];
        assert!(InstructionBuffer::from_code(&code).is_err());
    }

    #[test]
    fn lift_long_form_reencodes_short() {
        // A long br with a tiny displacement comes back short; forms are not
        // semantically distinguishing
        let code = [0x38, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let buf = InstructionBuffer::from_code(&code).unwrap();
        let layout = buf.layout().unwrap();
        assert_eq!(buf.encode(&layout).unwrap(), vec![0x2B, 0x01, 0x00, 0x2A]);
    }

    #[test]
    fn debug_events_after_layout() {
        struct Recorder {
            points: Vec<(u32, u32, u32)>,
            scopes: Vec<(u32, u32)>,
        }
        impl DebugEventSink for Recorder {
            fn sequence_point(&mut self, offset: u32, line_start: u32, line_end: u32) {
                self.points.push((offset, line_start, line_end));
            }
            fn scope(&mut self, open_offset: u32, close_offset: u32) {
                self.scopes.push((open_offset, close_offset));
            }
        }

        let mut buf = InstructionBuffer::new();
        buf.scope_open();
        buf.sequence_point(10, 10);
        buf.emit_i4("ldc.i4", 1).unwrap();
        buf.sequence_point(11, 12);
        buf.emit("pop").unwrap();
        buf.scope_close().unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let mut recorder = Recorder {
            points: Vec::new(),
            scopes: Vec::new(),
        };
        buf.emit_debug_events(&layout, &mut recorder).unwrap();

        assert_eq!(recorder.points, vec![(0, 10, 10), (5, 11, 12)]);
        assert_eq!(recorder.scopes, vec![(0, 6)]);
    }

    #[test]
    fn unbalanced_scope_rejected() {
        let mut buf = InstructionBuffer::new();
        assert!(matches!(
            buf.scope_close(),
            Err(Error::InvalidOperand(_))
        ));

        buf.scope_open();
        buf.emit("ret").unwrap();
        let layout = buf.layout().unwrap();

        struct Ignore;
        impl DebugEventSink for Ignore {
            fn sequence_point(&mut self, _: u32, _: u32, _: u32) {}
            fn scope(&mut self, _: u32, _: u32) {}
        }
        assert!(buf.emit_debug_events(&layout, &mut Ignore).is_err());
    }

    #[test]
    fn call_record_encodes_token() {
        let mut buf = InstructionBuffer::new();
        buf.emit_call("call", Token::new(0x0600_0002), 2, 1).unwrap();
        buf.emit("ret").unwrap();

        let layout = buf.layout().unwrap();
        let code = buf.encode(&layout).unwrap();
        assert_eq!(code, vec![0x28, 0x02, 0x00, 0x00, 0x06, 0x2A]);
    }
}
