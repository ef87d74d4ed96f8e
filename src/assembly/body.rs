//! Method body encoding: header selection and exception table emission.
//!
//! [`MethodBodyBuilder`] wraps an [`InstructionBuffer`] with the method-level
//! state a body carries: exception regions marked by label pairs, the local
//! variable signature, the init-locals flag and an optional explicit
//! `maxStack`. [`MethodBodyBuilder::build`] runs layout, resolves the
//! regions, determines `maxStack` (explicit value, else the verifier, else
//! the conservative default when the verifier cannot decide) and emits the
//! tiny or fat header with the aligned exception section.

use crate::{
    assembly::{
        buffer::{InstructionBuffer, LabelId},
        verifier::{verify_stack_depth, HandlerEntry},
    },
    file::io::push_le,
    metadata::{
        method::{
            ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags,
            DEFAULT_MAX_STACK, TINY_MAX_CODE_SIZE,
        },
        token::Token,
    },
    Error::{EncodeOverflow, InvalidOperand},
    Result,
};

/// Most clauses a compact exception section can hold; beyond this the whole
/// method switches to the extended clause format.
pub const COMPACT_MAX_CLAUSES: usize = 20;

/// Kind of an authored exception region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Catches exceptions of the given type
    TypedCatch(Token),
    /// Runs the filter code at the given label to decide whether to handle
    Filter(LabelId),
    /// Runs on both normal and exceptional exit from the try region
    Finally,
    /// Runs only on exceptional exit from the try region
    Fault,
}

/// One authored try/handler region, bounded by label pairs.
///
/// End labels are exclusive: the region covers `start..end`.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionRegion {
    /// Region kind
    pub kind: RegionKind,
    /// Start of the protected range
    pub try_start: LabelId,
    /// End of the protected range
    pub try_end: LabelId,
    /// Start of the handler code
    pub handler_start: LabelId,
    /// End of the handler code
    pub handler_end: LabelId,
}

/// Builder for a complete encoded method body.
#[derive(Default)]
pub struct MethodBodyBuilder {
    instructions: InstructionBuffer,
    regions: Vec<ExceptionRegion>,
    max_stack: Option<u16>,
    local_signature: Option<Token>,
    init_locals: bool,
}

impl MethodBodyBuilder {
    /// Create a builder with an empty instruction buffer.
    #[must_use]
    pub fn new() -> Self {
        MethodBodyBuilder::default()
    }

    /// Create a builder around an existing buffer, for example one lifted
    /// from a decoded body.
    #[must_use]
    pub fn with_instructions(instructions: InstructionBuffer) -> Self {
        MethodBodyBuilder {
            instructions,
            ..MethodBodyBuilder::default()
        }
    }

    /// The instruction buffer, for emitting code.
    pub fn instructions_mut(&mut self) -> &mut InstructionBuffer {
        &mut self.instructions
    }

    /// The instruction buffer.
    #[must_use]
    pub fn instructions(&self) -> &InstructionBuffer {
        &self.instructions
    }

    /// Mark a try/handler region by its label pair bounds.
    pub fn add_region(&mut self, region: ExceptionRegion) {
        self.regions.push(region);
    }

    /// Set an explicit `maxStack`, skipping verification.
    pub fn max_stack(&mut self, value: u16) {
        self.max_stack = Some(value);
    }

    /// Set the `StandAloneSig` token describing the local variables.
    pub fn local_signature(&mut self, token: Token) {
        self.local_signature = Some(token);
    }

    /// Whether locals are zero-initialized on entry.
    pub fn init_locals(&mut self, value: bool) {
        self.init_locals = value;
    }

    /// Encode the complete body: header, code, and exception sections.
    ///
    /// `maxStack` is the explicit value if one was set; otherwise the
    /// verifier runs, and only if it reports that the depth cannot be
    /// determined does the conservative default apply. An inconsistent
    /// stack is an error, never papered over.
    ///
    /// # Errors
    /// Returns layout, verification or encoding errors; region bounds whose
    /// end precedes their start are [`crate::Error::InvalidOperand`]
    pub fn build(&self) -> Result<Vec<u8>> {
        let layout = self.instructions.layout()?;
        let code = self.instructions.encode(&layout)?;
        let handlers = self.resolve_regions(&layout)?;

        let max_stack = match self.max_stack {
            Some(explicit) => explicit,
            None => {
                let roots = self.handler_roots();
                match verify_stack_depth(&self.instructions, &layout, &roots) {
                    Ok(depth) => depth,
                    Err(crate::Error::StackUnknowable(_)) => DEFAULT_MAX_STACK,
                    Err(error) => return Err(error),
                }
            }
        };

        let tiny = code.len() <= TINY_MAX_CODE_SIZE
            && max_stack <= DEFAULT_MAX_STACK
            && self.local_signature.is_none()
            && handlers.is_empty()
            && !self.init_locals;

        let mut body = Vec::with_capacity(12 + code.len());
        if tiny {
            #[allow(clippy::cast_possible_truncation)]
            body.push((code.len() as u8) << 2 | MethodBodyFlags::TINY_FORMAT.bits() as u8);
            body.extend_from_slice(&code);
            return Ok(body);
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if !handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }

        let code_size = u32::try_from(code.len())
            .map_err(|_| EncodeOverflow(format!("code size {} exceeds u32", code.len())))?;

        // Fat header: flags in the low 12 bits, header size in dwords above
        push_le::<u16>(&mut body, flags.bits() | 3 << 12);
        push_le::<u16>(&mut body, max_stack);
        push_le::<u32>(&mut body, code_size);
        push_le::<u32>(
            &mut body,
            self.local_signature.map_or(0, |token| token.value()),
        );
        body.extend_from_slice(&code);

        if !handlers.is_empty() {
            while body.len() % 4 != 0 {
                body.push(0);
            }
            Self::encode_exception_section(&mut body, &handlers)?;
        }

        Ok(body)
    }

    /// Resolve the authored regions against a layout into offset form.
    fn resolve_regions(&self, layout: &crate::assembly::buffer::Layout) -> Result<Vec<ExceptionHandler>> {
        let mut handlers = Vec::with_capacity(self.regions.len());

        for region in &self.regions {
            let try_offset = layout.label_offset(region.try_start)?;
            let try_end = layout.label_offset(region.try_end)?;
            let handler_offset = layout.label_offset(region.handler_start)?;
            let handler_end = layout.label_offset(region.handler_end)?;

            if try_end < try_offset || handler_end < handler_offset {
                return Err(InvalidOperand(
                    "exception region end precedes its start".into(),
                ));
            }

            let (flags, handler_data) = match region.kind {
                RegionKind::TypedCatch(token) => {
                    (ExceptionHandlerFlags::EXCEPTION, token.value())
                }
                RegionKind::Filter(label) => (
                    ExceptionHandlerFlags::FILTER,
                    layout.label_offset(label)?,
                ),
                RegionKind::Finally => (ExceptionHandlerFlags::FINALLY, 0),
                RegionKind::Fault => (ExceptionHandlerFlags::FAULT, 0),
            };

            handlers.push(ExceptionHandler {
                flags,
                try_offset,
                try_length: try_end - try_offset,
                handler_offset,
                handler_length: handler_end - handler_offset,
                handler_data,
            });
        }

        Ok(handlers)
    }

    /// Traversal roots for the verifier: each handler entry, plus the filter
    /// code of filter regions. Catch and filter entries receive the
    /// exception object from the runtime.
    fn handler_roots(&self) -> Vec<HandlerEntry> {
        let mut roots = Vec::new();

        for region in &self.regions {
            let exception_on_stack = matches!(
                region.kind,
                RegionKind::TypedCatch(_) | RegionKind::Filter(_)
            );
            roots.push(HandlerEntry {
                label: region.handler_start,
                exception_on_stack,
            });

            if let RegionKind::Filter(filter) = region.kind {
                roots.push(HandlerEntry {
                    label: filter,
                    exception_on_stack: true,
                });
            }
        }

        roots
    }

    /// Emit one exception section holding all clauses.
    ///
    /// The clause format is a method-wide decision: one clause out of compact
    /// range, or more clauses than a compact section can hold, switches every
    /// clause to the extended form.
    fn encode_exception_section(body: &mut Vec<u8>, handlers: &[ExceptionHandler]) -> Result<()> {
        let extended =
            handlers.len() > COMPACT_MAX_CLAUSES || handlers.iter().any(|h| !h.fits_compact());

        if extended {
            let section_size = 4 + handlers.len() * 24;
            if section_size > 0x00FF_FFFF {
                return Err(EncodeOverflow(format!(
                    "exception section size {section_size} exceeds the 24-bit length"
                )));
            }

            body.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
            #[allow(clippy::cast_possible_truncation)]
            body.extend_from_slice(&(section_size as u32).to_le_bytes()[..3]);

            for handler in handlers {
                push_le::<u32>(body, u32::from(handler.flags.bits()));
                push_le::<u32>(body, handler.try_offset);
                push_le::<u32>(body, handler.try_length);
                push_le::<u32>(body, handler.handler_offset);
                push_le::<u32>(body, handler.handler_length);
                push_le::<u32>(body, handler.handler_data);
            }
        } else {
            // 4 + 20 * 12 still fits the one-byte section length
            #[allow(clippy::cast_possible_truncation)]
            let section_size = (4 + handlers.len() * 12) as u8;

            body.push(SectionFlags::EHTABLE.bits());
            body.push(section_size);
            push_le::<u16>(body, 0);

            for handler in handlers {
                push_le::<u16>(body, handler.flags.bits());
                #[allow(clippy::cast_possible_truncation)]
                push_le::<u16>(body, handler.try_offset as u16);
                #[allow(clippy::cast_possible_truncation)]
                push_le::<u8>(body, handler.try_length as u8);
                #[allow(clippy::cast_possible_truncation)]
                push_le::<u16>(body, handler.handler_offset as u16);
                #[allow(clippy::cast_possible_truncation)]
                push_le::<u8>(body, handler.handler_length as u8);
                push_le::<u32>(body, handler.handler_data);
            }
        }

        Ok(())
    }
}
