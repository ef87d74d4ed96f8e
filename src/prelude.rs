pub use crate::{
    assembly::{
        decode_stream, InstructionBuffer, MethodBodyBuilder, RegionKind,
    },
    builder::ContainerBuilder,
    metadata::{
        container::CilContainer,
        method::MethodBody,
        tables::{CodedIndex, CodedIndexType, TableId},
        token::Token,
    },
    Error, Parser, Result,
};
