//! Row schemas for the metadata tables this crate materializes.
//!
//! One file per table, each carrying the raw row struct plus its
//! [`crate::metadata::tables::RowReadable`] and
//! [`crate::metadata::tables::RowWritable`] implementations. Raw rows hold
//! unresolved heap offsets and coded indices exactly as stored; the resolve
//! pass in [`crate::metadata::container`] validates them against the loaded
//! heaps and row counts.

mod assembly;
mod assemblyref;
mod constant;
mod customattribute;
mod field;
mod interfaceimpl;
mod memberref;
mod methoddef;
mod module;
mod nestedclass;
mod param;
mod standalonesig;
mod typedef;
mod typeref;
mod typespec;

pub use assembly::AssemblyRaw;
pub use assemblyref::AssemblyRefRaw;
pub use constant::ConstantRaw;
pub use customattribute::CustomAttributeRaw;
pub use field::FieldRaw;
pub use interfaceimpl::InterfaceImplRaw;
pub use memberref::MemberRefRaw;
pub use methoddef::MethodDefRaw;
pub use module::ModuleRaw;
pub use nestedclass::NestedClassRaw;
pub use param::ParamRaw;
pub use standalonesig::StandAloneSigRaw;
pub use typedef::TypeDefRaw;
pub use typeref::TypeRefRaw;
pub use typespec::TypeSpecRaw;

use crate::{
    file::io::write_le_at,
    metadata::tables::{CodedIndex, CodedIndexType, TableInfoRef},
    Result,
};

/// Serializes a coded index at the width selected for its relation kind.
pub(crate) fn write_coded_index(
    data: &mut [u8],
    offset: &mut usize,
    sizes: &TableInfoRef,
    ci_type: CodedIndexType,
    index: &CodedIndex,
) -> Result<()> {
    let value = index.encode(ci_type)?;
    if sizes.coded_index_bits(ci_type) > 16 {
        write_le_at(data, offset, value)
    } else {
        let narrow = u16::try_from(value).map_err(|_| {
            crate::Error::EncodeOverflow(format!(
                "coded index {value} does not fit the 2-byte form of {ci_type:?}"
            ))
        })?;
        write_le_at(data, offset, narrow)
    }
}
