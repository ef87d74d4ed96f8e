use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::{
        tables::{
            rows::write_coded_index, CodedIndex, CodedIndexType, RowReadable, RowWritable,
            TableId, TableInfoRef,
        },
        token::Token,
    },
    Result,
};

/// The `InterfaceImpl` table records interfaces implemented by types. `TableId` = 0x09
///
/// Rows are sorted by the `class` column.
#[derive(Clone, Debug)]
pub struct InterfaceImplRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// an index into the `TypeDef` table; the implementing type
    pub class: u32,
    /// an index into `TypeDef`, `TypeRef` or `TypeSpec`; more precisely, a `TypeDefOrRef`
    pub interface: CodedIndex,
}

impl RowReadable for InterfaceImplRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* class */     sizes.table_index_bytes(TableId::TypeDef) +
            /* interface */ sizes.coded_index_bytes(CodedIndexType::TypeDefOrRef)
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(InterfaceImplRaw {
            rid,
            token: Token::new(0x0900_0000 + rid),
            offset: *offset,
            class: read_le_at_dyn(data, offset, sizes.is_large(TableId::TypeDef))?,
            interface: CodedIndex::read(data, offset, sizes, CodedIndexType::TypeDefOrRef)?,
        })
    }
}

impl RowWritable for InterfaceImplRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at_dyn(data, offset, self.class, sizes.is_large(TableId::TypeDef))?;
        write_coded_index(
            data,
            offset,
            sizes,
            CodedIndexType::TypeDefOrRef,
            &self.interface,
        )?;
        Ok(())
    }
}
