use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::{
        tables::{
            rows::write_coded_index, CodedIndex, CodedIndexType, RowReadable, RowWritable,
            TableId, TableInfoRef,
        },
        token::Token,
    },
    Result,
};

/// The `TypeDef` table defines types (classes, interfaces, value types, enums) in the current module. `TableId` = 0x02
#[derive(Clone, Debug)]
pub struct TypeDefRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// a 4-byte bitmask of type `TypeAttributes`
    pub flags: u32,
    /// an index into the String heap
    pub type_name: u32,
    /// an index into the String heap
    pub type_namespace: u32,
    /// an index into the `TypeDef`, `TypeRef`, or `TypeSpec` table; more precisely, a `TypeDefOrRef`
    pub extends: CodedIndex,
    /// an index into the Field table; it marks the first of a contiguous run of Fields owned by this Type
    pub field_list: u32,
    /// an index into the `MethodDef` table; it marks the first of a contiguous run of Methods owned by this Type
    pub method_list: u32,
}

impl RowReadable for TypeDefRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */             4 +
            /* type_name */         sizes.str_bytes() +
            /* type_namespace */    sizes.str_bytes() +
            /* extends */           sizes.coded_index_bytes(CodedIndexType::TypeDefOrRef) +
            /* field_list */        sizes.table_index_bytes(TableId::Field) +
            /* method_list */       sizes.table_index_bytes(TableId::MethodDef)
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(TypeDefRaw {
            rid,
            token: Token::new(0x0200_0000 + rid),
            offset: *offset,
            flags: read_le_at::<u32>(data, offset)?,
            type_name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            type_namespace: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            extends: CodedIndex::read(data, offset, sizes, CodedIndexType::TypeDefOrRef)?,
            field_list: read_le_at_dyn(data, offset, sizes.is_large(TableId::Field))?,
            method_list: read_le_at_dyn(data, offset, sizes.is_large(TableId::MethodDef))?,
        })
    }
}

impl RowWritable for TypeDefRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at(data, offset, self.flags)?;
        write_le_at_dyn(data, offset, self.type_name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.type_namespace, sizes.is_large_str())?;
        write_coded_index(data, offset, sizes, CodedIndexType::TypeDefOrRef, &self.extends)?;
        write_le_at_dyn(data, offset, self.field_list, sizes.is_large(TableId::Field))?;
        write_le_at_dyn(
            data,
            offset,
            self.method_list,
            sizes.is_large(TableId::MethodDef),
        )?;
        Ok(())
    }
}
