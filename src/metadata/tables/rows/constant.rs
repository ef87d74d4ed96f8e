use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::{
        tables::{
            rows::write_coded_index, CodedIndex, CodedIndexType, RowReadable, RowWritable,
            TableInfoRef,
        },
        token::Token,
    },
    Result,
};

/// The `Constant` table stores compile-time constant values for fields, parameters and properties. `TableId` = 0x0B
///
/// Rows are sorted by the `parent` column.
#[derive(Clone, Debug)]
pub struct ConstantRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// a 1-byte element type constant
    pub base_type: u8,
    /// a 1-byte value; always zero
    pub padding: u8,
    /// an index into the `Param`, `Field`, or `Property` table; more precisely, a `HasConstant`
    pub parent: CodedIndex,
    /// an index into the Blob heap; the constant value
    pub value: u32,
}

impl RowReadable for ConstantRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* base_type */ 1 +
            /* padding */   1 +
            /* parent */    sizes.coded_index_bytes(CodedIndexType::HasConstant) +
            /* value */     sizes.blob_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(ConstantRaw {
            rid,
            token: Token::new(0x0B00_0000 + rid),
            offset: *offset,
            base_type: read_le_at::<u8>(data, offset)?,
            padding: read_le_at::<u8>(data, offset)?,
            parent: CodedIndex::read(data, offset, sizes, CodedIndexType::HasConstant)?,
            value: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for ConstantRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at(data, offset, self.base_type)?;
        write_le_at(data, offset, self.padding)?;
        write_coded_index(data, offset, sizes, CodedIndexType::HasConstant, &self.parent)?;
        write_le_at_dyn(data, offset, self.value, sizes.is_large_blob())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::tables::{MetadataTable, TableId, TableInfo};

    #[test]
    fn crafted_short() {
        let data = vec![
            0x08, // base_type (ELEMENT_TYPE_I4)
            0x00, // padding
            0x04, 0x00, // parent: (row 1 << 2) | tag 0 (Field)
            0x10, 0x00, // value
        ];

        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::Field, 1)],
            false,
            false,
            false,
        ));
        let table = MetadataTable::<ConstantRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x0B000001);
        assert_eq!(row.base_type, 0x08);
        assert_eq!(row.parent.tag, TableId::Field);
        assert_eq!(row.parent.row, 1);
        assert_eq!(row.value, 0x10);
    }
}
