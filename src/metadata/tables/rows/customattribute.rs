use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::{
        tables::{
            rows::write_coded_index, CodedIndex, CodedIndexType, RowReadable, RowWritable,
            TableInfoRef,
        },
        token::Token,
    },
    Result,
};

/// The `CustomAttribute` table attaches attribute blobs to metadata entities. `TableId` = 0x0C
///
/// Rows are sorted by the `parent` column.
#[derive(Clone, Debug)]
pub struct CustomAttributeRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// an index into any metadata table except `CustomAttribute` itself; more precisely, a `HasCustomAttribute`
    pub parent: CodedIndex,
    /// an index into the `MethodDef` or `MemberRef` table; more precisely, a `CustomAttributeType`
    pub constructor: CodedIndex,
    /// an index into the Blob heap; the serialized attribute arguments
    pub value: u32,
}

impl RowReadable for CustomAttributeRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* parent */      sizes.coded_index_bytes(CodedIndexType::HasCustomAttribute) +
            /* constructor */ sizes.coded_index_bytes(CodedIndexType::CustomAttributeType) +
            /* value */       sizes.blob_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(CustomAttributeRaw {
            rid,
            token: Token::new(0x0C00_0000 + rid),
            offset: *offset,
            parent: CodedIndex::read(data, offset, sizes, CodedIndexType::HasCustomAttribute)?,
            constructor: CodedIndex::read(data, offset, sizes, CodedIndexType::CustomAttributeType)?,
            value: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for CustomAttributeRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_coded_index(
            data,
            offset,
            sizes,
            CodedIndexType::HasCustomAttribute,
            &self.parent,
        )?;
        write_coded_index(
            data,
            offset,
            sizes,
            CodedIndexType::CustomAttributeType,
            &self.constructor,
        )?;
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
            0x2E, 0x00, // parent: (row 1 << 5) | tag 14 (Assembly)
            0x0B, 0x00, // constructor: (row 1 << 3) | tag 3 (MethodDef)
            0x10, 0x00, // value
        ];

        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::Assembly, 1), (TableId::MethodDef, 1)],
            false,
            false,
            false,
        ));
        let table = MetadataTable::<CustomAttributeRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x0C000001);
        assert_eq!(row.parent.tag, TableId::Assembly);
        assert_eq!(row.parent.row, 1);
        assert_eq!(row.constructor.tag, TableId::MethodDef);
        assert_eq!(row.constructor.row, 1);
        assert_eq!(row.value, 0x10);
    }

    #[test]
    fn write_round_trip() {
        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::Assembly, 1), (TableId::MemberRef, 2)],
            false,
            false,
            false,
        ));
        let row = CustomAttributeRaw {
            rid: 1,
            token: Token::new(0x0C000001),
            offset: 0,
            parent: CodedIndex::new(TableId::Assembly, 1),
            constructor: CodedIndex::new(TableId::MemberRef, 2),
            value: 0x10,
        };

        let mut data = vec![0u8; CustomAttributeRaw::row_size(&sizes) as usize];
        let mut offset = 0;
        row.row_write(&mut data, &mut offset, &sizes).unwrap();

        let table = MetadataTable::<CustomAttributeRaw>::new(&data, 1, sizes).unwrap();
        let back = table.get(1).unwrap();
        assert_eq!(back.parent, row.parent);
        assert_eq!(back.constructor, row.constructor);
    }
}
