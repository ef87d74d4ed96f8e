use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::{
        tables::{RowReadable, RowWritable, TableId, TableInfoRef},
        token::Token,
    },
    Result,
};

/// The `NestedClass` table records which types are nested inside which enclosing
/// types. `TableId` = 0x29
///
/// Rows are sorted by the `nested_class` column.
#[derive(Clone, Debug)]
pub struct NestedClassRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// an index into the `TypeDef` table; the nested type
    pub nested_class: u32,
    /// an index into the `TypeDef` table; the enclosing type
    pub enclosing_class: u32,
}

impl RowReadable for NestedClassRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* nested_class */    sizes.table_index_bytes(TableId::TypeDef) +
            /* enclosing_class */ sizes.table_index_bytes(TableId::TypeDef)
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(NestedClassRaw {
            rid,
            token: Token::new(0x2900_0000 + rid),
            offset: *offset,
            nested_class: read_le_at_dyn(data, offset, sizes.is_large(TableId::TypeDef))?,
            enclosing_class: read_le_at_dyn(data, offset, sizes.is_large(TableId::TypeDef))?,
        })
    }
}

impl RowWritable for NestedClassRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at_dyn(data, offset, self.nested_class, sizes.is_large(TableId::TypeDef))?;
        write_le_at_dyn(
            data,
            offset,
            self.enclosing_class,
            sizes.is_large(TableId::TypeDef),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::tables::{MetadataTable, TableInfo};

    #[test]
    fn crafted_short() {
        let data = vec![
            0x02, 0x00, // nested_class
            0x01, 0x00, // enclosing_class
        ];

        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::TypeDef, 2)],
            false,
            false,
            false,
        ));
        let table = MetadataTable::<NestedClassRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x29000001);
        assert_eq!(row.nested_class, 2);
        assert_eq!(row.enclosing_class, 1);
    }

    #[test]
    fn crafted_large_table() {
        let data = vec![
            0x01, 0x00, 0x02, 0x00, // nested_class (4 bytes)
            0x02, 0x00, 0x00, 0x00, // enclosing_class (4 bytes)
        ];

        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::TypeDef, 0x0002_0000)],
            false,
            false,
            false,
        ));
        let table = MetadataTable::<NestedClassRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.nested_class, 0x0002_0001);
        assert_eq!(row.enclosing_class, 2);
    }
}
