use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::{
        tables::{RowReadable, RowWritable, TableInfoRef},
        token::Token,
    },
    Result,
};

/// The `Field` table defines fields within types. `TableId` = 0x04
#[derive(Clone, Debug)]
pub struct FieldRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// a 2-byte bitmask of type `FieldAttributes`
    pub flags: u16,
    /// an index into the String heap
    pub name: u32,
    /// an index into the Blob heap; the field signature
    pub signature: u32,
}

impl RowReadable for FieldRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */     2 +
            /* name */      sizes.str_bytes() +
            /* signature */ sizes.blob_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(FieldRaw {
            rid,
            token: Token::new(0x0400_0000 + rid),
            offset: *offset,
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            signature: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for FieldRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at(data, offset, self.flags)?;
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.signature, sizes.is_large_blob())?;
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
            0x06, 0x00, // flags
            0x42, 0x00, // name
            0x10, 0x00, // signature
        ];

        let sizes = Arc::new(TableInfo::from_counts(&[], false, false, false));
        let table = MetadataTable::<FieldRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x04000001);
        assert_eq!(row.flags, 6);
        assert_eq!(row.name, 0x42);
        assert_eq!(row.signature, 0x10);
    }

    #[test]
    fn crafted_wide_heaps() {
        let data = vec![
            0x06, 0x00, // flags
            0x42, 0x00, 0x00, 0x00, // name (4 bytes)
            0x10, 0x00, 0x00, 0x00, // signature (4 bytes)
        ];

        let sizes = Arc::new(TableInfo::from_counts(&[], true, true, false));
        let table = MetadataTable::<FieldRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.name, 0x42);
        assert_eq!(row.signature, 0x10);
    }
}
