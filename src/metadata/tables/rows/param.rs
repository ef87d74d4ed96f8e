use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::{
        tables::{RowReadable, RowWritable, TableInfoRef},
        token::Token,
    },
    Result,
};

/// The `Param` table defines parameters for methods. `TableId` = 0x08
#[derive(Clone, Debug)]
pub struct ParamRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// a 2-byte bitmask of type `ParamAttributes`
    pub flags: u16,
    /// a 2-byte value; parameter position, 0 is the return value
    pub sequence: u16,
    /// an index into the String heap
    pub name: u32,
}

impl RowReadable for ParamRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */    2 +
            /* sequence */ 2 +
            /* name */     sizes.str_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(ParamRaw {
            rid,
            token: Token::new(0x0800_0000 + rid),
            offset: *offset,
            flags: read_le_at::<u16>(data, offset)?,
            sequence: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for ParamRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at(data, offset, self.flags)?;
        write_le_at(data, offset, self.sequence)?;
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())?;
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
            0x00, 0x00, // flags
            0x01, 0x00, // sequence
            0x42, 0x00, // name
        ];

        let sizes = Arc::new(TableInfo::from_counts(&[], false, false, false));
        let table = MetadataTable::<ParamRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x08000001);
        assert_eq!(row.sequence, 1);
        assert_eq!(row.name, 0x42);
    }
}
