use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::{
        tables::{RowReadable, RowWritable, TableId, TableInfoRef},
        token::Token,
    },
    Result,
};

/// The `MethodDef` table defines methods within types. `TableId` = 0x06
///
/// The `rva` field addresses the method body; 0 means the method has no
/// body (abstract, extern).
#[derive(Clone, Debug)]
pub struct MethodDefRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// a 4-byte value; RVA of the method body, or 0
    pub rva: u32,
    /// a 2-byte bitmask of type `MethodImplAttributes`
    pub impl_flags: u16,
    /// a 2-byte bitmask of type `MethodAttributes`
    pub flags: u16,
    /// an index into the String heap
    pub name: u32,
    /// an index into the Blob heap; the method signature
    pub signature: u32,
    /// an index into the Param table; first of a contiguous run owned by this method
    pub param_list: u32,
}

impl RowReadable for MethodDefRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* rva */        4 +
            /* impl_flags */ 2 +
            /* flags */      2 +
            /* name */       sizes.str_bytes() +
            /* signature */  sizes.blob_bytes() +
            /* param_list */ sizes.table_index_bytes(TableId::Param)
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(MethodDefRaw {
            rid,
            token: Token::new(0x0600_0000 + rid),
            offset: *offset,
            rva: read_le_at::<u32>(data, offset)?,
            impl_flags: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            signature: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
            param_list: read_le_at_dyn(data, offset, sizes.is_large(TableId::Param))?,
        })
    }
}

impl RowWritable for MethodDefRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at(data, offset, self.rva)?;
        write_le_at(data, offset, self.impl_flags)?;
        write_le_at(data, offset, self.flags)?;
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.signature, sizes.is_large_blob())?;
        write_le_at_dyn(data, offset, self.param_list, sizes.is_large(TableId::Param))?;
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
            0x00, 0x20, 0x00, 0x00, // rva
            0x00, 0x00, // impl_flags
            0x96, 0x00, // flags
            0x42, 0x00, // name
            0x10, 0x00, // signature
            0x01, 0x00, // param_list
        ];

        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::Param, 1)],
            false,
            false,
            false,
        ));
        let table = MetadataTable::<MethodDefRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x06000001);
        assert_eq!(row.rva, 0x2000);
        assert_eq!(row.flags, 0x96);
        assert_eq!(row.param_list, 1);
    }

    #[test]
    fn write_round_trip() {
        let sizes = Arc::new(TableInfo::from_counts(
            &[(TableId::Param, 1)],
            false,
            false,
            false,
        ));
        let row = MethodDefRaw {
            rid: 1,
            token: Token::new(0x06000001),
            offset: 0,
            rva: 0x2054,
            impl_flags: 0,
            flags: 0x0096,
            name: 0x42,
            signature: 0x10,
            param_list: 1,
        };

        let mut data = vec![0u8; MethodDefRaw::row_size(&sizes) as usize];
        let mut offset = 0;
        row.row_write(&mut data, &mut offset, &sizes).unwrap();

        let table = MetadataTable::<MethodDefRaw>::new(&data, 1, sizes).unwrap();
        let back = table.get(1).unwrap();
        assert_eq!(back.rva, 0x2054);
        assert_eq!(back.name, 0x42);
    }
}
