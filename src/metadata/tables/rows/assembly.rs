use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::{
        tables::{RowReadable, RowWritable, TableInfoRef},
        token::Token,
    },
    Result,
};

/// The `Assembly` table describes the current assembly; zero or one row. `TableId` = 0x20
#[derive(Clone, Debug)]
pub struct AssemblyRaw {
    /// `RowID`
    pub rid: u32,
    /// Token
    pub token: Token,
    /// Offset
    pub offset: usize,
    /// a 4-byte constant of type `AssemblyHashAlgorithm`
    pub hash_alg_id: u32,
    /// a 2-byte version number
    pub major_version: u16,
    /// a 2-byte version number
    pub minor_version: u16,
    /// a 2-byte version number
    pub build_number: u16,
    /// a 2-byte version number
    pub revision_number: u16,
    /// a 4-byte bitmask of type `AssemblyFlags`
    pub flags: u32,
    /// an index into the Blob heap
    pub public_key: u32,
    /// an index into the String heap
    pub name: u32,
    /// an index into the String heap
    pub culture: u32,
}

impl RowReadable for AssemblyRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* hash_alg_id */     4 +
            /* major_version */   2 +
            /* minor_version */   2 +
            /* build_number */    2 +
            /* revision_number */ 2 +
            /* flags */           4 +
            /* public_key */      sizes.blob_bytes() +
            /* name */            sizes.str_bytes() +
            /* culture */         sizes.str_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyRaw {
            rid,
            token: Token::new(0x2000_0000 + rid),
            offset: *offset,
            hash_alg_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            culture: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for AssemblyRaw {
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()> {
        write_le_at(data, offset, self.hash_alg_id)?;
        write_le_at(data, offset, self.major_version)?;
        write_le_at(data, offset, self.minor_version)?;
        write_le_at(data, offset, self.build_number)?;
        write_le_at(data, offset, self.revision_number)?;
        write_le_at(data, offset, self.flags)?;
        write_le_at_dyn(data, offset, self.public_key, sizes.is_large_blob())?;
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.culture, sizes.is_large_str())?;
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
            0x04, 0x80, 0x00, 0x00, // hash_alg_id (SHA1)
            0x01, 0x00, // major_version
            0x02, 0x00, // minor_version
            0x03, 0x00, // build_number
            0x04, 0x00, // revision_number
            0x00, 0x00, 0x00, 0x00, // flags
            0x00, 0x00, // public_key
            0x42, 0x00, // name
            0x00, 0x00, // culture
        ];

        let sizes = Arc::new(TableInfo::from_counts(&[], false, false, false));
        let table = MetadataTable::<AssemblyRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();

        assert_eq!(row.token.value(), 0x20000001);
        assert_eq!(row.hash_alg_id, 0x8004);
        assert_eq!(row.major_version, 1);
        assert_eq!(row.revision_number, 4);
        assert_eq!(row.name, 0x42);
        assert_eq!(row.culture, 0);
    }

    #[test]
    fn write_round_trip() {
        let sizes = Arc::new(TableInfo::from_counts(&[], false, false, false));
        let row = AssemblyRaw {
            rid: 1,
            token: Token::new(0x20000001),
            offset: 0,
            hash_alg_id: 0x8004,
            major_version: 1,
            minor_version: 0,
            build_number: 0,
            revision_number: 0,
            flags: 0,
            public_key: 0,
            name: 0x42,
            culture: 0,
        };

        let mut data = vec![0u8; AssemblyRaw::row_size(&sizes) as usize];
        let mut offset = 0;
        row.row_write(&mut data, &mut offset, &sizes).unwrap();
        assert_eq!(offset, data.len());

        let table = MetadataTable::<AssemblyRaw>::new(&data, 1, sizes).unwrap();
        let back = table.get(1).unwrap();
        assert_eq!(back.hash_alg_id, 0x8004);
        assert_eq!(back.name, 0x42);
    }
}
