//! Tables stream (`#~`) reader.
//!
//! The `#~` stream carries the metadata tables: a 24-byte header (schema
//! version, heap-size flags, valid and sorted bitmaps), one row count per
//! present table, then the packed rows in ascending table-id order. Row and
//! column widths depend on the final row counts and heap sizes, so the whole
//! header must be decoded before any row can be located.

use std::sync::Arc;
use strum::IntoEnumIterator;

use crate::{
    file::io::read_le,
    metadata::tables::{
        AssemblyRaw, AssemblyRefRaw, ConstantRaw, CustomAttributeRaw, FieldRaw, InterfaceImplRaw,
        MemberRefRaw, MetadataTable, MethodDefRaw, ModuleRaw, NestedClassRaw, ParamRaw,
        RowReadable, StandAloneSigRaw, TableId, TableInfo, TableInfoRef, TypeDefRaw, TypeRefRaw,
        TypeSpecRaw,
    },
    Error::OutOfBounds,
    Result,
};

/// Byte width of one row for a table this reader knows how to decode.
fn known_row_size(table_id: TableId, info: &TableInfoRef) -> Option<u32> {
    Some(match table_id {
        TableId::Module => ModuleRaw::row_size(info),
        TableId::TypeRef => TypeRefRaw::row_size(info),
        TableId::TypeDef => TypeDefRaw::row_size(info),
        TableId::Field => FieldRaw::row_size(info),
        TableId::MethodDef => MethodDefRaw::row_size(info),
        TableId::Param => ParamRaw::row_size(info),
        TableId::InterfaceImpl => InterfaceImplRaw::row_size(info),
        TableId::MemberRef => MemberRefRaw::row_size(info),
        TableId::Constant => ConstantRaw::row_size(info),
        TableId::CustomAttribute => CustomAttributeRaw::row_size(info),
        TableId::StandAloneSig => StandAloneSigRaw::row_size(info),
        TableId::TypeSpec => TypeSpecRaw::row_size(info),
        TableId::Assembly => AssemblyRaw::row_size(info),
        TableId::AssemblyRef => AssemblyRefRaw::row_size(info),
        TableId::NestedClass => NestedClassRaw::row_size(info),
        _ => return None,
    })
}

/// Decoded header of the `#~` stream with lazy access to its tables.
///
/// Row data stays in place; [`TablesHeader::table`] builds a typed
/// [`MetadataTable`] view over the relevant byte range on each call, and rows
/// are decoded only when accessed through that view.
///
/// A present table whose schema this reader does not carry blocks access to
/// itself and to every table after it, since its row width (and therefore the
/// following table's start offset) is unknown.
pub struct TablesHeader<'a> {
    /// Major version of the table schema, shall be 2
    pub major_version: u8,
    /// Minor version of the table schema, shall be 0
    pub minor_version: u8,
    /// Bit vector of present tables
    pub valid: u64,
    /// Bit vector of tables with sorted rows
    pub sorted: u64,
    /// Row counts and index widths for all tables
    pub info: TableInfoRef,
    data: &'a [u8],
    /// Start offset of each present, locatable table within `data`
    offsets: Vec<Option<usize>>,
    /// First present table without a known schema, if any
    unsupported: Option<TableId>,
}

impl<'a> TablesHeader<'a> {
    /// Decode a `#~` stream.
    ///
    /// ## Arguments
    /// * `data` - The full stream, starting at its 24-byte header
    ///
    /// # Errors
    /// Returns an error if the stream is truncated, the valid bitmap is empty,
    /// or a row count region runs past the end of the data
    pub fn from(data: &'a [u8]) -> Result<TablesHeader<'a>> {
        if data.len() < 24 {
            return Err(OutOfBounds);
        }

        let valid = read_le::<u64>(&data[8..])?;
        if valid == 0 {
            return Err(malformed_error!("No valid rows in any of the tables"));
        }

        let info: TableInfoRef = Arc::new(TableInfo::new(data, valid)?);

        let mut offsets = vec![None; TableId::GenericParamConstraint as usize + 1];
        let mut unsupported = None;
        let mut current_offset = (24 + valid.count_ones() * 4) as usize;

        for table_id in TableId::iter() {
            let rows = info.get(table_id).rows;
            if rows == 0 {
                continue;
            }

            let Some(row_size) = known_row_size(table_id, &info) else {
                unsupported = Some(table_id);
                break;
            };

            let table_bytes = rows as usize * row_size as usize;
            let Some(next_offset) = current_offset.checked_add(table_bytes) else {
                return Err(OutOfBounds);
            };
            if next_offset > data.len() {
                return Err(OutOfBounds);
            }

            offsets[table_id as usize] = Some(current_offset);
            current_offset = next_offset;
        }

        Ok(TablesHeader {
            major_version: read_le::<u8>(&data[4..])?,
            minor_version: read_le::<u8>(&data[5..])?,
            valid,
            sorted: read_le::<u64>(&data[16..])?,
            info,
            data,
            offsets,
            unsupported,
        })
    }

    /// Number of present tables.
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Returns `true` if the given table is present in the valid bitmap.
    #[must_use]
    pub fn has_table(&self, table_id: TableId) -> bool {
        self.valid & (1 << table_id as usize) != 0
    }

    /// Returns `true` if the given table is flagged sorted.
    #[must_use]
    pub fn is_sorted(&self, table_id: TableId) -> bool {
        self.sorted & (1 << table_id as usize) != 0
    }

    /// Row count of the given table; 0 if absent.
    #[must_use]
    pub fn row_count(&self, table_id: TableId) -> u32 {
        self.info.get(table_id).rows
    }

    /// Build a typed view over one table.
    ///
    /// The row type `T` must be the raw type matching `table_id`
    /// (`TableId::TypeDef` with [`TypeDefRaw`], and so on); a mismatched
    /// pairing misdecodes rows.
    ///
    /// ## Returns
    /// * `Ok(Some(table))` - The table is present and locatable
    /// * `Ok(None)` - The table is absent
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] if the table (or an earlier
    /// present table) has no known schema
    pub fn table<T: RowReadable>(
        &self,
        table_id: TableId,
    ) -> Result<Option<MetadataTable<'a, T>>> {
        if !self.has_table(table_id) {
            return Ok(None);
        }

        match self.offsets[table_id as usize] {
            Some(offset) => Ok(Some(MetadataTable::new(
                &self.data[offset..],
                self.info.get(table_id).rows,
                self.info.clone(),
            )?)),
            None => Err(crate::Error::NotSupported),
        }
    }

    /// First present table without a known schema, if any.
    #[must_use]
    pub fn first_unsupported(&self) -> Option<TableId> {
        self.unsupported
    }
}
