//! Metadata table machinery: table ids, adaptive widths, coded indices and
//! typed row access.
//!
//! # Architecture
//!
//! Row schemas are plain structs implementing [`RowReadable`] (decode) and
//! [`RowWritable`] (serialize). [`MetadataTable`] wraps a borrowed byte range
//! of the `#~` stream and decodes rows lazily on access; nothing is
//! materialized until a row is actually requested. All width decisions come
//! from [`TableInfo`], which must be fully populated (every present table's
//! row count, every heap's size class) before the first row is read or
//! written.

mod codedindex;
mod rows;
mod tableid;
mod tableinfo;

pub use codedindex::{CodedIndex, CodedIndexType};
pub use rows::*;
pub use tableid::TableId;
pub use tableinfo::{TableInfo, TableInfoRef, TableRowInfo};

use std::marker::PhantomData;

use crate::Result;

/// Trait for decoding metadata table rows from their binary form.
///
/// Implementors provide the row's on-disk size (which depends on the
/// container-wide width decisions in [`TableInfo`]) and the field-by-field
/// decode. Row ids follow the CLI specification's 1-based indexing.
pub trait RowReadable: Sized {
    /// Calculates the size in bytes of a single row for this table type.
    ///
    /// ## Arguments
    /// * `sizes` - Width decisions for heap indexes, table indexes and coded indexes
    fn row_size(sizes: &TableInfoRef) -> u32;

    /// Reads and parses a single row from the provided byte buffer.
    ///
    /// ## Arguments
    /// * `data` - The byte buffer containing the table data
    /// * `offset` - Current read position, advanced by the bytes consumed
    /// * `rid` - The 1-based row identifier for this entry
    /// * `sizes` - Width decisions for variable-sized fields
    ///
    /// ## Errors
    /// Returns an error if the buffer is truncated or a field is malformed.
    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self>;
}

/// Trait for serializing metadata table rows into their binary form.
///
/// Write counterpart of [`RowReadable`]. The same [`TableInfo`] used to
/// compute the row size must be used for serialization; widths are frozen
/// before the first row is written.
pub trait RowWritable: Sized {
    /// Serializes this row into the buffer at `offset`.
    ///
    /// ## Arguments
    /// * `data` - The buffer to write into, sized for the whole table
    /// * `offset` - Current write position, advanced by the bytes written
    /// * `sizes` - Width decisions for variable-sized fields
    ///
    /// ## Errors
    /// Returns an error if the buffer is too small or a field exceeds the
    /// width selected for it.
    fn row_write(&self, data: &mut [u8], offset: &mut usize, sizes: &TableInfoRef) -> Result<()>;
}

/// Generic container for metadata table data with typed row access.
///
/// Wraps the raw bytes of one table and decodes rows of type `T` on demand.
/// Rows use 1-based indexing; index 0 is the null reference.
pub struct MetadataTable<'a, T> {
    /// Raw bytes of this table within the `#~` stream
    data: &'a [u8],
    /// Number of rows present
    row_count: u32,
    /// Size of a single row in bytes
    row_size: u32,
    /// Container-wide width decisions
    sizes: TableInfoRef,
    _phantom: PhantomData<T>,
}

impl<'a, T: RowReadable> MetadataTable<'a, T> {
    /// Creates a new metadata table view over raw byte data.
    ///
    /// ## Arguments
    /// * `data` - The raw byte buffer containing the table data
    /// * `row_count` - The total number of rows present in the table
    /// * `sizes` - Width decisions used for row size calculation
    ///
    /// ## Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is smaller than
    /// `row_count` rows.
    pub fn new(data: &'a [u8], row_count: u32, sizes: TableInfoRef) -> Result<Self> {
        let row_size = T::row_size(&sizes);
        if (data.len() as u64) < u64::from(row_count) * u64::from(row_size) {
            return Err(out_of_bounds_error!());
        }

        Ok(MetadataTable {
            data,
            row_count,
            row_size,
            sizes,
            _phantom: PhantomData,
        })
    }

    /// Returns the total size of this table in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from(self.row_count) * u64::from(self.row_size)
    }

    /// Returns the size of a single row in bytes.
    #[must_use]
    pub fn row_size(&self) -> u32 {
        self.row_size
    }

    /// Returns the total number of rows in this table.
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Retrieves a specific row by its 1-based index.
    ///
    /// Returns `None` for index 0 (the null reference), out-of-range
    /// indices, or rows that fail to parse.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<T> {
        if index == 0 || self.row_count < index {
            return None;
        }

        T::row_read(
            self.data,
            &mut ((index as usize - 1) * self.row_size as usize),
            index,
            &self.sizes,
        )
        .ok()
    }

    /// Creates a sequential iterator over all rows in the table.
    #[must_use]
    pub fn iter(&'a self) -> TableIterator<'a, T> {
        TableIterator {
            table: self,
            current_row: 0,
            current_offset: 0,
        }
    }
}

impl<'a, T: RowReadable> IntoIterator for &'a MetadataTable<'a, T> {
    type Item = T;
    type IntoIter = TableIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Sequential iterator over metadata table rows, decoding on demand.
pub struct TableIterator<'a, T> {
    /// Reference to the table being iterated
    table: &'a MetadataTable<'a, T>,
    /// Current row number (0-based for internal tracking)
    current_row: u32,
    /// Current byte offset in the table data
    current_offset: usize,
}

impl<'a, T: RowReadable> Iterator for TableIterator<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.table.row_count {
            return None;
        }

        match T::row_read(
            self.table.data,
            &mut self.current_offset,
            self.current_row + 1,
            &self.table.sizes,
        ) {
            Ok(row) => {
                self.current_row += 1;
                Some(row)
            }
            Err(_) => None,
        }
    }
}
