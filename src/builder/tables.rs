//! Row accumulation and `#~` stream serialization for the write side.
//!
//! [`TableStore`] collects raw rows for every table this crate materializes.
//! Appending assigns the next row id and returns the row's token, so callers
//! can wire cross-references as they build. Before emission the store sorts
//! the relation tables the format requires sorted, then serializes the
//! complete `#~` stream against a frozen [`TableInfo`].

use std::sync::Arc;

use strum::IntoEnumIterator;

use crate::{
    file::io::push_le,
    metadata::{
        tables::{
            AssemblyRaw, AssemblyRefRaw, CodedIndexType, ConstantRaw, CustomAttributeRaw,
            FieldRaw, InterfaceImplRaw, MemberRefRaw, MethodDefRaw, ModuleRaw, NestedClassRaw,
            ParamRaw, RowReadable, RowWritable, StandAloneSigRaw, TableId, TableInfo,
            TableInfoRef, TypeDefRaw, TypeRefRaw, TypeSpecRaw,
        },
        token::Token,
    },
    Result,
};

macro_rules! push_row {
    ($(#[$doc:meta])* $name:ident, $field:ident, $row:ty, $id:expr) => {
        $(#[$doc])*
        #[allow(clippy::cast_possible_truncation)]
        pub fn $name(&mut self, mut row: $row) -> Token {
            let rid = self.$field.len() as u32 + 1;
            row.rid = rid;
            row.token = Token::from_parts($id, rid);
            let token = row.token;
            self.$field.push(row);
            token
        }
    };
}

/// Accumulates table rows and serializes them as one `#~` stream body.
#[derive(Default)]
pub struct TableStore {
    module: Vec<ModuleRaw>,
    type_ref: Vec<TypeRefRaw>,
    type_def: Vec<TypeDefRaw>,
    field: Vec<FieldRaw>,
    method_def: Vec<MethodDefRaw>,
    param: Vec<ParamRaw>,
    interface_impl: Vec<InterfaceImplRaw>,
    member_ref: Vec<MemberRefRaw>,
    constant: Vec<ConstantRaw>,
    custom_attribute: Vec<CustomAttributeRaw>,
    standalone_sig: Vec<StandAloneSigRaw>,
    type_spec: Vec<TypeSpecRaw>,
    assembly: Vec<AssemblyRaw>,
    assembly_ref: Vec<AssemblyRefRaw>,
    nested_class: Vec<NestedClassRaw>,
}

impl TableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        TableStore::default()
    }

    push_row!(
        /// Append a `Module` row, returning its token.
        push_module, module, ModuleRaw, TableId::Module
    );
    push_row!(
        /// Append a `TypeRef` row, returning its token.
        push_type_ref, type_ref, TypeRefRaw, TableId::TypeRef
    );
    push_row!(
        /// Append a `TypeDef` row, returning its token.
        push_type_def, type_def, TypeDefRaw, TableId::TypeDef
    );
    push_row!(
        /// Append a `Field` row, returning its token.
        push_field, field, FieldRaw, TableId::Field
    );
    push_row!(
        /// Append a `MethodDef` row, returning its token.
        push_method_def, method_def, MethodDefRaw, TableId::MethodDef
    );
    push_row!(
        /// Append a `Param` row, returning its token.
        push_param, param, ParamRaw, TableId::Param
    );
    push_row!(
        /// Append an `InterfaceImpl` row, returning its token.
        push_interface_impl, interface_impl, InterfaceImplRaw, TableId::InterfaceImpl
    );
    push_row!(
        /// Append a `MemberRef` row, returning its token.
        push_member_ref, member_ref, MemberRefRaw, TableId::MemberRef
    );
    push_row!(
        /// Append a `Constant` row, returning its token.
        push_constant, constant, ConstantRaw, TableId::Constant
    );
    push_row!(
        /// Append a `CustomAttribute` row, returning its token.
        push_custom_attribute, custom_attribute, CustomAttributeRaw, TableId::CustomAttribute
    );
    push_row!(
        /// Append a `StandAloneSig` row, returning its token.
        push_standalone_sig, standalone_sig, StandAloneSigRaw, TableId::StandAloneSig
    );
    push_row!(
        /// Append a `TypeSpec` row, returning its token.
        push_type_spec, type_spec, TypeSpecRaw, TableId::TypeSpec
    );
    push_row!(
        /// Append an `Assembly` row, returning its token.
        push_assembly, assembly, AssemblyRaw, TableId::Assembly
    );
    push_row!(
        /// Append an `AssemblyRef` row, returning its token.
        push_assembly_ref, assembly_ref, AssemblyRefRaw, TableId::AssemblyRef
    );
    push_row!(
        /// Append a `NestedClass` row, returning its token.
        push_nested_class, nested_class, NestedClassRaw, TableId::NestedClass
    );

    /// Mutable access to a `MethodDef` row by its token, for RVA patching
    /// once body placement is known.
    pub fn method_def_mut(&mut self, token: Token) -> Option<&mut MethodDefRaw> {
        if token.table() != TableId::MethodDef as u8 || token.row() == 0 {
            return None;
        }
        self.method_def.get_mut(token.row() as usize - 1)
    }

    /// Tokens of all `MethodDef` rows in row order.
    #[must_use]
    pub fn method_def_tokens(&self) -> Vec<Token> {
        self.method_def.iter().map(|row| row.token).collect()
    }

    /// Row count of one table.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn row_count(&self, table: TableId) -> u32 {
        (match table {
            TableId::Module => self.module.len(),
            TableId::TypeRef => self.type_ref.len(),
            TableId::TypeDef => self.type_def.len(),
            TableId::Field => self.field.len(),
            TableId::MethodDef => self.method_def.len(),
            TableId::Param => self.param.len(),
            TableId::InterfaceImpl => self.interface_impl.len(),
            TableId::MemberRef => self.member_ref.len(),
            TableId::Constant => self.constant.len(),
            TableId::CustomAttribute => self.custom_attribute.len(),
            TableId::StandAloneSig => self.standalone_sig.len(),
            TableId::TypeSpec => self.type_spec.len(),
            TableId::Assembly => self.assembly.len(),
            TableId::AssemblyRef => self.assembly_ref.len(),
            TableId::NestedClass => self.nested_class.len(),
            _ => 0,
        }) as u32
    }

    /// `(table, row_count)` for every non-empty table, in table-id order.
    #[must_use]
    pub fn row_counts(&self) -> Vec<(TableId, u32)> {
        TableId::iter()
            .filter_map(|table| {
                let count = self.row_count(table);
                (count > 0).then_some((table, count))
            })
            .collect()
    }

    /// Presence bitmap for the `#~` header.
    #[must_use]
    pub fn valid_bitmap(&self) -> u64 {
        self.row_counts()
            .iter()
            .fold(0, |bits, (table, _)| bits | 1 << *table as usize)
    }

    /// Sorted bitmap for the `#~` header: the relation tables this store
    /// keeps sorted, where present.
    #[must_use]
    pub fn sorted_bitmap(&self) -> u64 {
        [
            TableId::InterfaceImpl,
            TableId::Constant,
            TableId::CustomAttribute,
            TableId::NestedClass,
        ]
        .iter()
        .filter(|table| self.row_count(**table) > 0)
        .fold(0, |bits, table| bits | 1 << *table as usize)
    }

    /// Freeze the width decisions for the current row counts and heap sizes.
    #[must_use]
    pub fn table_info(&self, large_str: bool, large_blob: bool, large_guid: bool) -> TableInfoRef {
        Arc::new(TableInfo::from_counts(
            &self.row_counts(),
            large_str,
            large_blob,
            large_guid,
        ))
    }

    /// Stable-sort the relation tables by their parent key and renumber
    /// their row ids.
    ///
    /// Row order everywhere else is append order; tokens handed out for the
    /// sorted tables are not stable across this call, which is why no other
    /// table column references them.
    pub fn sort_relations(&mut self) {
        self.interface_impl.sort_by_key(|row| row.class);
        self.constant.sort_by_key(|row| {
            row.parent
                .encode(CodedIndexType::HasConstant)
                .unwrap_or(u32::MAX)
        });
        self.custom_attribute.sort_by_key(|row| {
            row.parent
                .encode(CodedIndexType::HasCustomAttribute)
                .unwrap_or(u32::MAX)
        });
        self.nested_class.sort_by_key(|row| row.nested_class);

        renumber(&mut self.interface_impl, TableId::InterfaceImpl, |r, t, i| {
            r.rid = i;
            r.token = t;
        });
        renumber(&mut self.constant, TableId::Constant, |r, t, i| {
            r.rid = i;
            r.token = t;
        });
        renumber(&mut self.custom_attribute, TableId::CustomAttribute, |r, t, i| {
            r.rid = i;
            r.token = t;
        });
        renumber(&mut self.nested_class, TableId::NestedClass, |r, t, i| {
            r.rid = i;
            r.token = t;
        });
    }

    /// Serialize the complete `#~` stream: header, row counts and rows.
    ///
    /// `heap_flags` is the `HeapSizes` byte and must agree with the width
    /// decisions frozen into `info`.
    ///
    /// # Errors
    /// Returns an error if any row field exceeds the width selected for it
    pub fn build_stream(&self, heap_flags: u8, info: &TableInfoRef) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        push_le::<u32>(&mut data, 0); // reserved
        data.push(2); // schema major
        data.push(0); // schema minor
        data.push(heap_flags);
        data.push(1); // reserved
        push_le::<u64>(&mut data, self.valid_bitmap());
        push_le::<u64>(&mut data, self.sorted_bitmap());

        for (_, count) in self.row_counts() {
            push_le::<u32>(&mut data, count);
        }

        let header_len = data.len();
        data.resize(header_len + self.rows_size(info), 0);

        let mut offset = header_len;
        self.write_rows(&mut data, &mut offset, info)?;

        Ok(data)
    }

    /// Total byte size of all rows at the given widths.
    fn rows_size(&self, info: &TableInfoRef) -> usize {
        let mut total = 0usize;
        for (table, count) in self.row_counts() {
            let row_size = match table {
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
                _ => 0,
            };
            total += count as usize * row_size as usize;
        }
        total
    }

    /// Write every row in ascending table-id order.
    fn write_rows(&self, data: &mut [u8], offset: &mut usize, info: &TableInfoRef) -> Result<()> {
        for row in &self.module {
            row.row_write(data, offset, info)?;
        }
        for row in &self.type_ref {
            row.row_write(data, offset, info)?;
        }
        for row in &self.type_def {
            row.row_write(data, offset, info)?;
        }
        for row in &self.field {
            row.row_write(data, offset, info)?;
        }
        for row in &self.method_def {
            row.row_write(data, offset, info)?;
        }
        for row in &self.param {
            row.row_write(data, offset, info)?;
        }
        for row in &self.interface_impl {
            row.row_write(data, offset, info)?;
        }
        for row in &self.member_ref {
            row.row_write(data, offset, info)?;
        }
        for row in &self.constant {
            row.row_write(data, offset, info)?;
        }
        for row in &self.custom_attribute {
            row.row_write(data, offset, info)?;
        }
        for row in &self.standalone_sig {
            row.row_write(data, offset, info)?;
        }
        for row in &self.type_spec {
            row.row_write(data, offset, info)?;
        }
        for row in &self.assembly {
            row.row_write(data, offset, info)?;
        }
        for row in &self.assembly_ref {
            row.row_write(data, offset, info)?;
        }
        for row in &self.nested_class {
            row.row_write(data, offset, info)?;
        }
        Ok(())
    }
}

fn renumber<T>(rows: &mut [T], table: TableId, mut apply: impl FnMut(&mut T, Token, u32)) {
    for (index, row) in rows.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let rid = index as u32 + 1;
        apply(row, Token::from_parts(table, rid), rid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        streams::TablesHeader,
        tables::CodedIndex,
    };

    fn module_row(name: u32, mvid: u32) -> ModuleRaw {
        ModuleRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            generation: 0,
            name,
            mvid,
            encid: 0,
            encbaseid: 0,
        }
    }

    fn type_def_row(name: u32) -> TypeDefRaw {
        TypeDefRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            flags: 0,
            type_name: name,
            type_namespace: 0,
            extends: CodedIndex::new(TableId::TypeDef, 0),
            field_list: 1,
            method_list: 1,
        }
    }

    #[test]
    fn tokens_follow_append_order() {
        let mut store = TableStore::new();
        let module = store.push_module(module_row(1, 1));
        let first = store.push_type_def(type_def_row(10));
        let second = store.push_type_def(type_def_row(20));

        assert_eq!(module.value(), 0x0000_0001);
        assert_eq!(first.value(), 0x0200_0001);
        assert_eq!(second.value(), 0x0200_0002);
        assert_eq!(store.row_count(TableId::TypeDef), 2);
    }

    #[test]
    fn bitmaps_track_presence() {
        let mut store = TableStore::new();
        store.push_module(module_row(1, 1));
        store.push_type_def(type_def_row(10));

        let valid = store.valid_bitmap();
        assert_eq!(valid, (1 << 0x00) | (1 << 0x02));
        assert_eq!(store.sorted_bitmap(), 0);

        store.push_nested_class(NestedClassRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            nested_class: 2,
            enclosing_class: 1,
        });
        assert_eq!(store.sorted_bitmap(), 1 << 0x29);
    }

    #[test]
    fn relations_sort_stably_by_parent() {
        let mut store = TableStore::new();
        for (nested, enclosing) in [(5, 1), (2, 1), (5, 3), (4, 2)] {
            store.push_nested_class(NestedClassRaw {
                rid: 0,
                token: Token::new(0),
                offset: 0,
                nested_class: nested,
                enclosing_class: enclosing,
            });
        }

        store.sort_relations();

        let order: Vec<(u32, u32)> = store
            .nested_class
            .iter()
            .map(|row| (row.nested_class, row.enclosing_class))
            .collect();
        // Ties keep insertion order
        assert_eq!(order, vec![(2, 1), (4, 2), (5, 1), (5, 3)]);
        assert_eq!(store.nested_class[0].rid, 1);
        assert_eq!(store.nested_class[3].token.value(), 0x2900_0004);
    }

    #[test]
    fn constants_sort_by_coded_parent() {
        let mut store = TableStore::new();
        for (tag, row) in [
            (TableId::Param, 3),
            (TableId::Field, 1),
            (TableId::Field, 2),
        ] {
            store.push_constant(ConstantRaw {
                rid: 0,
                token: Token::new(0),
                offset: 0,
                base_type: 0x08,
                padding: 0,
                parent: CodedIndex::new(tag, row),
                value: 0,
            });
        }

        store.sort_relations();

        let parents: Vec<(TableId, u32)> = store
            .constant
            .iter()
            .map(|row| (row.parent.tag, row.parent.row))
            .collect();
        // Coded value orders by row first, then candidate tag
        assert_eq!(
            parents,
            vec![
                (TableId::Field, 1),
                (TableId::Field, 2),
                (TableId::Param, 3)
            ]
        );
    }

    #[test]
    fn stream_round_trips_through_reader() {
        let mut store = TableStore::new();
        store.push_module(module_row(1, 1));
        store.push_type_def(type_def_row(10));
        store.push_method_def(MethodDefRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            rva: 0x2054,
            impl_flags: 0,
            flags: 0x0096,
            name: 0x20,
            signature: 0x05,
            param_list: 1,
        });

        let info = store.table_info(false, false, false);
        let stream = store.build_stream(0, &info).unwrap();

        let header = TablesHeader::from(&stream).unwrap();
        assert_eq!(header.table_count(), 3);
        assert_eq!(header.row_count(TableId::MethodDef), 1);
        assert!(!header.is_sorted(TableId::TypeDef));

        let methods = header
            .table::<MethodDefRaw>(TableId::MethodDef)
            .unwrap()
            .unwrap();
        let method = methods.get(1).unwrap();
        assert_eq!(method.rva, 0x2054);
        assert_eq!(method.flags, 0x0096);
        assert_eq!(method.name, 0x20);
    }
}
