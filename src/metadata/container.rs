//! Top-level read access to a CIL metadata container.
//!
//! [`CilContainer`] ties the layers together: the PE envelope ([`crate::file::File`]),
//! the CLR runtime header, the metadata root with its stream directory, and
//! the typed stream readers. Loading validates the chain down to every row's
//! heap offsets and cross-table references; method bodies decode lazily on
//! first access.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::{
    file::File,
    metadata::{
        cor20header::Cor20Header,
        method::MethodBody,
        root::Root,
        streams::{Blob, Guid, Strings, TablesHeader, UserStrings},
        tables::{
            AssemblyRaw, AssemblyRefRaw, CodedIndex, ConstantRaw, CustomAttributeRaw, FieldRaw,
            InterfaceImplRaw, MemberRefRaw, MethodDefRaw, ModuleRaw, NestedClassRaw, ParamRaw,
            StandAloneSigRaw, TableId, TableInfoRef, TypeDefRaw, TypeRefRaw, TypeSpecRaw,
        },
        token::Token,
    },
    Result,
};

/// A loaded and reference-validated metadata container.
///
/// All stream views are built on demand from stored offsets; no parsed
/// structure holds a reference back into the container.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::CilContainer;
/// use std::path::Path;
///
/// let container = CilContainer::from_file(Path::new("library.dll"))?;
/// println!("metadata version {}", container.version());
///
/// let tables = container.tables()?;
/// println!("{} tables present", tables.table_count());
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct CilContainer {
    file: File,
    cor20: Cor20Header,
    version: String,
    /// Stream directory resolved to absolute file ranges: (name, offset, size)
    streams: Vec<(String, usize, usize)>,
    /// Decoded method bodies, keyed by `MethodDef` token
    bodies: Mutex<HashMap<Token, Arc<MethodBody>>>,
}

impl CilContainer {
    /// Load a container from a file on disk.
    ///
    /// # Errors
    /// Returns an error if the file is not a managed PE image, any header in
    /// the chain is malformed, or the resolve pass finds a dangling reference
    pub fn from_file(path: &Path) -> Result<CilContainer> {
        Self::load(File::from_file(path)?)
    }

    /// Load a container from an in-memory image.
    ///
    /// # Errors
    /// Returns an error if the buffer is not a managed PE image, any header in
    /// the chain is malformed, or the resolve pass finds a dangling reference
    pub fn from_mem(data: Vec<u8>) -> Result<CilContainer> {
        Self::load(File::from_mem(data)?)
    }

    fn load(file: File) -> Result<CilContainer> {
        let (clr_rva, clr_size) = file.clr();
        let clr_offset = file.rva_to_offset(clr_rva)?;
        let cor20 = Cor20Header::read(file.data_slice(clr_offset, clr_size.max(72))?)?;

        let meta_offset = file.rva_to_offset(cor20.meta_data_rva as usize)?;
        let meta_size = cor20.meta_data_size as usize;
        let root = Root::read(file.data_slice(meta_offset, meta_size)?)?;

        let streams = root
            .stream_headers
            .iter()
            .map(|header| {
                (
                    header.name.clone(),
                    meta_offset + header.offset as usize,
                    header.size as usize,
                )
            })
            .collect();

        let container = CilContainer {
            file,
            cor20,
            version: root.version,
            streams,
            bodies: Mutex::new(HashMap::new()),
        };

        container.resolve_references()?;

        Ok(container)
    }

    /// Metadata version string from the root header.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The CLR runtime header.
    #[must_use]
    pub fn cor20(&self) -> &Cor20Header {
        &self.cor20
    }

    /// Entry point token from the CLR header, if the image has one.
    #[must_use]
    pub fn entry_point(&self) -> Option<Token> {
        if self.cor20.entry_point_token == 0 {
            None
        } else {
            Some(Token::new(self.cor20.entry_point_token))
        }
    }

    /// The underlying PE container.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    fn stream_bytes(&self, name: &str) -> Result<&[u8]> {
        match self
            .streams
            .iter()
            .find(|(stream_name, _, _)| stream_name == name)
        {
            Some((_, offset, size)) => self.file.data_slice(*offset, *size),
            None => Err(malformed_error!("Container has no {} stream", name)),
        }
    }

    /// Returns `true` if the container carries the named stream.
    #[must_use]
    pub fn has_stream(&self, name: &str) -> bool {
        self.streams.iter().any(|(stream_name, _, _)| stream_name == name)
    }

    /// Build a view over the `#~` tables stream.
    ///
    /// # Errors
    /// Returns an error if the stream is absent or its header is malformed
    pub fn tables(&self) -> Result<TablesHeader<'_>> {
        TablesHeader::from(self.stream_bytes("#~")?)
    }

    /// Build a view over the `#Strings` heap.
    ///
    /// # Errors
    /// Returns an error if the stream is absent or malformed
    pub fn strings(&self) -> Result<Strings<'_>> {
        Strings::from(self.stream_bytes("#Strings")?)
    }

    /// Build a view over the `#Blob` heap.
    ///
    /// # Errors
    /// Returns an error if the stream is absent or malformed
    pub fn blob(&self) -> Result<Blob<'_>> {
        Blob::from(self.stream_bytes("#Blob")?)
    }

    /// Build a view over the `#GUID` heap.
    ///
    /// # Errors
    /// Returns an error if the stream is absent or malformed
    pub fn guid(&self) -> Result<Guid<'_>> {
        Guid::from(self.stream_bytes("#GUID")?)
    }

    /// Build a view over the `#US` heap.
    ///
    /// # Errors
    /// Returns an error if the stream is absent or malformed
    pub fn user_strings(&self) -> Result<UserStrings<'_>> {
        UserStrings::from(self.stream_bytes("#US")?)
    }

    /// Decode the body of the given `MethodDef` token.
    ///
    /// Bodies are decoded once and cached; repeated calls return the same
    /// [`MethodBody`].
    ///
    /// # Errors
    /// Returns an error if the token is not a `MethodDef`, the row does not
    /// exist, the method has no body (RVA 0), or the body is malformed
    pub fn method_body(&self, token: Token) -> Result<Arc<MethodBody>> {
        if let Ok(cache) = self.bodies.lock() {
            if let Some(body) = cache.get(&token) {
                return Ok(body.clone());
            }
        }

        let offset = self.method_body_offset(token)?;
        let remaining = self.file.len().saturating_sub(offset);
        let body = Arc::new(MethodBody::from(self.file.data_slice(offset, remaining)?)?);

        if let Ok(mut cache) = self.bodies.lock() {
            cache.insert(token, body.clone());
        }

        Ok(body)
    }

    /// The raw IL code bytes of the given `MethodDef` token.
    ///
    /// # Errors
    /// Same failure modes as [`CilContainer::method_body`]
    pub fn method_il(&self, token: Token) -> Result<&[u8]> {
        let body = self.method_body(token)?;
        let offset = self.method_body_offset(token)?;

        self.file
            .data_slice(offset + body.size_header, body.size_code)
    }

    fn method_body_offset(&self, token: Token) -> Result<usize> {
        if token.table() != TableId::MethodDef as u8 {
            return Err(crate::Error::UnresolvedReference(token));
        }

        let tables = self.tables()?;
        let Some(methods) = tables.table::<MethodDefRaw>(TableId::MethodDef)? else {
            return Err(crate::Error::UnresolvedReference(token));
        };
        let Some(row) = methods.get(token.row()) else {
            return Err(crate::Error::UnresolvedReference(token));
        };

        if row.rva == 0 {
            return Err(malformed_error!(
                "Method {} has no body",
                token
            ));
        }

        self.file.rva_to_offset(row.rva as usize)
    }

    /// Validate every heap offset, direct index and coded index of every
    /// supported table row.
    fn resolve_references(&self) -> Result<()> {
        let tables = self.tables()?;
        let info = tables.info.clone();

        let strings_len = self.stream_bytes("#Strings").map_or(1, <[u8]>::len);
        let blob_len = self.stream_bytes("#Blob").map_or(1, <[u8]>::len);
        let guid_count = self.stream_bytes("#GUID").map_or(0, |data| data.len() / 16);

        let check_str = |offset: u32, token: Token| -> Result<()> {
            if offset as usize >= strings_len {
                return Err(crate::Error::UnresolvedReference(token));
            }
            Ok(())
        };
        let check_blob = |offset: u32, token: Token| -> Result<()> {
            if offset as usize >= blob_len {
                return Err(crate::Error::UnresolvedReference(token));
            }
            Ok(())
        };
        let check_guid = |index: u32, token: Token| -> Result<()> {
            if index as usize > guid_count {
                return Err(crate::Error::UnresolvedReference(token));
            }
            Ok(())
        };
        let check_coded = |index: &CodedIndex, info: &TableInfoRef| -> Result<()> {
            if index.row != 0 && index.row > info.get(index.tag).rows {
                return Err(crate::Error::UnresolvedReference(index.token));
            }
            Ok(())
        };
        // List columns may point one past the last row to mark an empty run
        let check_list = |row: u32, target: TableId, info: &TableInfoRef, token: Token| -> Result<()> {
            if row > info.get(target).rows + 1 {
                return Err(crate::Error::UnresolvedReference(token));
            }
            Ok(())
        };
        let check_index = |row: u32, target: TableId, info: &TableInfoRef| -> Result<()> {
            if row == 0 || row > info.get(target).rows {
                return Err(crate::Error::UnresolvedReference(Token::from_parts(
                    target, row,
                )));
            }
            Ok(())
        };

        if let Some(table) = tables.table::<ModuleRaw>(TableId::Module)? {
            for row in &table {
                check_str(row.name, row.token)?;
                check_guid(row.mvid, row.token)?;
                check_guid(row.encid, row.token)?;
                check_guid(row.encbaseid, row.token)?;
            }
        }
        if let Some(table) = tables.table::<TypeRefRaw>(TableId::TypeRef)? {
            for row in &table {
                check_coded(&row.resolution_scope, &info)?;
                check_str(row.type_name, row.token)?;
                check_str(row.type_namespace, row.token)?;
            }
        }
        if let Some(table) = tables.table::<TypeDefRaw>(TableId::TypeDef)? {
            for row in &table {
                check_str(row.type_name, row.token)?;
                check_str(row.type_namespace, row.token)?;
                check_coded(&row.extends, &info)?;
                check_list(row.field_list, TableId::Field, &info, row.token)?;
                check_list(row.method_list, TableId::MethodDef, &info, row.token)?;
            }
        }
        if let Some(table) = tables.table::<FieldRaw>(TableId::Field)? {
            for row in &table {
                check_str(row.name, row.token)?;
                check_blob(row.signature, row.token)?;
            }
        }
        if let Some(table) = tables.table::<MethodDefRaw>(TableId::MethodDef)? {
            for row in &table {
                check_str(row.name, row.token)?;
                check_blob(row.signature, row.token)?;
                check_list(row.param_list, TableId::Param, &info, row.token)?;
            }
        }
        if let Some(table) = tables.table::<ParamRaw>(TableId::Param)? {
            for row in &table {
                check_str(row.name, row.token)?;
            }
        }
        if let Some(table) = tables.table::<InterfaceImplRaw>(TableId::InterfaceImpl)? {
            for row in &table {
                check_index(row.class, TableId::TypeDef, &info)?;
                check_coded(&row.interface, &info)?;
            }
        }
        if let Some(table) = tables.table::<MemberRefRaw>(TableId::MemberRef)? {
            for row in &table {
                check_coded(&row.class, &info)?;
                check_str(row.name, row.token)?;
                check_blob(row.signature, row.token)?;
            }
        }
        if let Some(table) = tables.table::<ConstantRaw>(TableId::Constant)? {
            for row in &table {
                check_coded(&row.parent, &info)?;
                check_blob(row.value, row.token)?;
            }
        }
        if let Some(table) = tables.table::<CustomAttributeRaw>(TableId::CustomAttribute)? {
            for row in &table {
                check_coded(&row.parent, &info)?;
                check_coded(&row.constructor, &info)?;
                check_blob(row.value, row.token)?;
            }
        }
        if let Some(table) = tables.table::<StandAloneSigRaw>(TableId::StandAloneSig)? {
            for row in &table {
                check_blob(row.signature, row.token)?;
            }
        }
        if let Some(table) = tables.table::<TypeSpecRaw>(TableId::TypeSpec)? {
            for row in &table {
                check_blob(row.signature, row.token)?;
            }
        }
        if let Some(table) = tables.table::<AssemblyRaw>(TableId::Assembly)? {
            for row in &table {
                check_blob(row.public_key, row.token)?;
                check_str(row.name, row.token)?;
                check_str(row.culture, row.token)?;
            }
        }
        if let Some(table) = tables.table::<AssemblyRefRaw>(TableId::AssemblyRef)? {
            for row in &table {
                check_blob(row.public_key_or_token, row.token)?;
                check_str(row.name, row.token)?;
                check_str(row.culture, row.token)?;
                check_blob(row.hash_value, row.token)?;
            }
        }
        if let Some(table) = tables.table::<NestedClassRaw>(TableId::NestedClass)? {
            for row in &table {
                check_index(row.nested_class, TableId::TypeDef, &info)?;
                check_index(row.enclosing_class, TableId::TypeDef, &info)?;
            }
        }

        Ok(())
    }
}
