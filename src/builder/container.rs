//! Whole-container emission.
//!
//! [`ContainerBuilder`] runs the write side in two passes. The collect pass
//! is the caller's: populate the heaps and tables, attach encoded method
//! bodies. The materialize pass is [`ContainerBuilder::build`]: relation
//! tables are sorted, body RVAs assigned and patched into their `MethodDef`
//! rows, index widths frozen from the final row counts and heap sizes, and
//! only then are the `#~` stream, heap streams, metadata root, CLR header
//! and the single-section PE32 envelope serialized.

use crate::{
    builder::{heaps::HeapManager, tables::TableStore},
    file::io::push_le,
    metadata::{root::METADATA_SIGNATURE, token::Token},
    Error::EncodeOverflow,
    Result,
};

/// RVA and file offset of the one `.text` section.
const SECTION_RVA: u32 = 0x2000;
const SECTION_RAW: u32 = 0x200;
const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x1000;

/// Size of the cor20 header, always at the start of the section.
const COR20_SIZE: u32 = 72;

/// `COMIMAGE_FLAGS_ILONLY`
const CLR_FLAGS: u32 = 0x0000_0001;

fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Builder for a complete managed PE image.
#[derive(Default)]
pub struct ContainerBuilder {
    heaps: HeapManager,
    tables: TableStore,
    version: Option<String>,
    entry_point: Option<Token>,
    bodies: Vec<(Token, Vec<u8>)>,
}

impl ContainerBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        ContainerBuilder::default()
    }

    /// The heap builders.
    pub fn heaps_mut(&mut self) -> &mut HeapManager {
        &mut self.heaps
    }

    /// The table store.
    pub fn tables_mut(&mut self) -> &mut TableStore {
        &mut self.tables
    }

    /// Override the metadata version string (default `v4.0.30319`).
    pub fn version(&mut self, version: &str) {
        self.version = Some(version.to_string());
    }

    /// Set the entry point token recorded in the CLR header.
    pub fn entry_point(&mut self, token: Token) {
        self.entry_point = Some(token);
    }

    /// Attach an encoded method body to a `MethodDef` row.
    ///
    /// The row's RVA is patched during [`ContainerBuilder::build`]; whatever
    /// placeholder it holds until then is overwritten.
    pub fn add_method_body(&mut self, method: Token, body: Vec<u8>) {
        self.bodies.push((method, body));
    }

    /// Materialize the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedReference`] if a body is attached to
    /// a token with no `MethodDef` row, and encoding errors if any structure
    /// outgrows its field widths
    pub fn build(&mut self) -> Result<Vec<u8>> {
        self.tables.sort_relations();

        // Bodies sit between the cor20 header and the metadata root, each
        // 4-byte aligned so fat headers land on their required boundary.
        let mut cursor = COR20_SIZE;
        let mut placed: Vec<(u32, &[u8])> = Vec::with_capacity(self.bodies.len());
        for (method, body) in &self.bodies {
            cursor = align_up(cursor, 4);
            let rva = SECTION_RVA + cursor;
            match self.tables.method_def_mut(*method) {
                Some(row) => row.rva = rva,
                None => return Err(crate::Error::UnresolvedReference(*method)),
            }
            placed.push((cursor, body.as_slice()));
            cursor += u32::try_from(body.len())
                .map_err(|_| EncodeOverflow(format!("method body of {} bytes", body.len())))?;
        }

        let metadata = self.build_metadata()?;
        let metadata_offset = align_up(cursor, 4);
        let metadata_size = u32::try_from(metadata.len())
            .map_err(|_| EncodeOverflow(format!("metadata blob of {} bytes", metadata.len())))?;

        // Section content, offsets relative to the section start
        let virtual_size = metadata_offset + metadata_size;
        let mut section = vec![0u8; virtual_size as usize];
        self.write_cor20(&mut section, SECTION_RVA + metadata_offset, metadata_size);
        for (offset, body) in placed {
            section[offset as usize..offset as usize + body.len()].copy_from_slice(body);
        }
        section[metadata_offset as usize..].copy_from_slice(&metadata);

        Ok(Self::build_pe(&section))
    }

    fn write_cor20(&self, section: &mut [u8], metadata_rva: u32, metadata_size: u32) {
        let mut header = Vec::with_capacity(COR20_SIZE as usize);
        push_le::<u32>(&mut header, COR20_SIZE); // cb
        push_le::<u16>(&mut header, 2); // runtime major
        push_le::<u16>(&mut header, 5); // runtime minor
        push_le::<u32>(&mut header, metadata_rva);
        push_le::<u32>(&mut header, metadata_size);
        push_le::<u32>(&mut header, CLR_FLAGS);
        push_le::<u32>(
            &mut header,
            self.entry_point.map_or(0, |token| token.value()),
        );
        header.resize(COR20_SIZE as usize, 0);
        section[..COR20_SIZE as usize].copy_from_slice(&header);
    }

    /// Assemble the metadata blob: root header, stream directory, streams.
    fn build_metadata(&self) -> Result<Vec<u8>> {
        let version = self.version.as_deref().unwrap_or("v4.0.30319");
        let version_padded = (version.len() + 1 + 3) & !3;

        let info = self.tables.table_info(
            self.heaps.large_strings(),
            self.heaps.large_blob(),
            self.heaps.large_guid(),
        );
        let tables_stream = self
            .tables
            .build_stream(self.heaps.heap_size_flags(), &info)?;

        let mut streams: Vec<(&str, &[u8])> = vec![
            ("#~", &tables_stream),
            ("#Strings", self.heaps.strings.bytes()),
            ("#US", self.heaps.user_strings.bytes()),
        ];
        if self.heaps.guid.size() > 0 {
            streams.push(("#GUID", self.heaps.guid.bytes()));
        }
        streams.push(("#Blob", self.heaps.blob.bytes()));

        // Directory entries are 8 bytes plus the padded name
        let directory_size: usize = streams
            .iter()
            .map(|(name, _)| 8 + ((name.len() + 1 + 3) & !3))
            .sum();
        let streams_start = 16 + version_padded + 4 + directory_size;

        let mut root = Vec::new();
        push_le::<u32>(&mut root, METADATA_SIGNATURE);
        push_le::<u16>(&mut root, 1); // major
        push_le::<u16>(&mut root, 1); // minor
        push_le::<u32>(&mut root, 0); // reserved
        let version_length = u32::try_from(version_padded)
            .map_err(|_| EncodeOverflow(format!("version string of {} bytes", version.len())))?;
        push_le::<u32>(&mut root, version_length);
        root.extend_from_slice(version.as_bytes());
        root.resize(16 + version_padded, 0);
        push_le::<u16>(&mut root, 0); // flags
        #[allow(clippy::cast_possible_truncation)]
        push_le::<u16>(&mut root, streams.len() as u16);

        let mut stream_offset = u32::try_from(streams_start)
            .map_err(|_| EncodeOverflow("metadata root header too large".into()))?;
        for (name, bytes) in &streams {
            let size = u32::try_from(bytes.len())
                .map_err(|_| EncodeOverflow(format!("{name} stream of {} bytes", bytes.len())))?;
            push_le::<u32>(&mut root, stream_offset);
            push_le::<u32>(&mut root, size);
            root.extend_from_slice(name.as_bytes());
            root.push(0);
            while root.len() % 4 != 0 {
                root.push(0);
            }
            stream_offset = align_up(
                stream_offset
                    .checked_add(size)
                    .ok_or_else(|| EncodeOverflow("metadata blob exceeds 4 GiB".into()))?,
                4,
            );
        }

        debug_assert_eq!(root.len(), streams_start);
        for (_, bytes) in &streams {
            root.extend_from_slice(bytes);
            while root.len() % 4 != 0 {
                root.push(0);
            }
        }

        Ok(root)
    }

    /// Wrap the section content in a minimal single-section PE32 image.
    fn build_pe(section: &[u8]) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let virtual_size = section.len() as u32;
        let raw_size = align_up(virtual_size, FILE_ALIGNMENT);
        let image_size = align_up(SECTION_RVA + virtual_size, SECTION_ALIGNMENT);

        let mut image = Vec::with_capacity((SECTION_RAW + raw_size) as usize);

        // DOS header: signature and the PE header offset at 0x3C
        image.extend_from_slice(b"MZ");
        image.resize(0x3C, 0);
        push_le::<u32>(&mut image, 0x80);
        image.resize(0x80, 0);

        // COFF header
        image.extend_from_slice(b"PE\0\0");
        push_le::<u16>(&mut image, 0x014C); // i386
        push_le::<u16>(&mut image, 1); // section count
        push_le::<u32>(&mut image, 0); // timestamp
        push_le::<u32>(&mut image, 0); // symbol table
        push_le::<u32>(&mut image, 0); // symbol count
        push_le::<u16>(&mut image, 0xE0); // optional header size
        push_le::<u16>(&mut image, 0x2102); // executable, 32-bit, dll

        // Optional header, PE32
        push_le::<u16>(&mut image, 0x010B);
        image.push(8); // linker major
        image.push(0); // linker minor
        push_le::<u32>(&mut image, raw_size); // size of code
        push_le::<u32>(&mut image, 0); // size of initialized data
        push_le::<u32>(&mut image, 0); // size of uninitialized data
        push_le::<u32>(&mut image, 0); // entry point (none, IL only)
        push_le::<u32>(&mut image, SECTION_RVA); // base of code
        push_le::<u32>(&mut image, 0); // base of data
        push_le::<u32>(&mut image, 0x0040_0000); // image base
        push_le::<u32>(&mut image, SECTION_ALIGNMENT);
        push_le::<u32>(&mut image, FILE_ALIGNMENT);
        push_le::<u16>(&mut image, 4); // os major
        push_le::<u16>(&mut image, 0); // os minor
        push_le::<u16>(&mut image, 0); // image major
        push_le::<u16>(&mut image, 0); // image minor
        push_le::<u16>(&mut image, 4); // subsystem major
        push_le::<u16>(&mut image, 0); // subsystem minor
        push_le::<u32>(&mut image, 0); // win32 version
        push_le::<u32>(&mut image, image_size);
        push_le::<u32>(&mut image, SECTION_RAW); // size of headers
        push_le::<u32>(&mut image, 0); // checksum
        push_le::<u16>(&mut image, 3); // subsystem: console
        push_le::<u16>(&mut image, 0); // dll characteristics
        push_le::<u32>(&mut image, 0x0010_0000); // stack reserve
        push_le::<u32>(&mut image, 0x1000); // stack commit
        push_le::<u32>(&mut image, 0x0010_0000); // heap reserve
        push_le::<u32>(&mut image, 0x1000); // heap commit
        push_le::<u32>(&mut image, 0); // loader flags
        push_le::<u32>(&mut image, 16); // data directory count

        // Data directories; only the CLR runtime header (#14) is populated
        for index in 0..16u32 {
            if index == 14 {
                push_le::<u32>(&mut image, SECTION_RVA);
                push_le::<u32>(&mut image, COR20_SIZE);
            } else {
                push_le::<u64>(&mut image, 0);
            }
        }

        // Section table: one .text entry
        image.extend_from_slice(b".text\0\0\0");
        push_le::<u32>(&mut image, virtual_size);
        push_le::<u32>(&mut image, SECTION_RVA);
        push_le::<u32>(&mut image, raw_size);
        push_le::<u32>(&mut image, SECTION_RAW);
        push_le::<u32>(&mut image, 0); // relocations
        push_le::<u32>(&mut image, 0); // line numbers
        push_le::<u16>(&mut image, 0);
        push_le::<u16>(&mut image, 0);
        push_le::<u32>(&mut image, 0x6000_0020); // code, execute, read

        image.resize(SECTION_RAW as usize, 0);
        image.extend_from_slice(section);
        image.resize((SECTION_RAW + raw_size) as usize, 0);

        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::MethodBodyBuilder,
        metadata::{
            container::CilContainer,
            tables::{CodedIndex, MethodDefRaw, ModuleRaw, TableId, TypeDefRaw},
        },
    };

    fn minimal_image() -> Vec<u8> {
        let mut builder = ContainerBuilder::new();

        let name = builder.heaps_mut().strings.add("test.dll").unwrap();
        let type_name = builder.heaps_mut().strings.add("<Module>").unwrap();
        let method_name = builder.heaps_mut().strings.add("Main").unwrap();
        let signature = builder.heaps_mut().blob.add(&[0x00, 0x00, 0x01]).unwrap();
        let mvid = builder
            .heaps_mut()
            .guid
            .add(uguid::guid!("12345678-1234-5678-1234-567812345678"));

        builder.tables_mut().push_module(ModuleRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            generation: 0,
            name,
            mvid,
            encid: 0,
            encbaseid: 0,
        });
        builder.tables_mut().push_type_def(TypeDefRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            flags: 0,
            type_name,
            type_namespace: 0,
            extends: CodedIndex::new(TableId::TypeDef, 0),
            field_list: 1,
            method_list: 1,
        });
        let method = builder.tables_mut().push_method_def(MethodDefRaw {
            rid: 0,
            token: Token::new(0),
            offset: 0,
            rva: 0,
            impl_flags: 0,
            flags: 0x0096,
            name: method_name,
            signature,
            param_list: 1,
        });

        let mut body = MethodBodyBuilder::new();
        body.instructions_mut().emit("ret").unwrap();
        builder.add_method_body(method, body.build().unwrap());
        builder.entry_point(method);

        builder.build().unwrap()
    }

    #[test]
    fn image_loads_and_resolves() {
        let image = minimal_image();
        let container = CilContainer::from_mem(image).unwrap();

        assert_eq!(container.version(), "v4.0.30319");
        assert_eq!(container.entry_point().unwrap().value(), 0x0600_0001);

        let tables = container.tables().unwrap();
        assert_eq!(tables.row_count(TableId::Module), 1);
        assert_eq!(tables.row_count(TableId::TypeDef), 1);
        assert_eq!(tables.row_count(TableId::MethodDef), 1);
    }

    #[test]
    fn heaps_survive_the_trip() {
        let image = minimal_image();
        let container = CilContainer::from_mem(image).unwrap();

        let tables = container.tables().unwrap();
        let methods = tables
            .table::<MethodDefRaw>(TableId::MethodDef)
            .unwrap()
            .unwrap();
        let method = methods.get(1).unwrap();

        let strings = container.strings().unwrap();
        assert_eq!(strings.get(method.name as usize).unwrap(), "Main");

        let blob = container.blob().unwrap();
        assert_eq!(
            blob.get(method.signature as usize).unwrap(),
            &[0x00, 0x00, 0x01]
        );

        let guids = container.guid().unwrap();
        assert_eq!(
            guids.get(1).unwrap(),
            uguid::guid!("12345678-1234-5678-1234-567812345678")
        );
    }

    #[test]
    fn method_body_is_addressable() {
        let image = minimal_image();
        let container = CilContainer::from_mem(image).unwrap();

        let body = container.method_body(Token::new(0x0600_0001)).unwrap();
        assert!(!body.is_fat);
        assert_eq!(body.size_code, 1);
        assert_eq!(container.method_il(Token::new(0x0600_0001)).unwrap(), &[0x2A]);
    }

    #[test]
    fn missing_method_row_is_rejected() {
        let mut builder = ContainerBuilder::new();
        builder.add_method_body(Token::new(0x0600_0001), vec![0x06, 0x2A]);
        assert!(matches!(
            builder.build(),
            Err(crate::Error::UnresolvedReference(_))
        ));
    }
}
