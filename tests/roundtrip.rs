//! Full write→read round trips through an in-memory image.

use cilforge::{
    assembly::{ExceptionRegion, InstructionBuffer, MethodBodyBuilder, RegionKind},
    builder::ContainerBuilder,
    metadata::{
        container::CilContainer,
        method::ExceptionHandlerFlags,
        tables::{CodedIndex, MethodDefRaw, ModuleRaw, TableId, TypeDefRaw, TypeRefRaw},
        token::Token,
    },
};

fn empty_row_token() -> Token {
    Token::new(0)
}

fn module_row(name: u32, mvid: u32) -> ModuleRaw {
    ModuleRaw {
        rid: 0,
        token: empty_row_token(),
        offset: 0,
        generation: 0,
        name,
        mvid,
        encid: 0,
        encbaseid: 0,
    }
}

fn type_def_row(name: u32, namespace: u32, method_list: u32) -> TypeDefRaw {
    TypeDefRaw {
        rid: 0,
        token: empty_row_token(),
        offset: 0,
        flags: 0x0010_0000,
        type_name: name,
        type_namespace: namespace,
        extends: CodedIndex::new(TableId::TypeRef, 0),
        field_list: 1,
        method_list,
    }
}

fn method_def_row(name: u32, signature: u32) -> MethodDefRaw {
    MethodDefRaw {
        rid: 0,
        token: empty_row_token(),
        offset: 0,
        rva: 0,
        impl_flags: 0,
        flags: 0x0096,
        name,
        signature,
        param_list: 1,
    }
}

/// Authors a body with a loop, a string literal and a try/catch region.
fn interesting_body(ldstr: Token, catch_type: Token) -> Vec<u8> {
    let mut builder = MethodBodyBuilder::new();
    let (try_start, try_end, handler_start, handler_end);
    {
        let buf = builder.instructions_mut();
        let done = buf.new_label();
        let top = buf.new_label();
        try_start = buf.new_label();
        try_end = buf.new_label();
        handler_start = buf.new_label();
        handler_end = buf.new_label();

        buf.place_label(try_start).unwrap();
        buf.emit_ldstr(ldstr).unwrap();
        buf.emit("pop").unwrap();
        buf.place_label(top).unwrap();
        buf.emit_i4("ldc.i4", 0).unwrap();
        buf.emit_branch("brtrue", top).unwrap();
        buf.emit_branch("leave", done).unwrap();
        buf.place_label(try_end).unwrap();
        buf.place_label(handler_start).unwrap();
        buf.emit("pop").unwrap();
        buf.emit_branch("leave", done).unwrap();
        buf.place_label(handler_end).unwrap();
        buf.place_label(done).unwrap();
        buf.emit("ret").unwrap();
    }
    builder.add_region(ExceptionRegion {
        kind: RegionKind::TypedCatch(catch_type),
        try_start,
        try_end,
        handler_start,
        handler_end,
    });

    builder.build().unwrap()
}

fn build_image() -> Vec<u8> {
    let mut builder = ContainerBuilder::new();

    let module_name = builder.heaps_mut().strings.add("roundtrip.dll").unwrap();
    let ns = builder.heaps_mut().strings.add("Demo").unwrap();
    let type_name = builder.heaps_mut().strings.add("Program").unwrap();
    let exc_name = builder.heaps_mut().strings.add("Exception").unwrap();
    let exc_ns = builder.heaps_mut().strings.add("System").unwrap();
    let main_name = builder.heaps_mut().strings.add("Main").unwrap();
    let helper_name = builder.heaps_mut().strings.add("Helper").unwrap();
    let signature = builder.heaps_mut().blob.add(&[0x00, 0x00, 0x01]).unwrap();
    let mvid = builder
        .heaps_mut()
        .guid
        .add(uguid::guid!("0f8fad5b-d9cb-469f-a165-70867728950e"));
    let greeting = builder.heaps_mut().user_strings.add("Hello, World!").unwrap();

    builder.tables_mut().push_module(module_row(module_name, mvid));
    let exception_type = builder.tables_mut().push_type_ref(TypeRefRaw {
        rid: 0,
        token: empty_row_token(),
        offset: 0,
        resolution_scope: CodedIndex::new(TableId::Module, 1),
        type_name: exc_name,
        type_namespace: exc_ns,
    });
    builder
        .tables_mut()
        .push_type_def(type_def_row(type_name, ns, 1));
    let main = builder
        .tables_mut()
        .push_method_def(method_def_row(main_name, signature));
    let helper = builder
        .tables_mut()
        .push_method_def(method_def_row(helper_name, signature));

    builder.add_method_body(main, interesting_body(greeting, exception_type));

    let mut helper_body = MethodBodyBuilder::new();
    helper_body.instructions_mut().emit("ret").unwrap();
    builder.add_method_body(helper, helper_body.build().unwrap());

    builder.entry_point(main);
    builder.build().unwrap()
}

#[test]
fn container_round_trip() {
    let container = CilContainer::from_mem(build_image()).unwrap();

    assert_eq!(container.version(), "v4.0.30319");
    assert_eq!(container.entry_point().unwrap().value(), 0x0600_0001);

    let tables = container.tables().unwrap();
    assert_eq!(tables.row_count(TableId::Module), 1);
    assert_eq!(tables.row_count(TableId::TypeRef), 1);
    assert_eq!(tables.row_count(TableId::TypeDef), 1);
    assert_eq!(tables.row_count(TableId::MethodDef), 2);

    let methods = tables
        .table::<MethodDefRaw>(TableId::MethodDef)
        .unwrap()
        .unwrap();
    let strings = container.strings().unwrap();
    assert_eq!(
        strings.get(methods.get(1).unwrap().name as usize).unwrap(),
        "Main"
    );
    assert_eq!(
        strings.get(methods.get(2).unwrap().name as usize).unwrap(),
        "Helper"
    );
}

#[test]
fn body_decodes_with_exception_handler() {
    let container = CilContainer::from_mem(build_image()).unwrap();
    let body = container.method_body(Token::new(0x0600_0001)).unwrap();

    assert!(body.is_fat);
    assert_eq!(body.exception_handlers.len(), 1);

    let handler = &body.exception_handlers[0];
    assert_eq!(handler.flags, ExceptionHandlerFlags::EXCEPTION);
    assert_eq!(handler.class_token(), Some(Token::new(0x0100_0001)));
    assert_eq!(handler.try_offset, 0);
    assert_eq!(
        handler.try_offset + handler.try_length,
        handler.handler_offset
    );
}

#[test]
fn body_code_lifts_and_reencodes_identically() {
    let container = CilContainer::from_mem(build_image()).unwrap();
    let code = container.method_il(Token::new(0x0600_0001)).unwrap();

    let buffer = InstructionBuffer::from_code(code).unwrap();
    let layout = buffer.layout().unwrap();
    let reencoded = buffer.encode(&layout).unwrap();

    assert_eq!(reencoded, code);
}

#[test]
fn user_string_token_resolves_from_code() {
    let container = CilContainer::from_mem(build_image()).unwrap();
    let code = container.method_il(Token::new(0x0600_0001)).unwrap();

    // First instruction is ldstr with the literal's token
    assert_eq!(code[0], 0x72);
    let token = Token::new(u32::from_le_bytes([code[1], code[2], code[3], code[4]]));
    assert!(token.is_user_string());

    let heap = container.user_strings().unwrap();
    assert_eq!(
        heap.get(token.row() as usize).unwrap().to_string_lossy(),
        "Hello, World!"
    );
}

#[test]
fn second_body_round_trips_tiny() {
    let container = CilContainer::from_mem(build_image()).unwrap();
    let body = container.method_body(Token::new(0x0600_0002)).unwrap();

    assert!(!body.is_fat);
    assert_eq!(body.max_stack, 8);
    assert_eq!(container.method_il(Token::new(0x0600_0002)).unwrap(), &[0x2A]);
}
