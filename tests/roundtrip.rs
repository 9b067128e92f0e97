//! Integration tests for the binary codec: encode, decode, compare.

use strudel::binary;
use strudel::{
    Builder, Export, Expression, Function, Literal, Local, LocalDef, Memory, Module, Segment, Type,
};

fn roundtrip(module: &mut Module) -> Module {
    let bytes = module.to_binary().expect("encode");
    let decoded = Module::from_binary(&bytes).expect("decode");
    assert!(
        module.structurally_equal(&decoded),
        "module changed across a round-trip"
    );
    decoded
}

fn roundtrip_compressed(module: &mut Module, chunk_sizes: &[usize]) -> Module {
    let plain = module.to_binary().expect("encode");
    let compressed = module
        .to_binary_compressed(chunk_sizes)
        .expect("encode compressed");
    let decoded = Module::from_binary(&compressed).expect("decode compressed");
    assert!(
        module.structurally_equal(&decoded),
        "module changed across a compressed round-trip"
    );
    assert!(
        compressed.len() <= plain.len() + 64,
        "compression should not explode the size: {} vs {}",
        compressed.len(),
        plain.len()
    );
    decoded
}

#[test]
fn empty_module() {
    let mut module = Module::default();
    let decoded = roundtrip(&mut module);
    assert_eq!(decoded.functions.len(), 0);
}

#[test]
fn single_nop_function() {
    let mut module = Module::default();
    let mut func = Function::new("main", vec![], Type::None);
    let mut b = Builder::new(&mut func);
    let nop = b.make_nop();
    func.body = nop;
    module.add_function(func);
    let decoded = roundtrip(&mut module);
    assert_eq!(decoded.functions.len(), 1);
    // the name section preserves function names
    assert_eq!(
        decoded.functions.first().unwrap().name.as_str(),
        "main"
    );
}

#[test]
fn unreachable_body() {
    let mut module = Module::default();
    let mut func = Function::new("trap", vec![], Type::None);
    let mut b = Builder::new(&mut func);
    let u = b.make_unreachable();
    func.body = u;
    module.add_function(func);
    roundtrip(&mut module);
}

#[test]
fn local_index_leb_boundary() {
    // 128 locals crosses from 1-byte to 2-byte LEB indices
    let mut module = Module::default();
    let mut func = Function::new("many", vec![], Type::None);
    let mut locals = vec![];
    for _ in 0..128 {
        locals.push(func.add_var(Type::I32));
    }
    let mut b = Builder::new(&mut func);
    let mut list = vec![];
    for &local in &locals {
        let c = b.make_i32_const(0);
        list.push(b.make_set_local(local, c));
    }
    let last = *locals.last().unwrap();
    let get = b.make_get_local(last);
    list.push(b.make_return(Some(get)));
    let body = b.make_block(list);
    func.body = body;
    func.result = Type::I32;
    module.add_function(func);
    roundtrip(&mut module);
}

#[test]
fn mixed_local_types_compact_and_restore() {
    // interleaved local types exercise the (count, type) run compaction
    let mut module = Module::default();
    let mut func = Function::new("mixed", vec![LocalDef::new("p", Type::I64)], Type::None);
    let a = func.add_var(Type::F64);
    let b_ = func.add_var(Type::I32);
    let c = func.add_var(Type::F32);
    let d = func.add_var(Type::I32);
    let mut b = Builder::new(&mut func);
    let mut list = vec![];
    for local in [a, b_, c, d, Local::new(0)] {
        let get = b.make_get_local(local);
        list.push(b.make_drop(get));
    }
    let body = b.make_block(list);
    func.body = body;
    module.add_function(func);

    let decoded = roundtrip(&mut module);
    let func = decoded.functions.first().unwrap();
    // compact order groups i32 first, then f32, then f64, after the param
    let var_types: Vec<Type> = func.vars.iter().map(|v| v.ty).collect();
    assert_eq!(
        var_types,
        [Type::I32, Type::I32, Type::F32, Type::F64]
    );
}

#[test]
fn control_flow_and_break_depths() {
    let mut module = Module::default();
    let mut func = Function::new("flow", vec![LocalDef::new("p", Type::I32)], Type::I32);
    let p = Local::new(0);
    let mut b = Builder::new(&mut func);

    // loop with a conditional continue and a break out
    let cond = b.make_get_local(p);
    let cont = b.make_br_if("in", cond);
    let out = b.make_br("out");
    let loop_body = b.make_block(vec![cont, out]);
    let lp = b.make_loop(Some("out".into()), Some("in".into()), loop_body);

    // block breaking to itself
    let self_br = b.make_br("self");
    let self_block = b.make_block_named("self", vec![self_br]);

    // an if-else producing the result
    let cond2 = b.make_get_local(p);
    let t = b.make_i32_const(1);
    let f = b.make_i32_const(2);
    let iff = b.make_if(cond2, t, Some(f));
    let ret = b.make_return(Some(iff));

    let body = b.make_block(vec![lp, self_block, ret]);
    func.body = body;
    module.add_function(func);
    roundtrip(&mut module);
}

#[test]
fn switch_with_no_targets() {
    let mut module = Module::default();
    let mut func = Function::new("sw", vec![LocalDef::new("p", Type::I32)], Type::None);
    let p = Local::new(0);
    let mut b = Builder::new(&mut func);
    let cond = b.make_get_local(p);
    let sw = func.arena.alloc(Expression::Switch {
        condition: cond,
        value: None,
        targets: vec![],
        default: "out".into(),
    });
    let mut b = Builder::new(&mut func);
    let block = b.make_block_named("out", vec![sw]);
    func.body = block;
    module.add_function(func);
    roundtrip(&mut module);
}

#[test]
fn loop_without_back_edge() {
    let mut module = Module::default();
    let mut func = Function::new("once", vec![], Type::None);
    let mut b = Builder::new(&mut func);
    let nop = b.make_nop();
    let lp = b.make_loop(Some("out".into()), Some("in".into()), nop);
    func.body = lp;
    module.add_function(func);
    roundtrip(&mut module);
}

#[test]
fn memory_segments_table_start_imports_exports() {
    let mut module = Module::default();
    module.memory = Memory {
        initial: 1,
        max: 4,
        export_name: Some("memory".into()),
        segments: vec![Segment {
            offset: 16,
            data: vec![1, 2, 3, 4, 5],
        }],
    };
    let sig = module.ensure_function_type(&[Type::I32], Type::I32);
    module.imports.push(strudel::Import {
        name: "imp".into(),
        module: "env".into(),
        base: "external".into(),
        ty: sig.clone(),
    });

    let mut func = Function::new("go", vec![LocalDef::new("p", Type::I32)], Type::I32);
    let p = Local::new(0);
    let mut b = Builder::new(&mut func);
    let arg = b.make_get_local(p);
    let call = func.arena.alloc(Expression::CallImport {
        target: "imp".into(),
        operands: vec![arg],
        ty: Type::I32,
    });
    let mut b = Builder::new(&mut func);
    let ret = b.make_return(Some(call));
    func.body = ret;
    module.add_function(func);

    let mut init = Function::new("init", vec![], Type::None);
    let mut b = Builder::new(&mut init);
    let nop = b.make_nop();
    init.body = nop;
    module.add_function(init);

    module.exports.push(Export {
        name: "run".into(),
        value: "go".into(),
    });
    module.table.names.push("go".into());
    module.table.names.push("init".into());
    module.start = Some("init".into());

    let decoded = roundtrip(&mut module);
    assert_eq!(decoded.memory.initial, 1);
    assert_eq!(decoded.memory.max, 4);
    assert_eq!(decoded.memory.segments.len(), 1);
    assert_eq!(decoded.table.names.len(), 2);
    assert!(decoded.start.is_some());
}

#[test]
fn memory_ops_and_numeric_ops() {
    let mut module = Module::default();
    module.memory.initial = 1;
    module.memory.max = 1;
    let mut func = Function::new("mem", vec![], Type::I32);
    let mut b = Builder::new(&mut func);
    let addr = b.make_i32_const(8);
    let load = func.arena.alloc(Expression::Load {
        bytes: 2,
        signed: true,
        offset: 4,
        align: 1,
        ptr: addr,
        ty: Type::I32,
    });
    let mut b = Builder::new(&mut func);
    let c = b.make_i32_const(3);
    let sum = func.arena.alloc(Expression::Binary {
        op: strudel::BinaryOp::Add,
        left: load,
        right: c,
        ty: Type::I32,
    });
    let eqz = func.arena.alloc(Expression::Unary {
        op: strudel::UnaryOp::EqZ,
        value: sum,
        ty: Type::I32,
    });
    let mut b = Builder::new(&mut func);
    let addr2 = b.make_i32_const(16);
    let val = b.make_i32_const(77);
    let store = func.arena.alloc(Expression::Store {
        bytes: 4,
        offset: 0,
        align: 0,
        ptr: addr2,
        value: val,
        ty: Type::I32,
    });
    let mut b = Builder::new(&mut func);
    let ret = b.make_return(Some(eqz));
    let body = b.make_block(vec![store, ret]);
    func.body = body;
    module.add_function(func);
    roundtrip(&mut module);
}

#[test]
fn indirect_calls_selects_switches_and_host_ops() {
    let mut module = Module::default();
    module.memory.initial = 1;
    module.memory.max = 2;

    let mut callee = Function::new("callee", vec![LocalDef::new("a", Type::I32)], Type::I32);
    let mut b = Builder::new(&mut callee);
    let get = b.make_get_local(Local::new(0));
    let ret = b.make_return(Some(get));
    callee.body = ret;
    module.add_function(callee);
    module.table.names.push("callee".into());

    let mut func = Function::new("caller", vec![LocalDef::new("p", Type::I32)], Type::I32);
    let p = Local::new(0);
    let sig = module.ensure_function_type(&[Type::I32], Type::I32);
    let mut b = Builder::new(&mut func);

    // grow memory by one page, then query the size
    let one = b.make_i32_const(1);
    let grow = b.make_host(strudel::HostOp::GrowMemory, Some(one));
    let size = b.make_host(strudel::HostOp::CurrentMemory, None);
    let warmup = b.make_sequence(grow, size);

    // call through the table with a select-chosen slot
    let s0 = b.make_i32_const(0);
    let s1 = b.make_i32_const(0);
    let cond = b.make_get_local(p);
    let slot = func.arena.alloc(Expression::Select {
        if_true: s0,
        if_false: s1,
        condition: cond,
        ty: Type::I32,
    });
    let mut b = Builder::new(&mut func);
    let arg = b.make_get_local(p);
    let call = func.arena.alloc(Expression::CallIndirect {
        sig,
        target: slot,
        operands: vec![arg],
        ty: Type::I32,
    });

    // a switch over nested blocks
    let mut b = Builder::new(&mut func);
    let scrutinee = b.make_get_local(p);
    let sw = func.arena.alloc(Expression::Switch {
        condition: scrutinee,
        value: None,
        targets: vec!["a".into(), "b".into()],
        default: "b".into(),
    });
    let mut b = Builder::new(&mut func);
    let inner = b.make_block_named("a", vec![sw]);
    let nop = b.make_nop();
    let outer = b.make_block_named("b", vec![inner, nop]);

    let ret = b.make_return(Some(call));
    let body = b.make_block(vec![warmup, outer, ret]);
    func.body = body;
    module.add_function(func);

    roundtrip(&mut module);
}

#[test]
fn float_bit_patterns_survive() {
    // a NaN with a nonstandard payload must round-trip exactly
    let nan_bits = 0x7fc0_1234u32;
    let mut module = Module::default();
    let mut func = Function::new("f", vec![], Type::F32);
    let mut b = Builder::new(&mut func);
    let c = b.make_const(Literal::F32(strudel::Ieee32(nan_bits)));
    let ret = b.make_return(Some(c));
    func.body = ret;
    module.add_function(func);

    let decoded = roundtrip(&mut module);
    let func = decoded.functions.first().unwrap();
    let mut found = None;
    strudel::analysis::each_expr_post(&func.arena, func.body, |id| {
        if let Expression::Const { value } = &func.arena[id] {
            found = Some(*value);
        }
    });
    assert_eq!(found, Some(Literal::F32(strudel::Ieee32(nan_bits))));
}

#[test]
fn compressed_roundtrip_single_table() {
    let mut module = Module::default();
    // lots of repeated get_local 0 / const 0 patterns for the table to
    // exploit
    for i in 0..4 {
        let mut func = Function::new(
            format!("f{}", i),
            vec![LocalDef::new("p", Type::I32)],
            Type::I32,
        );
        let p = Local::new(0);
        let mut b = Builder::new(&mut func);
        let mut list = vec![];
        for _ in 0..6 {
            let get = b.make_get_local(p);
            list.push(b.make_drop(get));
        }
        let get = b.make_get_local(p);
        list.push(b.make_return(Some(get)));
        let body = b.make_block(list);
        func.body = body;
        module.add_function(func);
    }
    let decoded = roundtrip_compressed(&mut module, &[]);
    assert_eq!(decoded.functions.len(), 4);
}

#[test]
fn compressed_roundtrip_chunked_tables() {
    let mut module = Module::default();
    for i in 0..6 {
        let mut func = Function::new(format!("f{}", i), vec![], Type::I32);
        let mut b = Builder::new(&mut func);
        let mut list = vec![];
        for _ in 0..4 {
            let c = b.make_i32_const(i);
            list.push(b.make_drop(c));
        }
        let c = b.make_i32_const(i);
        list.push(b.make_return(Some(c)));
        let body = b.make_block(list);
        func.body = body;
        module.add_function(func);
    }
    // three chunks, each with its own opcode section
    roundtrip_compressed(&mut module, &[2, 2, 2]);
}

#[test]
fn compression_shrinks_repetitive_modules() {
    let mut module = Module::default();
    let mut func = Function::new("hot", vec![LocalDef::new("p", Type::I32)], Type::None);
    let p = Local::new(0);
    let mut b = Builder::new(&mut func);
    let mut list = vec![];
    for _ in 0..64 {
        let get = b.make_get_local(p);
        list.push(b.make_drop(get));
    }
    let body = b.make_block(list);
    func.body = body;
    module.add_function(func);

    let plain = module.to_binary().expect("encode");
    let compressed = module.to_binary_compressed(&[]).expect("compress");
    assert!(
        compressed.len() < plain.len(),
        "expected savings: {} vs {}",
        compressed.len(),
        plain.len()
    );
}

#[test]
fn learned_layout_roundtrips() {
    let mut module = Module::default();
    for i in 0..5 {
        let mut func = Function::new(format!("f{}", i), vec![], Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(i * 10);
        let ret = b.make_return(Some(c));
        func.body = ret;
        module.add_function(func);
    }
    module.finalize_types();
    let reference = module.clone();
    let bytes = binary::learn::write_learned(&mut module, 2, 6, 42).expect("learned encode");
    // the search must leave the module itself untouched
    assert!(module.structurally_equal(&reference));
    let decoded = Module::from_binary(&bytes).expect("decode");
    assert!(module.structurally_equal(&decoded));
}

#[test]
fn truncated_input_is_a_clean_error() {
    let mut module = Module::default();
    let mut func = Function::new("main", vec![], Type::None);
    let mut b = Builder::new(&mut func);
    let nop = b.make_nop();
    func.body = nop;
    module.add_function(func);
    let bytes = module.to_binary().expect("encode");
    for cut in [0, 3, 8, bytes.len() / 2, bytes.len() - 1] {
        assert!(Module::from_binary(&bytes[..cut]).is_err());
    }
}

#[test]
fn bad_magic_is_rejected() {
    let err = Module::from_binary(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("bad magic"), "got: {}", msg);
}

#[test]
fn unknown_section_is_rejected() {
    let mut module = Module::default();
    let mut bytes = module.to_binary().expect("encode");
    // append a section named "bogus" with an empty body
    bytes.push(5);
    bytes.extend_from_slice(b"bogus");
    bytes.push(0);
    let err = Module::from_binary(&bytes).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("unfamiliar section"), "got: {}", msg);
}
