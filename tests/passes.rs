//! Integration tests for the pass pipeline.

use strudel::analysis::{each_expr_post, GetLocalCounter, LocalAnalyzer};
use strudel::{Builder, Expression, Function, Local, LocalDef, Module, PassRunner, Type};

fn single_use_function(name: &str, uses_call: bool) -> Function {
    let mut func = Function::new(name, vec![LocalDef::new("p", Type::I32)], Type::I32);
    let p = Local::new(0);
    let x = func.add_var(Type::I32);
    let mut b = Builder::new(&mut func);
    let mut list = vec![];
    let c = b.make_i32_const(10);
    list.push(b.make_set_local(x, c));
    if uses_call {
        list.push(b.make_call(name, vec![], Type::None));
    }
    let cond = b.make_get_local(p);
    list.push(b.make_br_if("out", cond));
    let get = b.make_get_local(x);
    list.push(b.make_return(Some(get)));
    let body = b.make_block_named("out", list);
    func.body = body;
    func
}

#[test]
fn default_pipeline_runs_and_output_still_decodes() {
    let mut module = Module::default();
    for i in 0..8 {
        module.add_function(single_use_function(&format!("f{}", i), i % 2 == 0));
    }
    let mut runner = PassRunner::new();
    runner.add_default_optimization_passes();
    runner.run(&mut module);

    let bytes = module.to_binary().expect("encode after passes");
    let decoded = Module::from_binary(&bytes).expect("decode after passes");
    assert!(module.structurally_equal(&decoded));
}

#[test]
fn parallel_and_serial_simplify_locals_agree() {
    let build = || {
        let mut module = Module::default();
        for i in 0..16 {
            module.add_function(single_use_function(&format!("f{}", i), false));
        }
        module
    };
    let mut parallel = build();
    let mut serial = build();

    let mut runner = PassRunner::new();
    runner.add("simplify-locals").unwrap();
    runner.run(&mut parallel);

    let mut runner = PassRunner::with_threads(1);
    runner.add("simplify-locals").unwrap();
    runner.run(&mut serial);

    assert!(parallel.structurally_equal(&serial));
}

#[test]
fn simplify_locals_removes_single_set_unread_locals() {
    // after the pass, a local with exactly one set and no reads must not
    // remain as a set_local
    let mut module = Module::default();
    let mut func = Function::new("f", vec![], Type::None);
    let dead = func.add_var(Type::I32);
    let mut b = Builder::new(&mut func);
    let c = b.make_i32_const(9);
    let set = b.make_set_local(dead, c);
    let nop = b.make_nop();
    let body = b.make_block(vec![set, nop]);
    func.body = body;
    module.add_function(func);

    let mut runner = PassRunner::with_threads(1);
    runner.add("simplify-locals").unwrap();
    runner.run(&mut module);

    let func = module.functions.first().unwrap();
    let analyzer = {
        let mut a = LocalAnalyzer::default();
        a.analyze(func);
        a
    };
    assert_eq!(analyzer.num_sets(dead), 0);
    assert_eq!(analyzer.num_gets(dead), 0);
}

#[test]
fn code_pushing_then_locals_still_consistent() {
    let mut module = Module::default();
    module.add_function(single_use_function("f", false));
    let mut runner = PassRunner::with_threads(1);
    runner.add("code-pushing").unwrap();
    runner.add("simplify-locals").unwrap();
    runner.run(&mut module);

    // every remaining get_local index is in range
    let func = module.functions.first().unwrap();
    each_expr_post(&func.arena, func.body, |id| {
        if let Expression::GetLocal { index, .. } = &func.arena[id] {
            assert!(index.index() < func.num_locals());
        }
    });
}

#[test]
fn loop_var_splitting_inserts_a_head_copy() {
    // x = 0; loop { if (p) { x = 2; continue } }: after the pass the loop
    // body starts with x = helper and the back edge writes the helper
    let mut module = Module::default();
    let mut func = Function::new("f", vec![LocalDef::new("p", Type::I32)], Type::None);
    let p = Local::new(0);
    let x = func.add_var(Type::I32);
    let mut b = Builder::new(&mut func);
    let c0 = b.make_i32_const(0);
    let set0 = b.make_set_local(x, c0);
    let c2 = b.make_i32_const(2);
    let set2 = b.make_set_local(x, c2);
    let br = b.make_br("in");
    let arm = b.make_block(vec![set2, br]);
    let cond = b.make_get_local(p);
    let iff = b.make_if(cond, arm, None);
    let loop_body = b.make_block(vec![iff]);
    let lp = b.make_loop(Some("out".into()), Some("in".into()), loop_body);
    let body = b.make_block(vec![set0, lp]);
    func.body = body;
    module.add_function(func);

    let mut runner = PassRunner::with_threads(1);
    runner.add("loop-var-splitting").unwrap();
    runner.run(&mut module);

    let func = module.functions.first().unwrap();
    assert_eq!(func.vars.len(), 2);
    let helper = Local::new(func.num_locals() - 1);
    let counter = GetLocalCounter::new(func, func.body);
    // the head copy reads the helper
    assert_eq!(counter.num_gets(helper), 1);
}

#[test]
fn drop_return_values_leaves_no_ignored_concrete_values() {
    let mut module = Module::default();
    let mut func = Function::new("f", vec![LocalDef::new("p", Type::I32)], Type::None);
    let p = Local::new(0);
    let mut b = Builder::new(&mut func);
    let g1 = b.make_get_local(p);
    let c = b.make_i32_const(2);
    let g2 = b.make_get_local(p);
    let set_p = b.make_set_local(p, g2);
    let nop = b.make_nop();
    let body = b.make_block(vec![g1, c, set_p, nop]);
    func.body = body;
    module.add_function(func);

    let mut runner = PassRunner::with_threads(1);
    runner.add("drop-return-values").unwrap();
    runner.run(&mut module);

    // every non-final block element with a concrete type is now a drop (or
    // a set without its tee flag)
    let func = module.functions.first().unwrap();
    let list = match &func.arena[func.body] {
        Expression::Block { list, .. } => list.clone(),
        _ => panic!(),
    };
    for &id in &list[..list.len() - 1] {
        match &func.arena[id] {
            Expression::Drop { .. } => {}
            Expression::SetLocal { tee, .. } => assert!(!*tee),
            other => assert_eq!(other.ty(), Type::None, "{} left undropped", other.kind_name()),
        }
    }
}

#[test]
fn metrics_counts_are_observable_through_the_runner() {
    let mut module = Module::default();
    module.add_function(single_use_function("f", true));
    let mut runner = PassRunner::new();
    runner.add("metrics").unwrap();
    // runs without mutating the module
    let before = module.clone();
    runner.run(&mut module);
    assert!(module.structurally_equal(&before));
}
