//! Stops using return values in nodes that don't allow them. This converts
//! a module from the everything-is-a-value dialect into one with explicit
//! `drop` and the tee flag.

use crate::analysis::is_result_used;
use crate::arena::Expr;
use crate::ir::{Builder, Expression, Function, Module, Type};
use crate::pass::Pass;
use crate::walker::{scan_postorder, Visitor, Walker};

#[derive(Default)]
pub struct DropReturnValues {
    expression_stack: Vec<Expr>,
}

impl DropReturnValues {
    fn visit_pre(pass: &mut DropReturnValues, _w: &mut Walker<'_, DropReturnValues>, id: Expr) {
        pass.expression_stack.push(id);
    }

    fn visit_post(pass: &mut DropReturnValues, _w: &mut Walker<'_, DropReturnValues>, _id: Expr) {
        pass.expression_stack.pop();
    }

    fn maybe_drop(&mut self, w: &mut Walker<'_, DropReturnValues>, id: Expr) {
        if w.func.arena[id].ty().is_concrete()
            && !is_result_used(&self.expression_stack, w.func)
        {
            w.func.arena.wrap(id, |inner| Expression::Drop { value: inner });
        }
    }
}

impl Visitor for DropReturnValues {
    fn scan(pass: &mut Self, w: &mut Walker<'_, Self>, id: Expr) {
        w.push_task(Self::visit_post, id);
        scan_postorder(pass, w, id);
        w.push_task(Self::visit_pre, id);
    }

    fn visit_block(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        w.func.arena.finalize(id); // children may have changed
        self.maybe_drop(w, id);
    }

    fn visit_if(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        w.func.arena.finalize(id);
        self.maybe_drop(w, id);
    }

    fn visit_loop(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        w.func.arena.finalize(id);
        self.maybe_drop(w, id);
    }

    fn visit_break(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        // A break may send a value to a block whose own result is ignored.
        // The block's fallthrough gets a drop; the break must then stop
        // carrying the value too, dropping it at the break site.
        let name = match &w.func.arena[id] {
            Expression::Break {
                name,
                value: Some(_),
                ..
            } => name.clone(),
            _ => return,
        };
        for i in (0..self.expression_stack.len()).rev() {
            let scope = self.expression_stack[i];
            let target = match &w.func.arena[scope] {
                Expression::Block {
                    name: Some(n), ..
                } => {
                    if *n == name {
                        Some(true)
                    } else {
                        None
                    }
                }
                Expression::Loop { out, cont, .. } => {
                    if cont.as_ref() == Some(&name) {
                        Some(false) // a continue carries no block result
                    } else if out.as_ref() == Some(&name) {
                        Some(true)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            match target {
                Some(true) => {
                    let scope_stack = &self.expression_stack[..=i];
                    if !is_result_used(scope_stack, w.func) {
                        // the value may have side effects: evaluate and
                        // drop it before the break
                        let value = match &mut w.func.arena[id] {
                            Expression::Break { value, .. } => value.take(),
                            _ => None,
                        };
                        let Some(value) = value else { return };
                        let mut b = Builder::new(w.func);
                        let dropped = b.make_drop(value);
                        w.func.arena.wrap(id, |inner| Expression::Block {
                            name: None,
                            list: vec![dropped, inner],
                            ty: Type::None,
                        });
                    }
                    return;
                }
                Some(false) => return,
                None => {}
            }
        }
    }

    fn visit_call(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_call_import(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_call_indirect(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_get_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_set_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        let is_tee = match &w.func.arena[id] {
            Expression::SetLocal { tee, .. } => *tee,
            _ => return,
        };
        if is_tee && !is_result_used(&self.expression_stack, w.func) {
            if let Expression::SetLocal { tee, .. } = &mut w.func.arena[id] {
                *tee = false;
            }
        }
    }

    fn visit_load(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_store(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        // a store returns its value in the source dialect; spill through a
        // fresh local when something consumes it
        let used = is_result_used(&self.expression_stack, w.func);
        let value_ty = match &w.func.arena[id] {
            Expression::Store { value, .. } => w.func.arena[*value].ty(),
            _ => return,
        };
        if let Expression::Store { ty, .. } = &mut w.func.arena[id] {
            *ty = Type::None;
        }
        if !used {
            return;
        }
        let index = w.func.add_var(value_ty);
        // value computes into the local; the store and the use read it back
        let old_value = match &w.func.arena[id] {
            Expression::Store { value, .. } => *value,
            _ => return,
        };
        let mut b = Builder::new(w.func);
        let spill = b.make_set_local(index, old_value);
        let store_read = b.make_get_local(index);
        let result_read = b.make_get_local(index);
        if let Expression::Store { value, .. } = &mut w.func.arena[id] {
            *value = store_read;
        }
        w.func.arena.wrap(id, |inner| Expression::Block {
            name: None,
            list: vec![spill, inner, result_read],
            ty: value_ty,
        });
    }

    fn visit_const(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_unary(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_binary(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_select(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }

    fn visit_host(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.maybe_drop(w, id);
    }
}

impl Pass for DropReturnValues {
    fn name(&self) -> &'static str {
        "drop-return-values"
    }

    fn is_function_parallel(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Pass> {
        Box::new(DropReturnValues::default())
    }

    fn run_function(&mut self, _module: &Module, func: &mut Function) {
        self.expression_stack.clear();
        let root = func.body;
        Walker::new(func).walk(self, root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Literal, LocalDef, Type};

    fn run(func: &mut Function) {
        let module = Module::default();
        let mut pass = DropReturnValues::default();
        pass.run_function(&module, func);
    }

    #[test]
    fn unused_concrete_values_get_dropped() {
        // block { 1; nop } in a void function: the 1 is dropped, the block
        // result is none
        let mut func = Function::new("t", vec![], Type::None);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(1);
        let nop = b.make_nop();
        let body = b.make_block(vec![c, nop]);
        func.body = body;

        run(&mut func);

        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        match &func.arena[list[0]] {
            Expression::Drop { value } => match &func.arena[*value] {
                Expression::Const { value } => assert_eq!(*value, Literal::I32(1)),
                other => panic!("dropped value is {}", other.kind_name()),
            },
            other => panic!("expected drop, got {}", other.kind_name()),
        }
    }

    #[test]
    fn used_values_stay_undropped_and_tee_survives() {
        // return (x = 3): the set is in tee position
        let mut func = Function::new("t", vec![], Type::I32);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(3);
        let set = b.make_set_local(x, c);
        let ret = b.make_return(Some(set));
        let body = b.make_block(vec![ret]);
        func.body = body;

        run(&mut func);

        let ret_value = match &func.arena[func.body] {
            Expression::Block { list, .. } => match &func.arena[list[0]] {
                Expression::Return { value: Some(v) } => *v,
                _ => panic!(),
            },
            _ => panic!(),
        };
        match &func.arena[ret_value] {
            Expression::SetLocal { tee, .. } => assert!(*tee),
            other => panic!("expected set, got {}", other.kind_name()),
        }
    }

    #[test]
    fn statement_set_loses_its_tee_flag() {
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(3);
        let set = b.make_set_local(x, c);
        let nop = b.make_nop();
        let body = b.make_block(vec![set, nop]);
        func.body = body;

        run(&mut func);

        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        match &func.arena[list[0]] {
            Expression::SetLocal { tee, .. } => assert!(!*tee),
            other => panic!("expected set, got {}", other.kind_name()),
        }
    }

    #[test]
    fn break_value_to_an_ignored_block_is_dropped_at_the_break() {
        // block $out { br $out (7); nop }; nop - block result unused
        let mut func = Function::new("t", vec![], Type::None);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(7);
        let br = func.arena.alloc(Expression::Break {
            name: "out".into(),
            value: Some(c),
            condition: None,
        });
        let mut b = Builder::new(&mut func);
        let nop = b.make_nop();
        let block = b.make_block_named("out", vec![br, nop]);
        let nop2 = b.make_nop();
        let body = b.make_block(vec![block, nop2]);
        func.body = body;

        run(&mut func);

        // the break's slot now holds a sequence of (drop 7, br without a
        // value)
        let block_list = match &func.arena[func.body] {
            Expression::Block { list, .. } => match &func.arena[list[0]] {
                Expression::Block { list, .. } => list.clone(),
                _ => panic!(),
            },
            _ => panic!(),
        };
        let seq = match &func.arena[block_list[0]] {
            Expression::Block { list, .. } => list.clone(),
            other => panic!("expected sequence, got {}", other.kind_name()),
        };
        assert!(matches!(&func.arena[seq[0]], Expression::Drop { .. }));
        assert!(matches!(
            &func.arena[seq[1]],
            Expression::Break { value: None, .. }
        ));
    }
}
