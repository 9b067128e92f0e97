//! Splits critical loop variables - values carried to the loop head on
//! every back edge - so register coalescing can be more effective.
//!
//! Consider
//! ```text
//!   i = 0;
//!   loop {
//!     i2 = i + 1;
//!     .. use i and i2, potentially making them conflict
//!     if (cond) { i = i2; continue; }
//!   }
//! ```
//! Carrying the value to the loop head and keeping it alive through the
//! body are separate jobs. A fresh helper local takes over the carry: every
//! arriving edge writes the helper, and the loop body begins by copying the
//! helper into the original local. A later coalescing pass can then delete
//! whichever copy matters less; the helper conflicts with neither.

use std::collections::BTreeMap;

use fxhash::FxHashMap;

use crate::arena::Expr;
use crate::ir::{Builder, Expression, Function, Local, Module, Name};
use crate::pass::Pass;
use crate::walker::{scan_linear, LinearVisitor, Visitor, Walker};

/// The last set of each local on the current trace with no get after it.
type FinalSets = BTreeMap<Local, Expr>;

#[derive(Default)]
pub struct LoopVarSplitting {
    curr_final_sets: FinalSets,
    /// Per loop continue-label, the final sets of each trace that arrives
    /// at the loop head: the fall-in, plus one per unconditional continue.
    loop_entries: FxHashMap<Name, Vec<FinalSets>>,
}

impl Pass for LoopVarSplitting {
    fn name(&self) -> &'static str {
        "loop-var-splitting"
    }

    fn is_function_parallel(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Pass> {
        Box::new(LoopVarSplitting::default())
    }

    fn run_function(&mut self, _module: &Module, func: &mut Function) {
        self.curr_final_sets.clear();
        self.loop_entries.clear();
        let root = func.body;
        Walker::new(func).walk(self, root);
    }
}

impl Visitor for LoopVarSplitting {
    fn scan(pass: &mut Self, w: &mut Walker<'_, Self>, id: Expr) {
        scan_linear(pass, w, id);
    }

    fn visit_get_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        if let Expression::GetLocal { index, .. } = &w.func.arena[id] {
            self.curr_final_sets.remove(index);
        }
    }

    fn visit_set_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        if let Expression::SetLocal { index, .. } = &w.func.arena[id] {
            self.curr_final_sets.insert(*index, id);
        }
    }

    fn visit_switch(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        // a switch arriving at a loop head means no clean phi there
        if let Expression::Switch {
            targets, default, ..
        } = &w.func.arena[id]
        {
            let (targets, default) = (targets.clone(), default.clone());
            for target in &targets {
                self.loop_entries.remove(target);
            }
            self.loop_entries.remove(&default);
        }
    }

    fn visit_loop(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        // the loop body has been traversed; every arriving trace is on
        // record, and the rewrite can go ahead
        let cont = match &w.func.arena[id] {
            Expression::Loop {
                cont: Some(cont), ..
            } => cont.clone(),
            _ => return,
        };
        let Some(entries) = self.loop_entries.remove(&cont) else {
            return;
        };
        if entries.len() < 2 {
            return; // no back edge ever arrives
        }
        for (&index, &set) in &entries[0] {
            let in_all = entries[1..].iter().all(|e| e.contains_key(&index));
            if !in_all {
                continue;
            }
            // a final set on every entry: route them through a fresh helper
            // and copy it back at the loop head
            let ty = w.func.local_type(index);
            let new_index = w.func.add_var(ty);
            let mut rewrite = |func: &mut Function, set: Expr| {
                if let Expression::SetLocal { index, .. } = &mut func.arena[set] {
                    *index = new_index;
                }
            };
            rewrite(w.func, set);
            for entry in &entries[1..] {
                if let Some(&other_set) = entry.get(&index) {
                    rewrite(w.func, other_set);
                }
            }
            let body = match &w.func.arena[id] {
                Expression::Loop { body, .. } => *body,
                _ => return,
            };
            let mut b = Builder::new(w.func);
            let get = b.make_get_local(new_index);
            let copy = b.make_set_local(index, get);
            let body_ty = w.func.arena[body].ty();
            w.func.arena.wrap(body, move |inner| Expression::Block {
                name: None,
                list: vec![copy, inner],
                ty: body_ty,
            });
        }
    }
}

impl LinearVisitor for LoopVarSplitting {
    fn note_non_linear(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        match &w.func.arena[id] {
            Expression::Break {
                name, condition, ..
            } => {
                if condition.is_some() {
                    // a loop phi must arrive unconditionally
                    self.loop_entries.remove(name);
                } else if let Some(entries) = self.loop_entries.get_mut(name) {
                    // a continue to a tracked loop head
                    entries.push(std::mem::take(&mut self.curr_final_sets));
                }
            }
            Expression::Loop {
                cont: Some(cont), ..
            } => {
                // the loop head itself: the fall-in entry
                let cont = cont.clone();
                self.loop_entries
                    .entry(cont)
                    .or_default()
                    .push(std::mem::take(&mut self.curr_final_sets));
            }
            _ => {}
        }
        // non-linearity ends the current trace
        self.curr_final_sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, LocalDef, Type};

    /// Build: x = 0; loop $out $in { if (p) { x = 2; br $in } }
    /// with `conditional` making the continue a br_if instead.
    fn build(conditional: bool) -> (Function, Local) {
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let p = Local::new(0);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c0 = b.make_i32_const(0);
        let set0 = b.make_set_local(x, c0);
        let c2 = b.make_i32_const(2);
        let set2 = b.make_set_local(x, c2);
        let body = if conditional {
            let cond = b.make_get_local(p);
            let br = b.make_br_if("in", cond);
            b.make_block(vec![set2, br])
        } else {
            let br = b.make_br("in");
            let inner = b.make_block(vec![set2, br]);
            let cond = b.make_get_local(p);
            let iff = b.make_if(cond, inner, None);
            b.make_block(vec![iff])
        };
        let lp = b.make_loop(Some("out".into()), Some("in".into()), body);
        let outer = b.make_block(vec![set0, lp]);
        func.body = outer;
        (func, x)
    }

    #[test]
    fn splits_an_unconditional_back_edge() {
        let (mut func, x) = build(false);
        let vars_before = func.vars.len();
        let module = Module::default();
        let mut pass = LoopVarSplitting::default();
        pass.run_function(&module, &mut func);

        assert_eq!(func.vars.len(), vars_before + 1);
        let helper = Local::new(func.num_locals() - 1);
        assert_eq!(func.local_type(helper), Type::I32);

        // the initial set and the back-edge set now write the helper
        let outer = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        match &func.arena[outer[0]] {
            Expression::SetLocal { index, .. } => assert_eq!(*index, helper),
            other => panic!("expected set, got {}", other.kind_name()),
        }
        // the loop body now begins with x = helper
        let body = match &func.arena[outer[1]] {
            Expression::Loop { body, .. } => *body,
            other => panic!("expected loop, got {}", other.kind_name()),
        };
        let first = match &func.arena[body] {
            Expression::Block { list, .. } => list[0],
            other => panic!("expected block, got {}", other.kind_name()),
        };
        match &func.arena[first] {
            Expression::SetLocal { index, value, .. } => {
                assert_eq!(*index, x);
                match &func.arena[*value] {
                    Expression::GetLocal { index, .. } => assert_eq!(*index, helper),
                    other => panic!("copy source is {}", other.kind_name()),
                }
            }
            other => panic!("expected copy, got {}", other.kind_name()),
        }
    }

    #[test]
    fn conditional_back_edge_disqualifies_the_loop() {
        let (mut func, _x) = build(true);
        let vars_before = func.vars.len();
        let module = Module::default();
        let mut pass = LoopVarSplitting::default();
        pass.run_function(&module, &mut func);
        // no helper was introduced and nothing changed shape
        assert_eq!(func.vars.len(), vars_before);
    }
}
