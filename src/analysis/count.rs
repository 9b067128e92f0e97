//! Local get/set counting and single-first-assignment detection.

use super::each_expr_post;
use crate::arena::Expr;
use crate::ir::{Expression, Function, Local};

/// Per-local get counts over a subtree, sized to the containing function.
#[derive(Clone, Debug, Default)]
pub struct GetLocalCounter {
    num_gets: Vec<u32>,
}

impl GetLocalCounter {
    pub fn new(func: &Function, root: Expr) -> GetLocalCounter {
        let mut counter = GetLocalCounter::default();
        counter.analyze(func, root);
        counter
    }

    pub fn analyze(&mut self, func: &Function, root: Expr) {
        self.num_gets.clear();
        self.num_gets.resize(func.num_locals(), 0);
        each_expr_post(&func.arena, root, |id| {
            if let Expression::GetLocal { index, .. } = &func.arena[id] {
                self.num_gets[index.index()] += 1;
            }
        });
    }

    pub fn num_gets(&self, local: Local) -> u32 {
        self.num_gets[local.index()]
    }
}

/// Gets, sets, and the SFA flag per local.
///
/// Single First Assignment: the local is not a parameter, has exactly one
/// set, and no get precedes that set in postorder. Much weaker than SSA,
/// but with the structured AST's implicit dominance it is enough for
/// forward code motion.
#[derive(Clone, Debug, Default)]
pub struct LocalAnalyzer {
    sfa: Vec<bool>,
    num_sets: Vec<u32>,
    num_gets: Vec<u32>,
}

impl LocalAnalyzer {
    pub fn analyze(&mut self, func: &Function) {
        let num = func.num_locals();
        self.num_sets.clear();
        self.num_sets.resize(num, 0);
        self.num_gets.clear();
        self.num_gets.resize(num, 0);
        self.sfa.clear();
        self.sfa.resize(num, true);
        for slot in &mut self.sfa[..func.num_params()] {
            *slot = false;
        }
        each_expr_post(&func.arena, func.body, |id| match &func.arena[id] {
            Expression::GetLocal { index, .. } => {
                let i = index.index();
                if self.num_sets[i] == 0 {
                    self.sfa[i] = false;
                }
                self.num_gets[i] += 1;
            }
            Expression::SetLocal { index, .. } => {
                let i = index.index();
                self.num_sets[i] += 1;
                if self.num_sets[i] > 1 {
                    self.sfa[i] = false;
                }
            }
            _ => {}
        });
        for i in 0..num {
            if self.num_sets[i] == 0 {
                self.sfa[i] = false;
            }
        }
    }

    pub fn is_sfa(&self, local: Local) -> bool {
        self.sfa[local.index()]
    }

    pub fn num_gets(&self, local: Local) -> u32 {
        self.num_gets[local.index()]
    }

    pub fn num_sets(&self, local: Local) -> u32 {
        self.num_sets[local.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, LocalDef, Type};

    #[test]
    fn sfa_requires_set_before_get() {
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let p = Local::new(0);
        let x = func.add_var(Type::I32);
        let y = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        // x: set then get (SFA); y: get then set (not SFA); p: param (never)
        let c1 = b.make_i32_const(1);
        let set_x = b.make_set_local(x, c1);
        let get_x = b.make_get_local(x);
        let drop_x = b.make_drop(get_x);
        let get_y = b.make_get_local(y);
        let drop_y = b.make_drop(get_y);
        let c2 = b.make_i32_const(2);
        let set_y = b.make_set_local(y, c2);
        let get_p = b.make_get_local(p);
        let drop_p = b.make_drop(get_p);
        let body = b.make_block(vec![set_x, drop_x, drop_y, set_y, get_p, drop_p]);
        func.body = body;

        let mut analyzer = LocalAnalyzer::default();
        analyzer.analyze(&func);
        assert!(analyzer.is_sfa(x));
        assert!(!analyzer.is_sfa(y));
        assert!(!analyzer.is_sfa(p));
        assert_eq!(analyzer.num_gets(x), 1);
        assert_eq!(analyzer.num_sets(y), 1);
    }

    #[test]
    fn counter_covers_a_subtree_only() {
        let mut func = Function::new("t", vec![], Type::None);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let g1 = b.make_get_local(x);
        let d1 = b.make_drop(g1);
        let g2 = b.make_get_local(x);
        let d2 = b.make_drop(g2);
        let body = b.make_block(vec![d1, d2]);
        func.body = body;

        assert_eq!(GetLocalCounter::new(&func, func.body).num_gets(x), 2);
        assert_eq!(GetLocalCounter::new(&func, d1).num_gets(x), 1);
    }
}
