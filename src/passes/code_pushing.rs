//! Pushes code "forward" as much as possible, potentially into a location
//! behind a condition, where it might not always execute.

use fxhash::FxHashMap;

use crate::analysis::{EffectAnalyzer, GetLocalCounter, LocalAnalyzer};
use crate::arena::Expr;
use crate::ir::{Expression, Function, Local, Module};
use crate::pass::Pass;
use crate::walker::{Visitor, Walker};

#[derive(Default)]
pub struct CodePushing {
    analyzer: LocalAnalyzer,
    /// Gets seen so far in the main postorder traversal, per local.
    num_gets_so_far: Vec<u32>,
    another_cycle: bool,
}

impl Pass for CodePushing {
    fn name(&self) -> &'static str {
        "code-pushing"
    }

    fn is_function_parallel(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Pass> {
        Box::new(CodePushing::default())
    }

    fn run_function(&mut self, _module: &Module, func: &mut Function) {
        // pre-scan for SFA locals and their get/set counts
        self.analyzer.analyze(func);
        let root = func.body;
        loop {
            self.another_cycle = false;
            self.num_gets_so_far.clear();
            self.num_gets_so_far.resize(func.num_locals(), 0);
            Walker::new(func).walk(self, root);
            if !self.another_cycle {
                break;
            }
        }
    }
}

impl Visitor for CodePushing {
    fn visit_get_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        if let Expression::GetLocal { index, .. } = &w.func.arena[id] {
            self.num_gets_so_far[index.index()] += 1;
        }
    }

    fn visit_block(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        // Pushing needs at least size 3: something to push, something to
        // push it past, and something to use what was pushed.
        let len = match &w.func.arena[id] {
            Expression::Block { list, .. } => list.len(),
            _ => return,
        };
        if len < 3 {
            return;
        }
        // All children are behind us in the postorder walk. A local whose
        // gets-so-far equal its total gets has no users after this block,
        // so an SFA local defined here has all its uses downstream of its
        // single set, and the set can move forward past anything that does
        // not reorder against it.
        let mut pusher = Pusher {
            func: w.func,
            analyzer: &self.analyzer,
            num_gets_so_far: &self.num_gets_so_far,
            pushable_effects: FxHashMap::default(),
            pushed_into_if: false,
        };
        pusher.run(id);
        // pushing into an if opens new opportunities inside the arm
        if pusher.pushed_into_if {
            self.another_cycle = true;
        }
    }
}

/// Core optimization logic, used and discarded per block.
struct Pusher<'a> {
    func: &'a mut Function,
    analyzer: &'a LocalAnalyzer,
    num_gets_so_far: &'a [u32],
    /// Pushables may be scanned repeatedly; cache their effects.
    pushable_effects: FxHashMap<Expr, EffectAnalyzer>,
    pushed_into_if: bool,
}

impl<'a> Pusher<'a> {
    fn run(&mut self, block: Expr) {
        let mut list = match &mut self.func.arena[block] {
            Expression::Block { list, .. } => std::mem::take(list),
            _ => return,
        };

        // Find optimization segments: from the first pushable thing to the
        // first point we want to push past, then continue from where the
        // segment rewrite says.
        let relevant = list.len() - 1; // nothing to gain past the last element
        let mut i = 0;
        let mut first_pushable = None;
        while i < relevant {
            if first_pushable.is_none() && self.is_pushable(&list, i).is_some() {
                first_pushable = Some(i);
                i += 1;
                continue;
            }
            if let Some(first) = first_pushable {
                if self.is_push_point(&list, i) {
                    i = self.optimize_segment(&mut list, first, i);
                    first_pushable = None;
                    continue;
                }
            }
            i += 1;
        }

        if let Expression::Block { list: l, .. } = &mut self.func.arena[block] {
            *l = list;
        }
    }

    fn is_pushable(&self, list: &[Expr], i: usize) -> Option<Local> {
        let index = match &self.func.arena[list[i]] {
            Expression::SetLocal { index, .. } => *index,
            _ => return None,
        };
        let pushable = self.analyzer.is_sfa(index)
            && self.num_gets_so_far[index.index()] == self.analyzer.num_gets(index);
        pushable.then_some(index)
    }

    /// A point worth pushing past: conditional control flow.
    fn is_push_point(&self, list: &[Expr], i: usize) -> bool {
        let mut id = list[i];
        // look through drops
        if let Expression::Drop { value } = &self.func.arena[id] {
            id = *value;
        }
        match &self.func.arena[id] {
            Expression::If { .. } => true,
            Expression::Break { condition, .. } => condition.is_some(),
            _ => false,
        }
    }

    fn effects_of(&mut self, pushable: Expr) -> EffectAnalyzer {
        if let Some(e) = self.pushable_effects.get(&pushable) {
            return e.clone();
        }
        let e = EffectAnalyzer::of(&self.func.arena, pushable);
        self.pushable_effects.insert(pushable, e.clone());
        e
    }

    fn optimize_segment(
        &mut self,
        list: &mut Vec<Expr>,
        first_pushable: usize,
        push_point: usize,
    ) -> usize {
        debug_assert!(first_pushable < push_point);
        // Walk backward from the push point accumulating everything that
        // matters for moving past it; later pushables get out of the way of
        // earlier ones. The push point's own branching is the one thing we
        // deliberately ignore.
        let push_point_expr = list[push_point];
        let mut cumulative = EffectAnalyzer::of(&self.func.arena, push_point_expr);
        cumulative.branches = false;

        let iff = {
            let mut id = push_point_expr;
            if let Expression::Drop { value } = &self.func.arena[id] {
                id = *value;
            }
            match &self.func.arena[id] {
                Expression::If { .. } => Some(id),
                _ => None,
            }
        };
        let mut if_condition: Option<EffectAnalyzer> = None;
        let mut to_push: Vec<Expr> = vec![];
        let mut to_push_if_true: Vec<Expr> = vec![];
        let mut to_push_if_false: Vec<Expr> = vec![];

        let mut i = push_point - 1;
        loop {
            if let Some(index) = self.is_pushable(list, i) {
                let pushable = list[i];
                let effects = self.effects_of(pushable);
                if cumulative.invalidates(&effects) {
                    // cannot push past; maybe into an arm of the if, when
                    // the local is read only there
                    let mut stays = true;
                    if let Some(iff) = iff {
                        let condition_effects = match &if_condition {
                            Some(e) => e.clone(),
                            None => {
                                let condition = match &self.func.arena[iff] {
                                    Expression::If { condition, .. } => *condition,
                                    _ => unreachable!(),
                                };
                                let e = EffectAnalyzer::of(&self.func.arena, condition);
                                if_condition = Some(e.clone());
                                e
                            }
                        };
                        if !condition_effects.invalidates(&effects) {
                            let (if_true, if_false) = match &self.func.arena[iff] {
                                Expression::If {
                                    if_true, if_false, ..
                                } => (*if_true, *if_false),
                                _ => unreachable!(),
                            };
                            let total = self.analyzer.num_gets(index);
                            let true_gets =
                                GetLocalCounter::new(self.func, if_true).num_gets(index);
                            if true_gets == total {
                                to_push_if_true.push(pushable);
                                list[i] = self.func.arena.alloc(Expression::Nop);
                                stays = false;
                            } else if let Some(if_false) = if_false {
                                let false_gets =
                                    GetLocalCounter::new(self.func, if_false).num_gets(index);
                                if false_gets == total {
                                    to_push_if_false.push(pushable);
                                    list[i] = self.func.arena.alloc(Expression::Nop);
                                    stays = false;
                                }
                            }
                        }
                    }
                    if stays {
                        // it stays put; anything pushed earlier must now
                        // also get past it
                        cumulative.merge_in(&effects);
                    }
                } else {
                    to_push.push(pushable);
                }
                if i == first_pushable {
                    break;
                }
            } else {
                // not pushable, so it may block pushing
                cumulative.analyze(&self.func.arena, list[i]);
                if i == first_pushable {
                    break;
                }
            }
            debug_assert!(i > 0);
            i -= 1;
        }

        let total = to_push.len();
        if total == 0 && to_push_if_true.is_empty() && to_push_if_false.is_empty() {
            return push_point + 1;
        }

        // compact the list over the pushed elements, then lay the pushed
        // elements out right after the push point in their original order
        if total > 0 {
            let last = total - 1;
            let mut skip = 0;
            for i in first_pushable..=push_point {
                if skip < total && list[i] == to_push[last - skip] {
                    skip += 1;
                } else if skip > 0 {
                    list[i - skip] = list[i];
                }
            }
            debug_assert_eq!(skip, total);
            for (i, &pushed) in to_push.iter().enumerate() {
                list[push_point - i] = pushed;
            }
        }

        // elements pushed into an if arm become the arm's preamble
        if let Some(iff) = iff {
            let mut push_into = |pusher: &mut Pusher, pushed: &[Expr], arm: Expr| {
                let ty = pusher.func.arena[arm].ty();
                let mut new_list: Vec<Expr> = pushed.iter().rev().copied().collect();
                pusher.func.arena.wrap(arm, |inner| {
                    new_list.push(inner);
                    Expression::Block {
                        name: None,
                        list: new_list,
                        ty,
                    }
                });
            };
            if !to_push_if_true.is_empty() {
                let arm = match &self.func.arena[iff] {
                    Expression::If { if_true, .. } => *if_true,
                    _ => unreachable!(),
                };
                push_into(self, &to_push_if_true, arm);
                self.pushed_into_if = true;
            }
            if !to_push_if_false.is_empty() {
                let arm = match &self.func.arena[iff] {
                    Expression::If {
                        if_false: Some(if_false),
                        ..
                    } => *if_false,
                    _ => unreachable!(),
                };
                push_into(self, &to_push_if_false, arm);
                self.pushed_into_if = true;
            }
        }

        // continue right after the push point; the pushed elements may be
        // pushable again
        push_point + 1 - total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, LocalDef, Type};

    #[test]
    fn pushes_a_set_past_a_conditional_break() {
        // x = 1; br_if $out (p); use(x)  =>  br_if $out (p); x = 1; use(x)
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let p = Local::new(0);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(1);
        let set = b.make_set_local(x, c);
        let cond = b.make_get_local(p);
        let br = b.make_br_if("out", cond);
        let get = b.make_get_local(x);
        let drop = b.make_drop(get);
        let block = b.make_block_named("out", vec![set, br, drop]);
        func.body = block;

        let module = Module::default();
        let mut pass = CodePushing::default();
        pass.run_function(&module, &mut func);

        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        assert!(matches!(&func.arena[list[0]], Expression::Break { .. }));
        assert!(matches!(
            &func.arena[list[1]],
            Expression::SetLocal { .. }
        ));
    }

    #[test]
    fn does_not_push_past_an_invalidating_condition() {
        // x = p + 1; br_if $out (x); use(x): the set feeds the condition
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let p = Local::new(0);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let gp = b.make_get_local(p);
        let c = b.make_i32_const(1);
        let add = func.arena.alloc(Expression::Binary {
            op: crate::ir::BinaryOp::Add,
            left: gp,
            right: c,
            ty: Type::I32,
        });
        let mut b = Builder::new(&mut func);
        let set = b.make_set_local(x, add);
        let cond = b.make_get_local(x);
        let br = b.make_br_if("out", cond);
        let get = b.make_get_local(x);
        let drop = b.make_drop(get);
        let block = b.make_block_named("out", vec![set, br, drop]);
        func.body = block;

        let module = Module::default();
        let mut pass = CodePushing::default();
        pass.run_function(&module, &mut func);

        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        assert!(matches!(
            &func.arena[list[0]],
            Expression::SetLocal { .. }
        ));
    }

    #[test]
    fn pushes_into_the_arm_that_reads_the_local() {
        // x = v; if (x-invalidating cond? no: cond reads p) { use(x) } -
        // where pushing past the if is invalid because x is read inside
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let p = Local::new(0);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(5);
        let set = b.make_set_local(x, c);
        let cond = b.make_get_local(p);
        let get = b.make_get_local(x);
        let drop_in_arm = b.make_drop(get);
        let arm = b.make_block(vec![drop_in_arm]);
        let iff = b.make_if(cond, arm, None);
        let nop = b.make_nop();
        let body = b.make_block(vec![set, iff, nop]);
        func.body = body;

        let module = Module::default();
        let mut pass = CodePushing::default();
        pass.run_function(&module, &mut func);

        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        // the set's old slot is a nop now
        assert!(func.arena[list[0]].is_nop());
        // and the arm starts with the set
        let arm = match &func.arena[list[1]] {
            Expression::If { if_true, .. } => *if_true,
            _ => panic!(),
        };
        match &func.arena[arm] {
            Expression::Block { list, .. } => {
                assert!(matches!(
                    &func.arena[list[0]],
                    Expression::SetLocal { .. }
                ));
            }
            other => panic!("arm is {}", other.kind_name()),
        }
    }
}
