//! Locals-related optimizations.
//!
//! "Sinks" set_locals, pushing them to the next get_local where possible,
//! and removing the set entirely when no gets remain. Also notes where sets
//! coalesce: if all breaks out of a block set the same local as their final
//! action, the block grows a return value carrying it, replacing several
//! sets with one at the block's use site; the analogous rewrite applies to
//! the two arms of an if.
//!
//! The simple case sinks within one basic block. When control flow splits,
//! each sinkable carries a rational *fragment* of itself into every branch;
//! it may only fully sink again once all fragments re-unite at a merge.
//! Control flow lost to a return or unreachable just never contributes a
//! fragment. Flow entering a loop invalidates everything: a value that
//! travels a back edge can never be sunk.

use std::collections::BTreeMap;

use fxhash::{FxHashMap, FxHashSet};

use crate::analysis::{is_result_used, EffectAnalyzer, GetLocalCounter};
use crate::arena::Expr;
use crate::ir::{Expression, Function, Local, Module, Name};
use crate::pass::Pass;
use crate::walker::{scan_linear, LinearVisitor, Visitor, Walker};

/// A rational share in [0, 1]: how much of a split control flow still
/// carries this sinkable.
#[derive(Clone, Copy, Debug)]
struct Fragment {
    top: u64,
    bottom: u64,
}

impl Fragment {
    fn whole() -> Fragment {
        Fragment { top: 1, bottom: 1 }
    }

    fn one(&self) -> bool {
        self.top == self.bottom
    }

    fn split(&mut self, factor: u64) {
        self.bottom = self.bottom.saturating_mul(factor);
    }

    fn add(&mut self, other: &Fragment) {
        if self.bottom == other.bottom {
            self.top += other.top;
        } else {
            self.top = self.top * other.bottom + other.top * self.bottom;
            self.bottom *= other.bottom;
        }
        if self.top == self.bottom {
            self.top = 1;
            self.bottom = 1;
        }
    }
}

/// A set_local whose value may still be sunk: the handle of the set node
/// and the effects of the whole set.
#[derive(Clone, Debug)]
struct SinkableInfo {
    item: Expr,
    effects: EffectAnalyzer,
    frag: Fragment,
}

impl SinkableInfo {
    fn new(func: &Function, item: Expr) -> SinkableInfo {
        SinkableInfo {
            item,
            effects: EffectAnalyzer::of(&func.arena, item),
            frag: Fragment::whole(),
        }
    }
}

/// Sinkables along the current linear execution trace, ordered by local so
/// shared-index selection is deterministic.
#[derive(Clone, Debug, Default)]
struct Sinkables(BTreeMap<Local, SinkableInfo>);

impl Sinkables {
    fn split(&mut self, factor: u64) {
        for info in self.0.values_mut() {
            info.frag.split(factor);
        }
    }

    /// Keep only entries present in both with the same set instance, adding
    /// their fragments.
    fn merge(&mut self, other: &Sinkables) {
        self.0.retain(|index, info| match other.0.get(index) {
            Some(other_info) if other_info.item == info.item => {
                info.frag.add(&other_info.frag);
                true
            }
            _ => false,
        });
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// An exit from a block: the break, and the sinkables its trace carried.
#[derive(Debug)]
struct BlockBreak {
    br: Expr,
    sinkables: Sinkables,
}

#[derive(Default)]
pub struct SimplifyLocals {
    /// Sinkables on the current trace.
    sinkables: Sinkables,
    /// Per block label, the traces that break to it. The falling-through
    /// exit is `self.sinkables` when the block closes.
    block_breaks: FxHashMap<Name, Vec<BlockBreak>>,
    /// Blocks we cannot grow a return value for: switch targets, and blocks
    /// whose breaks already carry values.
    unoptimizable_blocks: FxHashSet<Name>,
    /// Saved sinkable states across if splits.
    if_stack: Vec<Sinkables>,
    expression_stack: Vec<Expr>,
    another_cycle: bool,
    blocks_to_enlarge: Vec<Expr>,
    ifs_to_enlarge: Vec<Expr>,
}

impl SimplifyLocals {
    fn check_invalidations(&mut self, effects: &EffectAnalyzer) {
        self.sinkables
            .0
            .retain(|_, info| !effects.invalidates(&info.effects));
    }

    fn visit_pre(pass: &mut SimplifyLocals, _w: &mut Walker<'_, SimplifyLocals>, id: Expr) {
        pass.expression_stack.push(id);
    }

    /// Set_local handling happens here rather than in the visitor, because
    /// the node at this handle may be a set that just replaced a sunk get.
    fn visit_post(pass: &mut SimplifyLocals, w: &mut Walker<'_, SimplifyLocals>, id: Expr) {
        let set_index = match &w.func.arena[id] {
            Expression::SetLocal { index, .. } => Some(*index),
            _ => None,
        };

        if let Some(index) = set_index {
            // a whole sinkable already pending for this local means that
            // store is dead: leave just its value
            let dead = match pass.sinkables.0.get(&index) {
                Some(info) if info.frag.one() => Some(info.item),
                _ => None,
            };
            if let Some(old) = dead {
                if let Expression::SetLocal { value, .. } = w.func.arena[old] {
                    w.func.arena.hoist(old, value);
                    pass.sinkables.0.remove(&index);
                    pass.another_cycle = true;
                }
            }
        }

        let effects = EffectAnalyzer::shallow(&w.func.arena[id]);
        if effects.has_anything() {
            pass.check_invalidations(&effects);
        }

        if let Some(index) = set_index {
            if !is_result_used(&pass.expression_stack, w.func) {
                debug_assert!(!pass.sinkables.0.contains_key(&index));
                pass.sinkables
                    .0
                    .insert(index, SinkableInfo::new(w.func, id));
            }
        }

        pass.expression_stack.pop();
    }

    fn note_if_condition(pass: &mut SimplifyLocals, _w: &mut Walker<'_, SimplifyLocals>, _id: Expr) {
        // control flow branches in two; each side carries half of every
        // sinkable
        pass.sinkables.split(2);
        pass.if_stack.push(pass.sinkables.clone());
    }

    fn note_if_true(pass: &mut SimplifyLocals, w: &mut Walker<'_, SimplifyLocals>, id: Expr) {
        let for_if_false = match pass.if_stack.pop() {
            Some(s) => s,
            None => return,
        };
        let has_else = matches!(
            &w.func.arena[id],
            Expression::If {
                if_false: Some(_),
                ..
            }
        );
        if has_else {
            // save the if-true side, start the if-false side fresh
            pass.if_stack
                .push(std::mem::take(&mut pass.sinkables));
            pass.sinkables = for_if_false;
        } else {
            // no else: as if the other side were empty
            pass.sinkables.merge(&for_if_false);
        }
    }

    fn note_if_false(pass: &mut SimplifyLocals, w: &mut Walker<'_, SimplifyLocals>, id: Expr) {
        let if_true = match pass.if_stack.pop() {
            Some(s) => s,
            None => return,
        };
        pass.optimize_if_return(w, id, &if_true);
        pass.sinkables.merge(&if_true);
    }

    fn visit_block_impl(&mut self, w: &mut Walker<'_, SimplifyLocals>, id: Expr) {
        let name = match &w.func.arena[id] {
            Expression::Block { name, .. } => name.clone(),
            _ => return,
        };
        let has_breaks = name
            .as_ref()
            .map_or(false, |n| self.block_breaks.get(n).map_or(false, |v| !v.is_empty()));

        self.optimize_block_return(w, id, name.as_ref());

        if let Some(name) = name {
            if self.unoptimizable_blocks.remove(&name) {
                self.sinkables.clear();
            }
            if has_breaks {
                // more than one path reaches this point
                self.sinkables.clear();
                self.block_breaks.remove(&name);
            }
        }
    }

    fn optimize_block_return(
        &mut self,
        w: &mut Walker<'_, SimplifyLocals>,
        id: Expr,
        name: Option<&Name>,
    ) {
        let Some(name) = name else { return };
        if self.unoptimizable_blocks.contains(name) {
            return;
        }
        let breaks = match self.block_breaks.remove(name) {
            Some(breaks) if !breaks.is_empty() => breaks,
            _ => return,
        };
        // recorded breaks never carry values
        debug_assert!(breaks.iter().all(|b| matches!(
            &w.func.arena[b.br],
            Expression::Break { value: None, .. }
        )));

        // a local whose whole sinkable is present on the falling-through
        // trace and in every break's trace
        let mut shared = None;
        for (&index, info) in &self.sinkables.0 {
            if !info.frag.one() {
                continue;
            }
            let in_all = breaks.iter().all(|b| {
                b.sinkables
                    .0
                    .get(&index)
                    .map_or(false, |i| i.frag.one())
            });
            if in_all {
                shared = Some(index);
                break;
            }
        }
        let Some(shared) = shared else { return };

        // we need a trailing nop to hold the return value; if there is
        // none, grow the block and try again next cycle
        let last = match &w.func.arena[id] {
            Expression::Block { list, .. } => list.last().copied(),
            _ => return,
        };
        let last = match last {
            Some(last) if w.func.arena[last].is_nop() => last,
            _ => {
                self.blocks_to_enlarge.push(id);
                return;
            }
        };

        // move the falling-through set's value into return position
        let set = self.sinkables.0[&shared].item;
        let value = match w.func.arena[set] {
            Expression::SetLocal { value, .. } => value,
            _ => return,
        };
        w.func.arena.hoist(last, value);
        let value_ty = w.func.arena[last].ty();
        w.func.arena[set] = Expression::Nop;
        if let Expression::Block { ty, .. } = &mut w.func.arena[id] {
            *ty = value_ty;
        }

        // each break carries its own set's value as the break value
        for b in &breaks {
            let Some(info) = b.sinkables.0.get(&shared) else {
                continue;
            };
            let break_set = info.item;
            let break_value = match w.func.arena[break_set] {
                Expression::SetLocal { value, .. } => value,
                _ => continue,
            };
            w.func.arena[break_set] = Expression::Nop;
            if let Expression::Break { value, .. } = &mut w.func.arena[b.br] {
                *value = Some(break_value);
            }
        }

        // one set_local wraps the block itself
        w.func.arena.wrap(id, |inner| Expression::SetLocal {
            index: shared,
            value: inner,
            tee: true,
            ty: value_ty,
        });
        self.sinkables.clear();
        self.another_cycle = true;
    }

    /// Coalesce sets on both sides of an if-else into an if return value.
    fn optimize_if_return(
        &mut self,
        w: &mut Walker<'_, SimplifyLocals>,
        id: Expr,
        if_true: &Sinkables,
    ) {
        debug_assert_eq!(self.expression_stack.last(), Some(&id));
        if is_result_used(&self.expression_stack, w.func) {
            return;
        }
        let if_false = &self.sinkables;
        let mut shared = None;
        for (&index, info) in &if_true.0 {
            if !info.frag.one() {
                continue;
            }
            if if_false.0.get(&index).map_or(false, |i| i.frag.one()) {
                shared = Some(index);
                break;
            }
        }
        let Some(shared) = shared else { return };

        // both arms must be blocks ending in a nop; otherwise grow them and
        // come back next cycle
        let (true_arm, false_arm) = match &w.func.arena[id] {
            Expression::If {
                if_true,
                if_false: Some(if_false),
                ..
            } => (*if_true, *if_false),
            _ => return,
        };
        let arm_slot = |func: &Function, arm: Expr| match &func.arena[arm] {
            Expression::Block { list, .. } => match list.last() {
                Some(&last) if func.arena[last].is_nop() => Some(last),
                _ => None,
            },
            _ => None,
        };
        let (Some(true_slot), Some(false_slot)) =
            (arm_slot(w.func, true_arm), arm_slot(w.func, false_arm))
        else {
            self.ifs_to_enlarge.push(id);
            return;
        };

        let move_value = |func: &mut Function, set: Expr, slot: Expr| {
            if let Expression::SetLocal { value, .. } = func.arena[set] {
                func.arena.hoist(slot, value);
                func.arena[set] = Expression::Nop;
            }
        };
        move_value(w.func, if_true.0[&shared].item, true_slot);
        move_value(w.func, if_false.0[&shared].item, false_slot);
        w.func.arena.finalize(true_arm);
        w.func.arena.finalize(false_arm);
        w.func.arena.finalize(id);
        let ty = w.func.arena[id].ty();
        debug_assert!(ty.is_concrete());

        w.func.arena.wrap(id, |inner| Expression::SetLocal {
            index: shared,
            value: inner,
            tee: true,
            ty,
        });
        self.another_cycle = true;
    }
}

impl Visitor for SimplifyLocals {
    fn scan(pass: &mut Self, w: &mut Walker<'_, Self>, id: Expr) {
        w.push_task(Self::visit_post, id);
        let if_parts = match &w.func.arena[id] {
            Expression::If {
                condition,
                if_true,
                if_false,
                ..
            } => Some((*condition, *if_true, *if_false)),
            _ => None,
        };
        if let Some((condition, if_true, if_false)) = if_parts {
            // ifs are driven by the if-stack hooks instead of the linear
            // notes
            if let Some(if_false) = if_false {
                w.push_task(Self::note_if_false, id);
                w.push_scan(if_false);
            }
            w.push_task(Self::note_if_true, id);
            w.push_scan(if_true);
            w.push_task(Self::note_if_condition, id);
            w.push_scan(condition);
        } else {
            scan_linear(pass, w, id);
        }
        w.push_task(Self::visit_pre, id);
    }

    fn visit_block(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_block_impl(w, id);
    }

    fn visit_get_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        let index = match &w.func.arena[id] {
            Expression::GetLocal { index, .. } => *index,
            _ => return,
        };
        let sinkable = match self.sinkables.0.get(&index) {
            Some(info) if info.frag.one() => Some(info.item),
            _ => None,
        };
        if let Some(set) = sinkable {
            // sink the set into the get's place (it acts as a tee there);
            // a nop remains at its origin
            w.func.arena.hoist(id, set);
            if let Expression::SetLocal { tee, .. } = &mut w.func.arena[id] {
                *tee = true;
            }
            self.sinkables.0.remove(&index);
            self.another_cycle = true;
        }
    }
}

impl LinearVisitor for SimplifyLocals {
    fn note_non_linear(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        match &w.func.arena[id] {
            Expression::Break {
                name,
                value,
                ..
            } => {
                if value.is_some() {
                    // a break value means the block already returns one
                    self.unoptimizable_blocks.insert(name.clone());
                } else {
                    let name = name.clone();
                    self.block_breaks
                        .entry(name)
                        .or_default()
                        .push(BlockBreak {
                            br: id,
                            sinkables: std::mem::take(&mut self.sinkables),
                        });
                }
            }
            Expression::Block { .. } => return, // handled in visit_block
            Expression::Switch {
                targets, default, ..
            } => {
                for target in targets {
                    self.unoptimizable_blocks.insert(target.clone());
                }
                self.unoptimizable_blocks.insert(default.clone());
            }
            _ => {}
        }
        self.sinkables.clear();
    }
}

impl Pass for SimplifyLocals {
    fn name(&self) -> &'static str {
        "simplify-locals"
    }

    fn is_function_parallel(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Pass> {
        Box::new(SimplifyLocals::default())
    }

    fn run_function(&mut self, _module: &Module, func: &mut Function) {
        // multiple cycles may be needed: consider x = load; y = store;
        // use(x, y) - the load cannot cross the store, but y can sink,
        // after which x can too
        let root = func.body;
        loop {
            self.another_cycle = false;
            Walker::new(func).walk(self, root);

            if !self.blocks_to_enlarge.is_empty() {
                for id in std::mem::take(&mut self.blocks_to_enlarge) {
                    let nop = func.arena.alloc(Expression::Nop);
                    if let Expression::Block { list, .. } = &mut func.arena[id] {
                        list.push(nop);
                    }
                }
                self.another_cycle = true;
            }
            if !self.ifs_to_enlarge.is_empty() {
                for id in std::mem::take(&mut self.ifs_to_enlarge) {
                    enlarge_if(func, id);
                }
                self.another_cycle = true;
            }

            self.sinkables.clear();
            self.block_breaks.clear();
            self.unoptimizable_blocks.clear();
            self.if_stack.clear();
            self.expression_stack.clear();
            if !self.another_cycle {
                break;
            }
        }

        // after converging, sets of locals with no remaining gets can drop
        // to just their values
        let counter = GetLocalCounter::new(func, root);
        let mut remover = SetLocalRemover { counter };
        Walker::new(func).walk(&mut remover, root);
    }
}

/// Blockify both arms of an if and give each a trailing nop, so the next
/// cycle has slots for the coalesced return values.
fn enlarge_if(func: &mut Function, id: Expr) {
    let arms = match &func.arena[id] {
        Expression::If {
            if_true,
            if_false: Some(if_false),
            ..
        } => Some((*if_true, *if_false)),
        _ => None,
    };
    let Some((true_arm, false_arm)) = arms else {
        return;
    };
    for arm in [true_arm, false_arm] {
        if !matches!(&func.arena[arm], Expression::Block { .. }) {
            let ty = func.arena[arm].ty();
            func.arena.wrap(arm, |inner| Expression::Block {
                name: None,
                list: vec![inner],
                ty,
            });
        }
        let needs_nop = match &func.arena[arm] {
            Expression::Block { list, .. } => {
                list.last().map_or(true, |&last| !func.arena[last].is_nop())
            }
            _ => false,
        };
        if needs_nop {
            let nop = func.arena.alloc(Expression::Nop);
            if let Expression::Block { list, .. } = &mut func.arena[arm] {
                list.push(nop);
            }
        }
    }
}

/// Rewrites sets of unread locals to just their values.
struct SetLocalRemover {
    counter: GetLocalCounter,
}

impl Visitor for SetLocalRemover {
    fn visit_set_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        let (index, value) = match &w.func.arena[id] {
            Expression::SetLocal { index, value, .. } => (*index, *value),
            _ => return,
        };
        if self.counter.num_gets(index) == 0 {
            w.func.arena.hoist(id, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Literal, LocalDef, Type};

    fn run(func: &mut Function) {
        let module = Module::default();
        let mut pass = SimplifyLocals::default();
        pass.run_function(&module, func);
    }

    #[test]
    fn sinks_a_set_to_its_get() {
        // x = 7; use(x)  =>  use(x = 7), then the unread set drops away
        let mut func = Function::new("t", vec![], Type::I32);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(7);
        let set = b.make_set_local(x, c);
        let get = b.make_get_local(x);
        let ret = b.make_return(Some(get));
        let body = b.make_block(vec![set, ret]);
        func.body = body;

        run(&mut func);

        // the set slot became a nop, and the get slot holds the set, whose
        // own set was then removed as unread, leaving the constant
        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            other => panic!("body is {:?}", other.kind_name()),
        };
        assert!(func.arena[list[0]].is_nop());
        let ret_value = match &func.arena[list[1]] {
            Expression::Return { value: Some(v) } => *v,
            other => panic!("expected return, got {}", other.kind_name()),
        };
        match &func.arena[ret_value] {
            Expression::Const { value } => assert_eq!(*value, Literal::I32(7)),
            other => panic!("expected const, got {}", other.kind_name()),
        }
    }

    #[test]
    fn memory_read_does_not_cross_a_call() {
        // x = load(0); call f; use(x) - the load cannot sink past the call
        let mut func = Function::new("t", vec![], Type::I32);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let addr = b.make_i32_const(0);
        let load = func.arena.alloc(Expression::Load {
            bytes: 4,
            signed: false,
            offset: 0,
            align: 0,
            ptr: addr,
            ty: Type::I32,
        });
        let mut b = Builder::new(&mut func);
        let set = b.make_set_local(x, load);
        let call = b.make_call("t", vec![], Type::None);
        let get = b.make_get_local(x);
        let ret = b.make_return(Some(get));
        let body = b.make_block(vec![set, call, ret]);
        func.body = body;

        run(&mut func);

        let list = match &func.arena[func.body] {
            Expression::Block { list, .. } => list.clone(),
            _ => panic!(),
        };
        // the set stays where it was
        assert!(matches!(
            &func.arena[list[0]],
            Expression::SetLocal { .. }
        ));
        assert!(matches!(&func.arena[list[1]], Expression::Call { .. }));
    }

    #[test]
    fn block_breaks_coalesce_into_a_return_value() {
        // block $out { if (p) { r = 1; br $out }; r = 2; nop }; call t;
        // return r
        // => r = block $out { if (p) { br $out (1) }; 2 }; call t; return r
        // (the call keeps the wrapping set from sinking into the get)
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::I32);
        let p = Local::new(0);
        let r = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c1 = b.make_i32_const(1);
        let set1 = b.make_set_local(r, c1);
        let br = b.make_br("out");
        let then = b.make_block(vec![set1, br]);
        let cond = b.make_get_local(p);
        let iff = b.make_if(cond, then, None);
        let c2 = b.make_i32_const(2);
        let set2 = b.make_set_local(r, c2);
        let nop = b.make_nop();
        let block = b.make_block_named("out", vec![iff, set2, nop]);
        let call = b.make_call("t", vec![], Type::I32);
        let use_r = b.make_get_local(r);
        let ret = b.make_return(Some(use_r));
        let body = b.make_block(vec![block, call, ret]);
        func.body = body;

        run(&mut func);

        // the body's first element is now a set_local of r wrapping the
        // named block
        let outer = match &func.arena[func.body] {
            Expression::Block { list, .. } => list[0],
            _ => panic!(),
        };
        let (index, inner) = match &func.arena[outer] {
            Expression::SetLocal { index, value, .. } => (*index, *value),
            other => panic!("expected wrapping set, got {}", other.kind_name()),
        };
        assert_eq!(index, r);
        let (list, ty) = match &func.arena[inner] {
            Expression::Block { list, ty, .. } => (list.clone(), *ty),
            other => panic!("expected block, got {}", other.kind_name()),
        };
        assert_eq!(ty, Type::I32);
        // the break now carries the value 1
        let br = match &func.arena[list[0]] {
            Expression::If { if_true, .. } => match &func.arena[*if_true] {
                Expression::Block { list, .. } => list
                    .iter()
                    .find(|&&e| matches!(&func.arena[e], Expression::Break { .. }))
                    .copied()
                    .unwrap(),
                Expression::Break { .. } => *if_true,
                other => panic!("unexpected arm {}", other.kind_name()),
            },
            other => panic!("expected if, got {}", other.kind_name()),
        };
        match &func.arena[br] {
            Expression::Break {
                value: Some(v), ..
            } => match &func.arena[*v] {
                Expression::Const { value } => assert_eq!(*value, Literal::I32(1)),
                other => panic!("break value is {}", other.kind_name()),
            },
            other => panic!("expected valued break, got {:?}", other.kind_name()),
        }
        // the block's fallthrough value is the constant 2
        match &func.arena[*list.last().unwrap()] {
            Expression::Const { value } => assert_eq!(*value, Literal::I32(2)),
            other => panic!("fallthrough is {}", other.kind_name()),
        }
    }
}
