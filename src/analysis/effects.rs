//! Side-effect analysis.

use fxhash::FxHashSet;

use super::each_expr_post;
use crate::arena::{Expr, ExprArena};
use crate::ir::{BinaryOp, Expression, Local, UnaryOp};

/// The observable effects of an expression (or an accumulated group of
/// them), and the reordering constraints they impose.
#[derive(Clone, Debug, Default)]
pub struct EffectAnalyzer {
    pub branches: bool,
    pub calls: bool,
    pub reads_memory: bool,
    pub writes_memory: bool,
    pub traps: bool,
    pub locals_read: FxHashSet<Local>,
    pub locals_written: FxHashSet<Local>,
}

impl EffectAnalyzer {
    /// Deep effects of the whole subtree at `root`.
    pub fn of(arena: &ExprArena, root: Expr) -> EffectAnalyzer {
        let mut e = EffectAnalyzer::default();
        e.analyze(arena, root);
        e
    }

    /// Accumulate the deep effects of the subtree at `root`.
    pub fn analyze(&mut self, arena: &ExprArena, root: Expr) {
        each_expr_post(arena, root, |id| self.record(&arena[id]));
    }

    /// Effects of a single node, ignoring its children.
    pub fn shallow(node: &Expression) -> EffectAnalyzer {
        let mut e = EffectAnalyzer::default();
        e.record(node);
        e
    }

    fn record(&mut self, node: &Expression) {
        match node {
            Expression::Break { .. }
            | Expression::Switch { .. }
            | Expression::Return { .. }
            | Expression::Unreachable => self.branches = true,
            Expression::Call { .. }
            | Expression::CallImport { .. }
            | Expression::CallIndirect { .. }
            | Expression::Host { .. } => self.calls = true,
            Expression::GetLocal { index, .. } => {
                self.locals_read.insert(*index);
            }
            Expression::SetLocal { index, .. } => {
                self.locals_written.insert(*index);
            }
            Expression::Load { .. } => {
                self.reads_memory = true;
                self.traps = true;
            }
            Expression::Store { .. } => {
                self.writes_memory = true;
                self.traps = true;
            }
            Expression::Unary { op, .. } => {
                if matches!(
                    op,
                    UnaryOp::TruncSFloat32
                        | UnaryOp::TruncUFloat32
                        | UnaryOp::TruncSFloat64
                        | UnaryOp::TruncUFloat64
                ) {
                    self.traps = true;
                }
            }
            Expression::Binary { op, .. } => {
                if matches!(
                    op,
                    BinaryOp::DivS | BinaryOp::DivU | BinaryOp::RemS | BinaryOp::RemU
                ) {
                    self.traps = true;
                }
            }
            _ => {}
        }
    }

    pub fn accesses_local(&self) -> bool {
        !self.locals_read.is_empty() || !self.locals_written.is_empty()
    }

    pub fn accesses_memory(&self) -> bool {
        self.calls || self.reads_memory || self.writes_memory
    }

    pub fn has_side_effects(&self) -> bool {
        self.branches || self.calls || self.writes_memory || !self.locals_written.is_empty()
    }

    pub fn has_anything(&self) -> bool {
        self.has_side_effects() || self.reads_memory || self.traps || self.accesses_local()
    }

    /// Whether moving `other` across `self` would change observable
    /// behavior: a branch against anything effectful, write-vs-access on
    /// overlapping categories, and distinct trap points against each other.
    pub fn invalidates(&self, other: &EffectAnalyzer) -> bool {
        if self.branches || other.branches {
            if self.has_anything() && other.has_anything() {
                return true;
            }
        }
        if (self.writes_memory || self.calls) && other.accesses_memory() {
            return true;
        }
        if self.accesses_memory() && (other.writes_memory || other.calls) {
            return true;
        }
        if self.traps && other.traps {
            return true;
        }
        for local in &self.locals_written {
            if other.locals_written.contains(local) || other.locals_read.contains(local) {
                return true;
            }
        }
        for local in &self.locals_read {
            if other.locals_written.contains(local) {
                return true;
            }
        }
        false
    }

    pub fn merge_in(&mut self, other: &EffectAnalyzer) {
        self.branches |= other.branches;
        self.calls |= other.calls;
        self.reads_memory |= other.reads_memory;
        self.writes_memory |= other.writes_memory;
        self.traps |= other.traps;
        self.locals_read.extend(other.locals_read.iter().copied());
        self.locals_written
            .extend(other.locals_written.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Function, Type};

    #[test]
    fn set_invalidates_get_of_same_local() {
        let mut func = Function::new("t", vec![], Type::None);
        let x = func.add_var(Type::I32);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(1);
        let set = b.make_set_local(x, c);
        let get = b.make_get_local(x);
        let set_effects = EffectAnalyzer::of(&func.arena, set);
        let get_effects = EffectAnalyzer::of(&func.arena, get);
        assert!(set_effects.invalidates(&get_effects));
        assert!(get_effects.invalidates(&set_effects));
        let y = Local::new(99);
        let mut other = EffectAnalyzer::default();
        other.locals_read.insert(y);
        assert!(!set_effects.invalidates(&other));
    }

    #[test]
    fn branch_invalidates_side_effects_only() {
        let mut branch = EffectAnalyzer::default();
        branch.branches = true;
        let mut write = EffectAnalyzer::default();
        write.writes_memory = true;
        assert!(branch.invalidates(&write));
        let nothing = EffectAnalyzer::default();
        assert!(!branch.invalidates(&nothing));
    }
}
