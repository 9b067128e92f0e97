//! Analysis utilities shared by passes.

mod count;
mod effects;

pub use count::*;
pub use effects::*;

use crate::arena::{Expr, ExprArena};
use crate::ir::{Expression, Function, Name, Type};

/// Iterate a subtree in postorder, read-only, with an explicit stack.
pub fn each_expr_post(arena: &ExprArena, root: Expr, mut f: impl FnMut(Expr)) {
    enum Step {
        Expand(Expr),
        Emit(Expr),
    }
    let mut stack = vec![Step::Expand(root)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Expand(id) => {
                stack.push(Step::Emit(id));
                let children = arena[id].children();
                for &child in children.iter().rev() {
                    stack.push(Step::Expand(child));
                }
            }
            Step::Emit(id) => f(id),
        }
    }
}

/// Given a walker's ancestor stack (innermost last, current node on top),
/// decide whether the current node's result value has any observer.
///
/// Blocks pass only their final element through; if-arms pass through when
/// an else exists (otherwise the arm value is discarded); loops pass their
/// body value through; a `Drop` observes nothing; every other parent
/// consumes its children. At the function top, the value is used exactly
/// when the function returns one.
pub fn is_result_used(stack: &[Expr], func: &Function) -> bool {
    let arena = &func.arena;
    for i in (0..stack.len().saturating_sub(1)).rev() {
        let curr = stack[i];
        let above = stack[i + 1];
        match &arena[curr] {
            Expression::Block { list, .. } => {
                if list.last() != Some(&above) {
                    return false;
                }
            }
            Expression::If {
                condition,
                if_false,
                ..
            } => {
                if *condition == above {
                    return true;
                }
                if if_false.is_none() {
                    return false;
                }
            }
            Expression::Loop { .. } => {}
            Expression::Drop { .. } => return false,
            _ => return true,
        }
    }
    func.result != Type::None
}

/// Whether any descendant of `root` branches to `name`.
pub fn has_break_to(arena: &ExprArena, root: Expr, name: &Name) -> bool {
    let mut found = false;
    each_expr_post(arena, root, |id| match &arena[id] {
        Expression::Break { name: n, .. } => {
            if n == name {
                found = true;
            }
        }
        Expression::Switch {
            targets, default, ..
        } => {
            if default == name || targets.iter().any(|t| t == name) {
                found = true;
            }
        }
        _ => {}
    });
    found
}
