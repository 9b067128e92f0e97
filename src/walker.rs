//! Task-stack traversal over expression trees.
//!
//! Traversal never recurses: a [`Walker`] drives an explicit stack of tasks,
//! so stack usage is O(1) in tree depth and a pass can splice its own hook
//! tasks around a node (see `SimplifyLocals`' overridden `scan`).

use smallvec::SmallVec;

use crate::arena::Expr;
use crate::ir::{ExprKind, Expression, Function};

pub type TaskFn<P> = fn(&mut P, &mut Walker<'_, P>, Expr);

enum Task<P> {
    Scan(Expr),
    Visit(Expr),
    Run(TaskFn<P>, Expr),
}

pub struct Walker<'f, P> {
    pub func: &'f mut Function,
    tasks: Vec<Task<P>>,
}

impl<'f, P: Visitor> Walker<'f, P> {
    pub fn new(func: &'f mut Function) -> Walker<'f, P> {
        Walker {
            func,
            tasks: vec![],
        }
    }

    /// Drive a full traversal of the subtree at `root`.
    pub fn walk(&mut self, pass: &mut P, root: Expr) {
        self.tasks.push(Task::Scan(root));
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Scan(id) => P::scan(pass, self, id),
                Task::Visit(id) => dispatch(pass, self, id),
                Task::Run(f, id) => f(pass, self, id),
            }
        }
    }

    pub fn push_scan(&mut self, id: Expr) {
        self.tasks.push(Task::Scan(id));
    }

    pub fn push_visit(&mut self, id: Expr) {
        self.tasks.push(Task::Visit(id));
    }

    pub fn push_task(&mut self, f: TaskFn<P>, id: Expr) {
        self.tasks.push(Task::Run(f, id));
    }
}

fn dispatch<P: Visitor>(pass: &mut P, w: &mut Walker<'_, P>, id: Expr) {
    match w.func.arena[id].kind() {
        ExprKind::Nop => pass.visit_nop(w, id),
        ExprKind::Block => pass.visit_block(w, id),
        ExprKind::If => pass.visit_if(w, id),
        ExprKind::Loop => pass.visit_loop(w, id),
        ExprKind::Break => pass.visit_break(w, id),
        ExprKind::Switch => pass.visit_switch(w, id),
        ExprKind::Call => pass.visit_call(w, id),
        ExprKind::CallImport => pass.visit_call_import(w, id),
        ExprKind::CallIndirect => pass.visit_call_indirect(w, id),
        ExprKind::GetLocal => pass.visit_get_local(w, id),
        ExprKind::SetLocal => pass.visit_set_local(w, id),
        ExprKind::Load => pass.visit_load(w, id),
        ExprKind::Store => pass.visit_store(w, id),
        ExprKind::Const => pass.visit_const(w, id),
        ExprKind::Unary => pass.visit_unary(w, id),
        ExprKind::Binary => pass.visit_binary(w, id),
        ExprKind::Select => pass.visit_select(w, id),
        ExprKind::Drop => pass.visit_drop(w, id),
        ExprKind::Return => pass.visit_return(w, id),
        ExprKind::Host => pass.visit_host(w, id),
        ExprKind::Unreachable => pass.visit_unreachable(w, id),
    }
}

/// Postorder visitor with one method per variant. Every method falls back to
/// `visit_expression`, which defaults to nothing, so passes override only
/// what they care about. `scan` expands a node into tasks and may be
/// overridden to splice in custom hooks.
pub trait Visitor: Sized {
    fn scan(pass: &mut Self, w: &mut Walker<'_, Self>, id: Expr) {
        scan_postorder(pass, w, id);
    }

    fn visit_expression(&mut self, _w: &mut Walker<'_, Self>, _id: Expr) {}

    fn visit_nop(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_block(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_if(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_loop(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_break(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_switch(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_call(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_call_import(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_call_indirect(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_get_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_set_local(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_load(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_store(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_const(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_unary(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_binary(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_select(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_drop(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_return(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_host(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
    fn visit_unreachable(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        self.visit_expression(w, id)
    }
}

/// Default postorder expansion: children in execution order, then the visit.
pub fn scan_postorder<P: Visitor>(_pass: &mut P, w: &mut Walker<'_, P>, id: Expr) {
    w.push_visit(id);
    let children = w.func.arena[id].children();
    for &child in children.iter().rev() {
        w.push_scan(child);
    }
}

/// A visitor that additionally observes where straight-line execution is
/// interrupted: after breaks, switches, returns and unreachables, at the
/// close of a named block (a merge point), at a loop head (the back-edge
/// target), and at if-arm boundaries. Passes implementing this should make
/// their `scan` call [`scan_linear`].
pub trait LinearVisitor: Visitor {
    fn note_non_linear(&mut self, w: &mut Walker<'_, Self>, id: Expr) {
        let _ = (w, id);
    }
}

fn do_note_non_linear<P: LinearVisitor>(pass: &mut P, w: &mut Walker<'_, P>, id: Expr) {
    pass.note_non_linear(w, id);
}

/// Expansion for linear-execution walks; anchors `note_non_linear` as
/// documented on [`LinearVisitor`].
pub fn scan_linear<P: LinearVisitor>(_pass: &mut P, w: &mut Walker<'_, P>, id: Expr) {
    enum Shape {
        /// Plain postorder.
        Plain,
        /// Named block: branch targets arrive before the visit.
        Merge,
        /// Loop: the head starts a fresh trace before the body.
        LoopHead,
        /// Break, switch, return, unreachable: execution leaves after the
        /// visit.
        Leave,
        If(Expr, Expr, Option<Expr>),
    }

    let mut children: SmallVec<[Expr; 4]> = SmallVec::new();
    let shape = match &w.func.arena[id] {
        Expression::Block { name, list, .. } => {
            children.extend(list.iter().copied());
            if name.is_some() {
                Shape::Merge
            } else {
                Shape::Plain
            }
        }
        Expression::If {
            condition,
            if_true,
            if_false,
            ..
        } => Shape::If(*condition, *if_true, *if_false),
        Expression::Loop { body, .. } => {
            children.push(*body);
            Shape::LoopHead
        }
        node @ (Expression::Break { .. }
        | Expression::Switch { .. }
        | Expression::Return { .. }
        | Expression::Unreachable) => {
            children = node.children();
            Shape::Leave
        }
        node => {
            children = node.children();
            Shape::Plain
        }
    };

    match shape {
        Shape::Plain => {
            w.push_visit(id);
            for &child in children.iter().rev() {
                w.push_scan(child);
            }
        }
        Shape::Merge => {
            w.push_visit(id);
            w.push_task(do_note_non_linear::<P>, id);
            for &child in children.iter().rev() {
                w.push_scan(child);
            }
        }
        Shape::LoopHead => {
            w.push_visit(id);
            for &child in children.iter().rev() {
                w.push_scan(child);
            }
            w.push_task(do_note_non_linear::<P>, id);
        }
        Shape::Leave => {
            w.push_task(do_note_non_linear::<P>, id);
            w.push_visit(id);
            for &child in children.iter().rev() {
                w.push_scan(child);
            }
        }
        Shape::If(condition, if_true, if_false) => {
            w.push_visit(id);
            if let Some(if_false) = if_false {
                w.push_scan(if_false);
            }
            w.push_task(do_note_non_linear::<P>, id);
            w.push_scan(if_true);
            w.push_task(do_note_non_linear::<P>, id);
            w.push_scan(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Function, Local, LocalDef, Type};

    struct Recorder {
        order: Vec<Expr>,
    }

    impl Visitor for Recorder {
        fn visit_expression(&mut self, _w: &mut Walker<'_, Self>, id: Expr) {
            self.order.push(id);
        }
    }

    struct LinearRecorder {
        order: Vec<Expr>,
        notes: usize,
    }

    impl Visitor for LinearRecorder {
        fn scan(pass: &mut Self, w: &mut Walker<'_, Self>, id: Expr) {
            scan_linear(pass, w, id);
        }
        fn visit_expression(&mut self, _w: &mut Walker<'_, Self>, id: Expr) {
            self.order.push(id);
        }
    }

    impl LinearVisitor for LinearRecorder {
        fn note_non_linear(&mut self, _w: &mut Walker<'_, Self>, _id: Expr) {
            self.notes += 1;
        }
    }

    fn test_function() -> Function {
        let mut func = Function::new("test", vec![LocalDef::new("p0", Type::I32)], Type::I32);
        let mut b = Builder::new(&mut func);
        let cond = b.make_get_local(Local::new(0));
        let t = b.make_i32_const(1);
        let f = b.make_i32_const(2);
        let iff = b.make_if(cond, t, Some(f));
        let ret = b.make_return(Some(iff));
        let body = b.make_block(vec![ret]);
        func.body = body;
        func
    }

    #[test]
    fn postorder_visits_each_node_once() {
        let mut func = test_function();
        let root = func.body;
        let mut pass = Recorder { order: vec![] };
        Walker::new(&mut func).walk(&mut pass, root);
        // 6 nodes constructed under the root (the initial placeholder body
        // is unreachable from the new root)
        assert_eq!(pass.order.len(), 6);
        let mut dedup = pass.order.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), pass.order.len());
        // root visited last
        assert_eq!(*pass.order.last().unwrap(), root);
    }

    #[test]
    fn linear_walk_notes_if_arms_and_exits() {
        let mut func = test_function();
        let root = func.body;
        let mut pass = LinearRecorder {
            order: vec![],
            notes: 0,
        };
        Walker::new(&mut func).walk(&mut pass, root);
        assert_eq!(pass.order.len(), 6);
        // two if-arm boundaries plus the return
        assert_eq!(pass.notes, 3);
    }
}
