//! Basic-block graphs over structured ASTs.
//!
//! [`Cfg::build`] runs a walker over a function body and splits it into
//! basic blocks at the structured control constructs, recording successor
//! and predecessor edges. Passes that need explicit control-flow structure
//! (rather than the linear-execution hooks) build one of these.

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::Expr;
use crate::ir::{Expression, Function, Name};
use crate::walker::{scan_postorder, Visitor, Walker};

/// A basic block's position in its [`Cfg`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BasicBlock(u32);

impl BasicBlock {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    /// Non-control expressions executed in this block, in order.
    pub exprs: Vec<Expr>,
    pub succs: SmallVec<[BasicBlock; 2]>,
    pub preds: SmallVec<[BasicBlock; 2]>,
}

#[derive(Clone, Debug)]
pub struct Cfg {
    pub entry: BasicBlock,
    pub exit: BasicBlock,
    pub blocks: Vec<BlockData>,
}

impl Cfg {
    pub fn build(func: &mut Function) -> Cfg {
        let mut builder = CfgBuilder::new();
        let root = func.body;
        Walker::new(func).walk(&mut builder, root);
        // fallthrough at the end of the body returns
        builder.edge(builder.current, builder.exit);
        Cfg {
            entry: builder.entry,
            exit: builder.exit,
            blocks: builder.blocks,
        }
    }

    pub fn succs(&self, block: BasicBlock) -> &[BasicBlock] {
        &self.blocks[block.index()].succs
    }

    pub fn preds(&self, block: BasicBlock) -> &[BasicBlock] {
        &self.blocks[block.index()].preds
    }
}

enum Aux {
    NamedBlock {
        join: BasicBlock,
        shadowed: Option<(Name, Option<BasicBlock>)>,
    },
    If {
        join: BasicBlock,
        else_block: Option<BasicBlock>,
    },
    Loop {
        after: BasicBlock,
        shadowed_out: Option<(Name, Option<BasicBlock>)>,
        shadowed_cont: Option<(Name, Option<BasicBlock>)>,
    },
}

struct CfgBuilder {
    blocks: Vec<BlockData>,
    entry: BasicBlock,
    exit: BasicBlock,
    current: BasicBlock,
    targets: FxHashMap<Name, BasicBlock>,
    aux: FxHashMap<Expr, Aux>,
}

impl CfgBuilder {
    fn new() -> CfgBuilder {
        let mut builder = CfgBuilder {
            blocks: vec![],
            entry: BasicBlock(0),
            exit: BasicBlock(0),
            current: BasicBlock(0),
            targets: FxHashMap::default(),
            aux: FxHashMap::default(),
        };
        builder.entry = builder.fresh();
        builder.exit = builder.fresh();
        builder.current = builder.entry;
        builder
    }

    fn fresh(&mut self) -> BasicBlock {
        let id = BasicBlock(u32::try_from(self.blocks.len()).unwrap());
        self.blocks.push(BlockData::default());
        id
    }

    fn edge(&mut self, from: BasicBlock, to: BasicBlock) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    /// Bind `name` to `target`, returning what it shadowed.
    fn bind(&mut self, name: &Option<Name>, target: BasicBlock) -> Option<(Name, Option<BasicBlock>)> {
        name.as_ref().map(|n| {
            let prev = self.targets.insert(n.clone(), target);
            (n.clone(), prev)
        })
    }

    fn unbind(&mut self, shadowed: &Option<(Name, Option<BasicBlock>)>) {
        if let Some((name, prev)) = shadowed {
            match prev {
                Some(prev) => {
                    self.targets.insert(name.clone(), *prev);
                }
                None => {
                    self.targets.remove(name);
                }
            }
        }
    }

    fn target_of(&self, name: &Name) -> BasicBlock {
        // every break target is an enclosing scope's label
        *self
            .targets
            .get(name)
            .unwrap_or_else(|| panic!("unresolved break target {:?}", name))
    }
}

fn finish_named_block(pass: &mut CfgBuilder, _w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    if let Some(Aux::NamedBlock { join, shadowed }) = pass.aux.remove(&id) {
        pass.edge(pass.current, join);
        pass.current = join;
        pass.unbind(&shadowed);
    }
}

fn split_if(pass: &mut CfgBuilder, w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    let has_else = matches!(
        &w.func.arena[id],
        Expression::If {
            if_false: Some(_),
            ..
        }
    );
    let then_block = pass.fresh();
    let join = pass.fresh();
    let else_block = if has_else { Some(pass.fresh()) } else { None };
    pass.edge(pass.current, then_block);
    pass.edge(pass.current, else_block.unwrap_or(join));
    pass.aux.insert(id, Aux::If { join, else_block });
    pass.current = then_block;
}

fn mid_if(pass: &mut CfgBuilder, _w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    if let Some(Aux::If { join, else_block }) = pass.aux.get(&id) {
        let (join, else_block) = (*join, *else_block);
        pass.edge(pass.current, join);
        pass.current = else_block.unwrap_or(join);
    }
}

fn finish_if(pass: &mut CfgBuilder, _w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    if let Some(Aux::If { join, else_block }) = pass.aux.remove(&id) {
        if else_block.is_some() {
            pass.edge(pass.current, join);
            pass.current = join;
        }
        // without an else, mid_if already moved to the join
    }
}

fn finish_loop(pass: &mut CfgBuilder, _w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    if let Some(Aux::Loop {
        after,
        shadowed_out,
        shadowed_cont,
    }) = pass.aux.remove(&id)
    {
        pass.edge(pass.current, after);
        pass.current = after;
        pass.unbind(&shadowed_cont);
        pass.unbind(&shadowed_out);
    }
}

fn do_break(pass: &mut CfgBuilder, w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    let (name, conditional) = match &w.func.arena[id] {
        Expression::Break {
            name, condition, ..
        } => (name.clone(), condition.is_some()),
        _ => return,
    };
    let target = pass.target_of(&name);
    pass.edge(pass.current, target);
    let next = pass.fresh();
    if conditional {
        pass.edge(pass.current, next);
    }
    pass.current = next;
}

fn do_switch(pass: &mut CfgBuilder, w: &mut Walker<'_, CfgBuilder>, id: Expr) {
    let (targets, default) = match &w.func.arena[id] {
        Expression::Switch {
            targets, default, ..
        } => (targets.clone(), default.clone()),
        _ => return,
    };
    for t in &targets {
        let target = pass.target_of(t);
        pass.edge(pass.current, target);
    }
    let target = pass.target_of(&default);
    pass.edge(pass.current, target);
    pass.current = pass.fresh();
}

fn do_return(pass: &mut CfgBuilder, _w: &mut Walker<'_, CfgBuilder>, _id: Expr) {
    let exit = pass.exit;
    pass.edge(pass.current, exit);
    pass.current = pass.fresh();
}

fn do_unreachable(pass: &mut CfgBuilder, _w: &mut Walker<'_, CfgBuilder>, _id: Expr) {
    pass.current = pass.fresh();
}

enum Shape {
    Plain,
    Block { name: Option<Name> },
    If(Expr, Expr, Option<Expr>),
    Loop { out: Option<Name>, cont: Option<Name> },
    Leave(TaskKind),
}

#[derive(Clone, Copy)]
enum TaskKind {
    Break,
    Switch,
    Return,
    Unreachable,
}

impl Visitor for CfgBuilder {
    fn scan(pass: &mut Self, w: &mut Walker<'_, Self>, id: Expr) {
        let mut children: SmallVec<[Expr; 4]> = SmallVec::new();
        let shape = match &w.func.arena[id] {
            Expression::Block { name, list, .. } => {
                children.extend(list.iter().copied());
                Shape::Block { name: name.clone() }
            }
            Expression::If {
                condition,
                if_true,
                if_false,
                ..
            } => Shape::If(*condition, *if_true, *if_false),
            Expression::Loop {
                out, cont, body, ..
            } => {
                children.push(*body);
                Shape::Loop {
                    out: out.clone(),
                    cont: cont.clone(),
                }
            }
            node @ Expression::Break { .. } => {
                children = node.children();
                Shape::Leave(TaskKind::Break)
            }
            node @ Expression::Switch { .. } => {
                children = node.children();
                Shape::Leave(TaskKind::Switch)
            }
            node @ Expression::Return { .. } => {
                children = node.children();
                Shape::Leave(TaskKind::Return)
            }
            Expression::Unreachable => Shape::Leave(TaskKind::Unreachable),
            _ => Shape::Plain,
        };

        match shape {
            Shape::Plain => scan_postorder(pass, w, id),
            Shape::Block { name } => {
                if name.is_some() {
                    let join = pass.fresh();
                    let shadowed = pass.bind(&name, join);
                    pass.aux.insert(id, Aux::NamedBlock { join, shadowed });
                    w.push_task(finish_named_block, id);
                }
                for &child in children.iter().rev() {
                    w.push_scan(child);
                }
            }
            Shape::If(condition, if_true, if_false) => {
                w.push_task(finish_if, id);
                if let Some(if_false) = if_false {
                    w.push_scan(if_false);
                }
                w.push_task(mid_if, id);
                w.push_scan(if_true);
                w.push_task(split_if, id);
                w.push_scan(condition);
            }
            Shape::Loop { out, cont } => {
                let head = pass.fresh();
                pass.edge(pass.current, head);
                pass.current = head;
                let after = pass.fresh();
                let shadowed_out = pass.bind(&out, after);
                let shadowed_cont = pass.bind(&cont, head);
                pass.aux.insert(
                    id,
                    Aux::Loop {
                        after,
                        shadowed_out,
                        shadowed_cont,
                    },
                );
                w.push_task(finish_loop, id);
                for &child in children.iter().rev() {
                    w.push_scan(child);
                }
            }
            Shape::Leave(kind) => {
                let task = match kind {
                    TaskKind::Break => do_break,
                    TaskKind::Switch => do_switch,
                    TaskKind::Return => do_return,
                    TaskKind::Unreachable => do_unreachable,
                };
                w.push_task(task, id);
                for &child in children.iter().rev() {
                    w.push_scan(child);
                }
            }
        }
    }

    fn visit_expression(&mut self, _w: &mut Walker<'_, Self>, id: Expr) {
        let current = self.current;
        self.blocks[current.index()].exprs.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Local, LocalDef, Type};

    #[test]
    fn if_else_makes_a_diamond() {
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let mut b = Builder::new(&mut func);
        let cond = b.make_get_local(Local::new(0));
        let t = b.make_nop();
        let f = b.make_nop();
        let iff = b.make_if(cond, t, Some(f));
        let body = b.make_block(vec![iff]);
        func.body = body;

        let cfg = Cfg::build(&mut func);
        // entry splits to the two arms
        assert_eq!(cfg.succs(cfg.entry).len(), 2);
        let join = cfg.succs(cfg.succs(cfg.entry)[0])[0];
        assert_eq!(cfg.preds(join).len(), 2);
        // the join falls through to the exit
        assert_eq!(cfg.succs(join), &[cfg.exit]);
    }

    #[test]
    fn loop_continue_makes_a_back_edge() {
        let mut func = Function::new("t", vec![LocalDef::new("p", Type::I32)], Type::None);
        let mut b = Builder::new(&mut func);
        let cond = b.make_get_local(Local::new(0));
        let br = b.make_br_if("in", cond);
        let inner = b.make_block(vec![br]);
        let lp = b.make_loop(Some("out".into()), Some("in".into()), inner);
        let body = b.make_block(vec![lp]);
        func.body = body;

        let cfg = Cfg::build(&mut func);
        // some block has the loop head as a successor twice-reachable:
        // the head has two preds (entry fall-in and the back edge)
        let head = cfg.succs(cfg.entry)[0];
        assert_eq!(cfg.preds(head).len(), 2);
    }
}
