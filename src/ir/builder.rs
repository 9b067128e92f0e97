//! AST construction helpers.
//!
//! A [`Builder`] allocates nodes into one function's arena. Passes and the
//! binary reader construct everything through it, so freshly built nodes get
//! their types filled in one place.

use super::{Expression, Function, HostOp, Literal, Local, Name, Type};
use crate::arena::Expr;

pub struct Builder<'f> {
    pub func: &'f mut Function,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut Function) -> Builder<'f> {
        Builder { func }
    }

    fn alloc(&mut self, node: Expression) -> Expr {
        self.func.arena.alloc(node)
    }

    pub fn make_nop(&mut self) -> Expr {
        self.alloc(Expression::Nop)
    }

    pub fn make_unreachable(&mut self) -> Expr {
        self.alloc(Expression::Unreachable)
    }

    pub fn make_block(&mut self, list: Vec<Expr>) -> Expr {
        let ty = match list.last() {
            Some(&last) => self.func.arena[last].ty(),
            None => Type::None,
        };
        self.alloc(Expression::Block {
            name: None,
            list,
            ty,
        })
    }

    pub fn make_block_named(&mut self, name: impl Into<Name>, list: Vec<Expr>) -> Expr {
        let id = self.make_block(list);
        if let Expression::Block { name: n, .. } = &mut self.func.arena[id] {
            *n = Some(name.into());
        }
        id
    }

    /// A two-element block: `first` for effect, `second` for the value.
    pub fn make_sequence(&mut self, first: Expr, second: Expr) -> Expr {
        self.make_block(vec![first, second])
    }

    pub fn make_if(&mut self, condition: Expr, if_true: Expr, if_false: Option<Expr>) -> Expr {
        let ty = match if_false {
            Some(if_false) => {
                let t = self.func.arena[if_true].ty();
                if t == self.func.arena[if_false].ty() {
                    t
                } else {
                    Type::None
                }
            }
            None => Type::None,
        };
        self.alloc(Expression::If {
            condition,
            if_true,
            if_false,
            ty,
        })
    }

    pub fn make_loop(&mut self, out: Option<Name>, cont: Option<Name>, body: Expr) -> Expr {
        let ty = self.func.arena[body].ty();
        self.alloc(Expression::Loop {
            out,
            cont,
            body,
            ty,
        })
    }

    pub fn make_br(&mut self, name: impl Into<Name>) -> Expr {
        self.alloc(Expression::Break {
            name: name.into(),
            value: None,
            condition: None,
        })
    }

    pub fn make_br_if(&mut self, name: impl Into<Name>, condition: Expr) -> Expr {
        self.alloc(Expression::Break {
            name: name.into(),
            value: None,
            condition: Some(condition),
        })
    }

    pub fn make_get_local(&mut self, index: Local) -> Expr {
        let ty = self.func.local_type(index);
        self.alloc(Expression::GetLocal { index, ty })
    }

    pub fn make_set_local(&mut self, index: Local, value: Expr) -> Expr {
        let ty = self.func.arena[value].ty();
        self.alloc(Expression::SetLocal {
            index,
            value,
            tee: true,
            ty,
        })
    }

    pub fn make_const(&mut self, value: Literal) -> Expr {
        self.alloc(Expression::Const { value })
    }

    pub fn make_i32_const(&mut self, value: i32) -> Expr {
        self.make_const(Literal::I32(value))
    }

    pub fn make_call(&mut self, target: impl Into<Name>, operands: Vec<Expr>, ty: Type) -> Expr {
        self.alloc(Expression::Call {
            target: target.into(),
            operands,
            ty,
        })
    }

    pub fn make_drop(&mut self, value: Expr) -> Expr {
        self.alloc(Expression::Drop { value })
    }

    pub fn make_return(&mut self, value: Option<Expr>) -> Expr {
        self.alloc(Expression::Return { value })
    }

    pub fn make_host(&mut self, op: HostOp, operand: Option<Expr>) -> Expr {
        self.alloc(Expression::Host {
            op,
            operand,
            ty: Type::I32,
        })
    }
}
