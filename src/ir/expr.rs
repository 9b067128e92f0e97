//! Expression nodes.
//!
//! Every node is a variant of [`Expression`], held in the owning function's
//! arena and addressed by [`Expr`] handles. Child handles form a strict tree:
//! no node is referenced from two parents.

use smallvec::SmallVec;

use super::{Literal, Local, Name, Type};
use crate::arena::{Expr, ExprArena};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Clz,
    Ctz,
    Popcnt,
    EqZ,
    Neg,
    Abs,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
    ExtendSInt32,
    ExtendUInt32,
    WrapInt64,
    TruncSFloat32,
    TruncUFloat32,
    TruncSFloat64,
    TruncUFloat64,
    ConvertSInt32,
    ConvertUInt32,
    ConvertSInt64,
    ConvertUInt64,
    PromoteFloat32,
    DemoteFloat64,
    ReinterpretFloat,
    ReinterpretInt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    RotL,
    RotR,
    // float-only
    Div,
    CopySign,
    Min,
    Max,
    // comparisons
    Eq,
    Ne,
    LtS,
    LtU,
    LeS,
    LeU,
    GtS,
    GtU,
    GeS,
    GeU,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostOp {
    CurrentMemory,
    GrowMemory,
}

#[derive(Clone, Debug)]
pub enum Expression {
    Nop,
    Block {
        name: Option<Name>,
        list: Vec<Expr>,
        ty: Type,
    },
    If {
        condition: Expr,
        if_true: Expr,
        if_false: Option<Expr>,
        ty: Type,
    },
    Loop {
        /// Break target that exits the loop.
        out: Option<Name>,
        /// Break target that continues at the loop head.
        cont: Option<Name>,
        body: Expr,
        ty: Type,
    },
    Break {
        name: Name,
        value: Option<Expr>,
        condition: Option<Expr>,
    },
    Switch {
        condition: Expr,
        value: Option<Expr>,
        targets: Vec<Name>,
        default: Name,
    },
    Call {
        target: Name,
        operands: Vec<Expr>,
        ty: Type,
    },
    CallImport {
        target: Name,
        operands: Vec<Expr>,
        ty: Type,
    },
    CallIndirect {
        sig: Name,
        target: Expr,
        operands: Vec<Expr>,
        ty: Type,
    },
    GetLocal {
        index: Local,
        ty: Type,
    },
    SetLocal {
        index: Local,
        value: Expr,
        /// Whether the set's result value has an observer.
        tee: bool,
        ty: Type,
    },
    Load {
        bytes: u8,
        signed: bool,
        offset: u32,
        /// Concrete alignment; 0 means natural (the access width).
        align: u32,
        ptr: Expr,
        ty: Type,
    },
    Store {
        bytes: u8,
        offset: u32,
        align: u32,
        ptr: Expr,
        value: Expr,
        ty: Type,
    },
    Const {
        value: Literal,
    },
    Unary {
        op: UnaryOp,
        value: Expr,
        ty: Type,
    },
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
        ty: Type,
    },
    Select {
        if_true: Expr,
        if_false: Expr,
        condition: Expr,
        ty: Type,
    },
    Drop {
        value: Expr,
    },
    Return {
        value: Option<Expr>,
    },
    Host {
        op: HostOp,
        operand: Option<Expr>,
        ty: Type,
    },
    Unreachable,
}

/// Discriminant of an [`Expression`], for cheap dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Nop,
    Block,
    If,
    Loop,
    Break,
    Switch,
    Call,
    CallImport,
    CallIndirect,
    GetLocal,
    SetLocal,
    Load,
    Store,
    Const,
    Unary,
    Binary,
    Select,
    Drop,
    Return,
    Host,
    Unreachable,
}

impl Expression {
    pub fn kind(&self) -> ExprKind {
        match self {
            Expression::Nop => ExprKind::Nop,
            Expression::Block { .. } => ExprKind::Block,
            Expression::If { .. } => ExprKind::If,
            Expression::Loop { .. } => ExprKind::Loop,
            Expression::Break { .. } => ExprKind::Break,
            Expression::Switch { .. } => ExprKind::Switch,
            Expression::Call { .. } => ExprKind::Call,
            Expression::CallImport { .. } => ExprKind::CallImport,
            Expression::CallIndirect { .. } => ExprKind::CallIndirect,
            Expression::GetLocal { .. } => ExprKind::GetLocal,
            Expression::SetLocal { .. } => ExprKind::SetLocal,
            Expression::Load { .. } => ExprKind::Load,
            Expression::Store { .. } => ExprKind::Store,
            Expression::Const { .. } => ExprKind::Const,
            Expression::Unary { .. } => ExprKind::Unary,
            Expression::Binary { .. } => ExprKind::Binary,
            Expression::Select { .. } => ExprKind::Select,
            Expression::Drop { .. } => ExprKind::Drop,
            Expression::Return { .. } => ExprKind::Return,
            Expression::Host { .. } => ExprKind::Host,
            Expression::Unreachable => ExprKind::Unreachable,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind() {
            ExprKind::Nop => "nop",
            ExprKind::Block => "block",
            ExprKind::If => "if",
            ExprKind::Loop => "loop",
            ExprKind::Break => "break",
            ExprKind::Switch => "switch",
            ExprKind::Call => "call",
            ExprKind::CallImport => "call_import",
            ExprKind::CallIndirect => "call_indirect",
            ExprKind::GetLocal => "get_local",
            ExprKind::SetLocal => "set_local",
            ExprKind::Load => "load",
            ExprKind::Store => "store",
            ExprKind::Const => "const",
            ExprKind::Unary => "unary",
            ExprKind::Binary => "binary",
            ExprKind::Select => "select",
            ExprKind::Drop => "drop",
            ExprKind::Return => "return",
            ExprKind::Host => "host",
            ExprKind::Unreachable => "unreachable",
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Expression::Nop)
    }

    /// The node's result type. Control transfers and statements yield
    /// `Type::None`.
    pub fn ty(&self) -> Type {
        match self {
            Expression::Nop
            | Expression::Break { .. }
            | Expression::Switch { .. }
            | Expression::Drop { .. }
            | Expression::Return { .. }
            | Expression::Unreachable => Type::None,
            Expression::Const { value } => value.ty(),
            Expression::Block { ty, .. }
            | Expression::If { ty, .. }
            | Expression::Loop { ty, .. }
            | Expression::Call { ty, .. }
            | Expression::CallImport { ty, .. }
            | Expression::CallIndirect { ty, .. }
            | Expression::GetLocal { ty, .. }
            | Expression::SetLocal { ty, .. }
            | Expression::Load { ty, .. }
            | Expression::Store { ty, .. }
            | Expression::Unary { ty, .. }
            | Expression::Binary { ty, .. }
            | Expression::Select { ty, .. }
            | Expression::Host { ty, .. } => *ty,
        }
    }

    /// Visit every child handle in execution order.
    pub fn visit_children(&self, mut f: impl FnMut(Expr)) {
        match self {
            Expression::Nop
            | Expression::GetLocal { .. }
            | Expression::Const { .. }
            | Expression::Unreachable => {}
            Expression::Block { list, .. } => {
                for &child in list {
                    f(child);
                }
            }
            Expression::If {
                condition,
                if_true,
                if_false,
                ..
            } => {
                f(*condition);
                f(*if_true);
                if let Some(e) = if_false {
                    f(*e);
                }
            }
            Expression::Loop { body, .. } => f(*body),
            Expression::Break {
                value, condition, ..
            } => {
                if let Some(v) = value {
                    f(*v);
                }
                if let Some(c) = condition {
                    f(*c);
                }
            }
            Expression::Switch {
                condition, value, ..
            } => {
                if let Some(v) = value {
                    f(*v);
                }
                f(*condition);
            }
            Expression::Call { operands, .. } | Expression::CallImport { operands, .. } => {
                for &op in operands {
                    f(op);
                }
            }
            Expression::CallIndirect {
                target, operands, ..
            } => {
                f(*target);
                for &op in operands {
                    f(op);
                }
            }
            Expression::SetLocal { value, .. } => f(*value),
            Expression::Load { ptr, .. } => f(*ptr),
            Expression::Store { ptr, value, .. } => {
                f(*ptr);
                f(*value);
            }
            Expression::Unary { value, .. } => f(*value),
            Expression::Binary { left, right, .. } => {
                f(*left);
                f(*right);
            }
            Expression::Select {
                if_true,
                if_false,
                condition,
                ..
            } => {
                f(*if_true);
                f(*if_false);
                f(*condition);
            }
            Expression::Drop { value } => f(*value),
            Expression::Return { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            Expression::Host { operand, .. } => {
                if let Some(o) = operand {
                    f(*o);
                }
            }
        }
    }

    /// Child handles in execution order.
    pub fn children(&self) -> SmallVec<[Expr; 4]> {
        let mut out = SmallVec::new();
        self.visit_children(|c| out.push(c));
        out
    }
}

impl ExprArena {
    /// Recompute the cached result type of `id` from its children.
    /// Idempotent; does not recurse.
    pub fn finalize(&mut self, id: Expr) {
        let new_ty = match &self[id] {
            Expression::Block { list, .. } => match list.last() {
                Some(&last) => self[last].ty(),
                None => Type::None,
            },
            Expression::If {
                if_true, if_false, ..
            } => match if_false {
                Some(if_false) => {
                    let t = self[*if_true].ty();
                    if t == self[*if_false].ty() {
                        t
                    } else {
                        Type::None
                    }
                }
                None => Type::None,
            },
            Expression::Loop { body, .. } => self[*body].ty(),
            Expression::SetLocal { value, .. } => self[*value].ty(),
            Expression::Select { if_true, .. } => self[*if_true].ty(),
            _ => return,
        };
        match &mut self[id] {
            Expression::Block { ty, .. }
            | Expression::If { ty, .. }
            | Expression::Loop { ty, .. }
            | Expression::SetLocal { ty, .. }
            | Expression::Select { ty, .. } => *ty = new_ty,
            _ => {}
        }
    }

}
