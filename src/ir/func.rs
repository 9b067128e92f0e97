//! Functions and locals.

use super::{Name, Type};
use crate::arena::{Expr, ExprArena};

/// A flat local index: parameters first, in declared order, then vars. The
/// wrapper keeps local indices from being confused with other integers; it
/// orders and hashes like its index so analysis state can key maps on it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Local(u32);

impl Local {
    pub fn new(index: usize) -> Local {
        Local(u32::try_from(index).unwrap())
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "l{}", self.0)
    }
}

impl std::fmt::Display for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// A named, typed local slot.
#[derive(Clone, Debug)]
pub struct LocalDef {
    pub name: Name,
    pub ty: Type,
}

impl LocalDef {
    pub fn new(name: impl Into<Name>, ty: Type) -> LocalDef {
        LocalDef {
            name: name.into(),
            ty,
        }
    }
}

/// A function: parameters first, then additional vars, in one flat local
/// index space. The body lives in the function's own arena, so per-function
/// passes own a disjoint tree.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Name,
    /// The module-level function type this function was declared with, if
    /// one has been assigned.
    pub ty: Option<Name>,
    pub params: Vec<LocalDef>,
    pub result: Type,
    pub vars: Vec<LocalDef>,
    pub body: Expr,
    pub arena: ExprArena,
}

impl Function {
    pub fn new(name: impl Into<Name>, params: Vec<LocalDef>, result: Type) -> Function {
        let mut arena = ExprArena::default();
        let body = arena.alloc(super::Expression::Nop);
        Function {
            name: name.into(),
            ty: None,
            params,
            result,
            vars: vec![],
            body,
            arena,
        }
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn num_locals(&self) -> usize {
        self.params.len() + self.vars.len()
    }

    pub fn is_param(&self, local: Local) -> bool {
        local.index() < self.params.len()
    }

    pub fn local_type(&self, local: Local) -> Type {
        let i = local.index();
        if i < self.params.len() {
            self.params[i].ty
        } else {
            self.vars[i - self.params.len()].ty
        }
    }

    /// Append a fresh var and return its flat index.
    pub fn add_var(&mut self, ty: Type) -> Local {
        let index = Local::new(self.num_locals());
        self.vars
            .push(LocalDef::new(format!("var${}", index.index()), ty));
        index
    }
}
