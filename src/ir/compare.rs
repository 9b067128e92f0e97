//! Structural equality between modules.
//!
//! A decoded module regenerates block and loop labels and local names, so
//! byte-level identity is not the round-trip contract. Two modules compare
//! equal here when they agree on everything observable: entity shapes,
//! cross-references resolved through each module's own name/index maps, and
//! expression trees with labels matched up to consistent renaming.

use fxhash::FxHashMap;

use super::{Expression, Function, Local, Module, Name};
use crate::arena::Expr;

impl Module {
    pub fn structurally_equal(&self, other: &Module) -> bool {
        if self.function_types.len() != other.function_types.len()
            || self.imports.len() != other.imports.len()
            || self.functions.len() != other.functions.len()
            || self.exports.len() != other.exports.len()
        {
            return false;
        }
        for (a, b) in self.function_types.iter().zip(&other.function_types) {
            if a.params != b.params || a.result != b.result {
                return false;
            }
        }
        for (a, b) in self.imports.iter().zip(&other.imports) {
            if a.module != b.module || a.base != b.base {
                return false;
            }
            let ta = self.function_types.iter().position(|t| t.name == a.ty);
            let tb = other.function_types.iter().position(|t| t.name == b.ty);
            if ta.is_none() || ta != tb {
                return false;
            }
        }
        for (a, b) in self.exports.iter().zip(&other.exports) {
            if a.name != b.name || self.function_index(&a.value) != other.function_index(&b.value) {
                return false;
            }
        }
        if self.memory.initial != other.memory.initial
            || self.memory.max != other.memory.max
            || self.memory.export_name.is_some() != other.memory.export_name.is_some()
            || self.memory.segments.len() != other.memory.segments.len()
        {
            return false;
        }
        for (a, b) in self.memory.segments.iter().zip(&other.memory.segments) {
            if a.offset != b.offset || a.data != b.data {
                return false;
            }
        }
        if self.table.names.len() != other.table.names.len() {
            return false;
        }
        for (a, b) in self.table.names.iter().zip(&other.table.names) {
            if self.function_index(a) != other.function_index(b) {
                return false;
            }
        }
        match (&self.start, &other.start) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                if self.function_index(a) != other.function_index(b) {
                    return false;
                }
            }
            _ => return false,
        }
        self.functions
            .iter()
            .zip(&other.functions)
            .all(|(fa, fb)| functions_equal(self, other, fa, fb))
    }
}

fn functions_equal(ma: &Module, mb: &Module, fa: &Function, fb: &Function) -> bool {
    if fa.name != fb.name
        || fa.result != fb.result
        || fa.params.len() != fb.params.len()
        || fa.vars.len() != fb.vars.len()
    {
        return false;
    }
    // local names are regenerated on decode, and the codec compacts var
    // order by type: params must agree positionally, vars as a multiset
    if fa.params.iter().zip(&fb.params).any(|(a, b)| a.ty != b.ty) {
        return false;
    }
    let mut va: Vec<_> = fa.vars.iter().map(|v| v.ty).collect();
    let mut vb: Vec<_> = fb.vars.iter().map(|v| v.ty).collect();
    va.sort_unstable();
    vb.sort_unstable();
    if va != vb {
        return false;
    }
    let mut cx = Cx {
        ma,
        mb,
        fa,
        fb,
        labels: FxHashMap::default(),
        local_map: FxHashMap::default(),
        local_map_rev: FxHashMap::default(),
    };
    cx.exprs_equal(fa.body, fb.body)
}

struct Cx<'a> {
    ma: &'a Module,
    mb: &'a Module,
    fa: &'a Function,
    fb: &'a Function,
    /// Maps labels of `fa` to the labels of `fb` bound at the same scope.
    labels: FxHashMap<Name, Name>,
    /// Bijection between var indices, established at first use.
    local_map: FxHashMap<Local, Local>,
    local_map_rev: FxHashMap<Local, Local>,
}

impl<'a> Cx<'a> {
    fn labels_equal(&self, a: &Name, b: &Name) -> bool {
        self.labels.get(a) == Some(b)
    }

    /// Params must correspond exactly; vars up to a consistent
    /// type-preserving renaming.
    fn locals_equal(&mut self, a: Local, b: Local) -> bool {
        let pa = self.fa.is_param(a);
        let pb = self.fb.is_param(b);
        if pa || pb {
            return pa && pb && a == b;
        }
        if self.fa.local_type(a) != self.fb.local_type(b) {
            return false;
        }
        match (self.local_map.get(&a), self.local_map_rev.get(&b)) {
            (Some(mapped), _) => *mapped == b,
            (None, Some(_)) => false,
            (None, None) => {
                self.local_map.insert(a, b);
                self.local_map_rev.insert(b, a);
                true
            }
        }
    }

    /// Bind an optional label pair around `body`, restoring any shadowed
    /// binding afterwards. A label on only one side binds nothing: label
    /// presence is unobservable unless some break targets it (and decode
    /// names every block it materializes), so only break resolution is
    /// compared.
    fn with_labels(
        &mut self,
        a: &Option<Name>,
        b: &Option<Name>,
        body: impl FnOnce(&mut Self) -> bool,
    ) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => {
                let shadowed = self.labels.insert(a.clone(), b.clone());
                let eq = body(self);
                match shadowed {
                    Some(prev) => {
                        self.labels.insert(a.clone(), prev);
                    }
                    None => {
                        self.labels.remove(a);
                    }
                }
                eq
            }
            _ => body(self),
        }
    }

    fn opt_exprs_equal(&mut self, a: Option<Expr>, b: Option<Expr>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.exprs_equal(a, b),
            _ => false,
        }
    }

    fn lists_equal(&mut self, a: &[Expr], b: &[Expr]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| self.exprs_equal(x, y))
    }

    fn exprs_equal(&mut self, a: Expr, b: Expr) -> bool {
        use Expression as E;
        // borrow through the 'a references so `self` stays free
        let (fa, fb): (&'a Function, &'a Function) = (self.fa, self.fb);
        // single-element blocks that nothing targets are transparent; the
        // decoder introduces them freely around if-arms
        let a = strip_transparent(fa, a);
        let b = strip_transparent(fb, b);
        match (&fa.arena[a], &fb.arena[b]) {
            (E::Nop, E::Nop) | (E::Unreachable, E::Unreachable) => true,
            (
                E::Block {
                    name: na, list: la, ..
                },
                E::Block {
                    name: nb, list: lb, ..
                },
            ) => self.with_labels(na, nb, |cx| cx.lists_equal(la, lb)),
            (
                E::If {
                    condition: ca,
                    if_true: ta,
                    if_false: ea,
                    ..
                },
                E::If {
                    condition: cb,
                    if_true: tb,
                    if_false: eb,
                    ..
                },
            ) => {
                self.exprs_equal(*ca, *cb)
                    && self.exprs_equal(*ta, *tb)
                    && self.opt_exprs_equal(*ea, *eb)
            }
            (
                E::Loop {
                    out: oa,
                    cont: ia,
                    body: ba,
                    ..
                },
                E::Loop {
                    out: ob,
                    cont: ib,
                    body: bb,
                    ..
                },
            ) => self.with_labels(oa, ob, |cx| {
                cx.with_labels(ia, ib, |cx| cx.exprs_equal(*ba, *bb))
            }),
            (
                E::Break {
                    name: na,
                    value: va,
                    condition: ca,
                },
                E::Break {
                    name: nb,
                    value: vb,
                    condition: cb,
                },
            ) => {
                self.labels_equal(na, nb)
                    && self.opt_exprs_equal(*va, *vb)
                    && self.opt_exprs_equal(*ca, *cb)
            }
            (
                E::Switch {
                    condition: ca,
                    value: va,
                    targets: ta,
                    default: da,
                },
                E::Switch {
                    condition: cb,
                    value: vb,
                    targets: tb,
                    default: db,
                },
            ) => {
                ta.len() == tb.len()
                    && self.labels_equal(da, db)
                    && ta.iter().zip(tb).all(|(x, y)| self.labels_equal(x, y))
                    && self.exprs_equal(*ca, *cb)
                    && self.opt_exprs_equal(*va, *vb)
            }
            (
                E::Call {
                    target: ta,
                    operands: oa,
                    ..
                },
                E::Call {
                    target: tb,
                    operands: ob,
                    ..
                },
            ) => {
                self.ma.function_index(ta).is_some()
                    && self.ma.function_index(ta) == self.mb.function_index(tb)
                    && self.lists_equal(oa, ob)
            }
            (
                E::CallImport {
                    target: ta,
                    operands: oa,
                    ..
                },
                E::CallImport {
                    target: tb,
                    operands: ob,
                    ..
                },
            ) => {
                let ia = self.ma.imports.iter().position(|i| &i.name == ta);
                let ib = self.mb.imports.iter().position(|i| &i.name == tb);
                ia.is_some() && ia == ib && self.lists_equal(oa, ob)
            }
            (
                E::CallIndirect {
                    sig: sa,
                    target: ta,
                    operands: oa,
                    ..
                },
                E::CallIndirect {
                    sig: sb,
                    target: tb,
                    operands: ob,
                    ..
                },
            ) => {
                let ia = self.ma.function_types.iter().position(|t| &t.name == sa);
                let ib = self.mb.function_types.iter().position(|t| &t.name == sb);
                ia.is_some() && ia == ib && self.exprs_equal(*ta, *tb) && self.lists_equal(oa, ob)
            }
            (E::GetLocal { index: ia, .. }, E::GetLocal { index: ib, .. }) => {
                self.locals_equal(*ia, *ib)
            }
            (
                E::SetLocal {
                    index: ia,
                    value: va,
                    ..
                },
                E::SetLocal {
                    index: ib,
                    value: vb,
                    ..
                },
            ) => self.locals_equal(*ia, *ib) && self.exprs_equal(*va, *vb),
            (
                E::Load {
                    bytes: ba,
                    signed: sa,
                    offset: oa,
                    align: aa,
                    ptr: pa,
                    ty: ya,
                },
                E::Load {
                    bytes: bb,
                    signed: sb,
                    offset: ob,
                    align: ab,
                    ptr: pb,
                    ty: yb,
                },
            ) => {
                ba == bb
                    && sa == sb
                    && oa == ob
                    && ya == yb
                    && norm_align(*aa, *ba) == norm_align(*ab, *bb)
                    && self.exprs_equal(*pa, *pb)
            }
            (
                E::Store {
                    bytes: ba,
                    offset: oa,
                    align: aa,
                    ptr: pa,
                    value: va,
                    ty: ya,
                },
                E::Store {
                    bytes: bb,
                    offset: ob,
                    align: ab,
                    ptr: pb,
                    value: vb,
                    ty: yb,
                },
            ) => {
                ba == bb
                    && oa == ob
                    && ya == yb
                    && norm_align(*aa, *ba) == norm_align(*ab, *bb)
                    && self.exprs_equal(*pa, *pb)
                    && self.exprs_equal(*va, *vb)
            }
            (E::Const { value: va }, E::Const { value: vb }) => va == vb,
            (
                E::Unary {
                    op: oa, value: va, ..
                },
                E::Unary {
                    op: ob, value: vb, ..
                },
            ) => oa == ob && self.exprs_equal(*va, *vb),
            (
                E::Binary {
                    op: oa,
                    left: la,
                    right: ra,
                    ..
                },
                E::Binary {
                    op: ob,
                    left: lb,
                    right: rb,
                    ..
                },
            ) => oa == ob && self.exprs_equal(*la, *lb) && self.exprs_equal(*ra, *rb),
            (
                E::Select {
                    if_true: ta,
                    if_false: fa2,
                    condition: ca,
                    ..
                },
                E::Select {
                    if_true: tb,
                    if_false: fb2,
                    condition: cb,
                    ..
                },
            ) => {
                self.exprs_equal(*ta, *tb)
                    && self.exprs_equal(*fa2, *fb2)
                    && self.exprs_equal(*ca, *cb)
            }
            (E::Drop { value: va }, E::Drop { value: vb }) => self.exprs_equal(*va, *vb),
            (E::Return { value: va }, E::Return { value: vb }) => self.opt_exprs_equal(*va, *vb),
            (
                E::Host {
                    op: oa, operand: pa, ..
                },
                E::Host {
                    op: ob, operand: pb, ..
                },
            ) => oa == ob && self.opt_exprs_equal(*pa, *pb),
            _ => false,
        }
    }
}

fn norm_align(align: u32, bytes: u8) -> u32 {
    if align == 0 {
        bytes as u32
    } else {
        align
    }
}

fn strip_transparent(func: &Function, mut id: Expr) -> Expr {
    loop {
        if let Expression::Block { name, list, .. } = &func.arena[id] {
            if list.len() == 1 {
                let transparent = match name {
                    None => true,
                    Some(n) => !crate::analysis::has_break_to(&func.arena, id, n),
                };
                if transparent {
                    id = list[0];
                    continue;
                }
            }
        }
        return id;
    }
}
