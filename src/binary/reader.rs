//! Binary reader.
//!
//! Rebuilds a module from version-11 bytes. Function bodies are a postfix
//! opcode stream with structured open/`End`/`Else` framing, decoded with an
//! expression stack; relative break depths resolve against a stack of
//! generated labels. Function names arrive only in the trailing `name`
//! section, so call targets, exports, the start function, and table entries
//! are recorded by index and patched once all names are known.

use anyhow::{Context, Result};
use fxhash::FxHashMap;
use log::{debug, trace};

use super::buffer;
use super::{
    binary_from_code, load_from_code, op, section, store_from_code, type_from_code, OpcodeEntry,
    OpcodeTable, MAGIC, VERSION,
};
use crate::arena::Expr;
use crate::errors::DecodeError;
use crate::ir::{
    Export, Expression, Function, FunctionType, HostOp, Import, Literal, Local, LocalDef, Module,
    Name, Segment, Type,
};

/// Decode a module.
pub fn read(input: &[u8]) -> Result<Module> {
    Reader::new(input).read()
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    module: Module,
    table: OpcodeTable,

    /// Type index per declared function, from the `function` section.
    func_type_indices: Vec<u32>,
    /// Functions built so far, across `code` sections.
    functions: Vec<Function>,
    /// Call sites per target function index, patched after names are known.
    function_calls: FxHashMap<u32, Vec<(usize, Expr)>>,
    export_indices: Vec<(Name, u32)>,
    table_indices: Vec<u32>,
    start_index: Option<u32>,

    next_label: usize,
    break_stack: Vec<Name>,
    expression_stack: Vec<Expr>,
    end_of_function: usize,
    last_separator: u8,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Reader<'a> {
        Reader {
            input,
            pos: 0,
            module: Module::default(),
            table: OpcodeTable::default(),
            func_type_indices: vec![],
            functions: vec![],
            function_calls: FxHashMap::default(),
            export_indices: vec![],
            table_indices: vec![],
            start_index: None,
            next_label: 0,
            break_stack: vec![],
            expression_stack: vec![],
            end_of_function: 0,
            last_separator: op::END,
        }
    }

    fn read(mut self) -> Result<Module> {
        self.read_header()?;
        while self.pos < self.input.len() {
            let name = self.read_inline_string()?;
            let size = self.read_u32_leb()?;
            let before = self.pos;
            match name.as_str() {
                section::MEMORY => self.read_memory().context("section `memory`")?,
                section::TYPE => self.read_types().context("section `type`")?,
                section::IMPORT => self.read_imports().context("section `import`")?,
                section::FUNCTION => {
                    self.read_function_decls().context("section `function`")?
                }
                section::CODE => self.read_code().context("section `code`")?,
                section::EXPORT => self.read_exports().context("section `export`")?,
                section::DATA => self.read_data().context("section `data`")?,
                section::TABLE => self.read_table().context("section `table`")?,
                section::NAME => self.read_names().context("section `name`")?,
                section::START => self.read_start().context("section `start`")?,
                section::OPCODE => self.read_opcode_table().context("section `opcode`")?,
                other => return Err(DecodeError::UnknownSection(other.to_string()).into()),
            }
            let consumed = self.pos - before;
            if consumed != size as usize {
                return Err(DecodeError::SectionSize {
                    name,
                    declared: size,
                    consumed,
                }
                .into());
            }
        }
        self.process_functions()?;
        Ok(self.module)
    }

    // primitive readers

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        buffer::read_u8(self.input, &mut self.pos)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        buffer::read_u32(self.input, &mut self.pos)
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        buffer::read_u64(self.input, &mut self.pos)
    }

    fn read_u32_leb(&mut self) -> Result<u32, DecodeError> {
        buffer::read_u32_leb(self.input, &mut self.pos)
    }

    fn read_s32_leb(&mut self) -> Result<i32, DecodeError> {
        buffer::read_s32_leb(self.input, &mut self.pos)
    }

    fn read_s64_leb(&mut self) -> Result<i64, DecodeError> {
        buffer::read_s64_leb(self.input, &mut self.pos)
    }

    fn unread_u8(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
    }

    fn read_type(&mut self) -> Result<Type, DecodeError> {
        let byte = self.read_u8()?;
        type_from_code(byte).ok_or(DecodeError::BadType(byte))
    }

    fn read_inline_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32_leb()? as usize;
        let mut s = String::with_capacity(len);
        for _ in 0..len {
            s.push(self.read_u8()? as char);
        }
        Ok(s)
    }

    fn malformed(&self, msg: impl Into<String>) -> DecodeError {
        DecodeError::Malformed(msg.into())
    }

    // sections

    fn read_header(&mut self) -> Result<(), DecodeError> {
        debug!("== read_header");
        let magic = self.read_u32()?;
        if magic != MAGIC {
            return Err(DecodeError::BadHeader(magic));
        }
        let version = self.read_u32()?;
        if version != VERSION {
            return Err(DecodeError::BadHeader(version));
        }
        Ok(())
    }

    fn read_memory(&mut self) -> Result<()> {
        debug!("== read_memory");
        self.module.memory.initial = self.read_u32_leb()?;
        self.module.memory.max = self.read_u32_leb()?;
        let exported = self.read_u8()?;
        if exported != 0 {
            self.module.memory.export_name = Some(Name::from("memory"));
        }
        Ok(())
    }

    fn read_types(&mut self) -> Result<()> {
        debug!("== read_types");
        let num = self.read_u32_leb()?;
        for i in 0..num {
            let form = self.read_u8()?;
            if form != super::TYPE_FORM_BASIC {
                return Err(self.malformed(format!("bad type form {:#04x}", form)).into());
            }
            let num_params = self.read_u32_leb()?;
            let mut params = vec![];
            for _ in 0..num_params {
                params.push(self.read_type()?);
            }
            let result = match self.read_u32_leb()? {
                0 => Type::None,
                1 => self.read_type()?,
                n => return Err(self.malformed(format!("{} results in type", n)).into()),
            };
            self.module.function_types.push(FunctionType {
                name: Name::from(format!("sig${}", i)),
                params,
                result,
            });
        }
        Ok(())
    }

    fn read_imports(&mut self) -> Result<()> {
        debug!("== read_imports");
        let num = self.read_u32_leb()?;
        for i in 0..num {
            let index = self.read_u32_leb()? as usize;
            let ty = self
                .module
                .function_types
                .get(index)
                .ok_or_else(|| self.malformed(format!("import type index {}", index)))?
                .name
                .clone();
            let module = Name::from(self.read_inline_string()?);
            let base = Name::from(self.read_inline_string()?);
            self.module.imports.push(Import {
                name: Name::from(format!("import${}", i)),
                module,
                base,
                ty,
            });
        }
        Ok(())
    }

    fn read_function_decls(&mut self) -> Result<()> {
        debug!("== read_function_decls");
        let num = self.read_u32_leb()?;
        for _ in 0..num {
            let index = self.read_u32_leb()?;
            if index as usize >= self.module.function_types.len() {
                return Err(self.malformed(format!("function type index {}", index)).into());
            }
            self.func_type_indices.push(index);
        }
        Ok(())
    }

    fn read_code(&mut self) -> Result<()> {
        debug!("== read_code");
        let total = self.read_u32_leb()?;
        for _ in 0..total {
            let size = self.read_u32_leb()? as usize;
            if size == 0 {
                return Err(self.malformed("empty function body").into());
            }
            self.end_of_function = self.pos + size;

            let global_index = self.functions.len();
            let type_index = *self
                .func_type_indices
                .get(global_index)
                .ok_or_else(|| self.malformed("code entry without function declaration"))?;
            let ty = &self.module.function_types[type_index as usize];
            let mut next_var = 0usize;
            let mut fresh_var = |ty: Type| {
                let def = LocalDef::new(format!("var${}", next_var), ty);
                next_var += 1;
                def
            };
            let params: Vec<LocalDef> = ty.params.iter().map(|&t| fresh_var(t)).collect();
            let result = ty.result;
            let ty_name = ty.name.clone();
            let mut func =
                Function::new(format!("func${}", global_index), params, result);
            func.ty = Some(ty_name);

            let num_local_types = self.read_u32_leb()?;
            for _ in 0..num_local_types {
                let num = self.read_u32_leb()?;
                let ty = self.read_type()?;
                if !ty.is_concrete() {
                    return Err(self.malformed("local with no type").into());
                }
                for _ in 0..num {
                    func.add_var(ty);
                }
            }

            trace!("reading function {} at {}", global_index, self.pos);
            self.next_label = 0;
            debug_assert!(self.break_stack.is_empty());
            debug_assert!(self.expression_stack.is_empty());
            func.body = self.read_maybe_block(&mut func)?;
            if self.pos != self.end_of_function {
                return Err(self
                    .malformed(format!(
                        "function body declared {} bytes, consumed {}",
                        size,
                        self.pos + size - self.end_of_function
                    ))
                    .into());
            }
            debug_assert!(self.break_stack.is_empty());
            debug_assert!(self.expression_stack.is_empty());
            self.functions.push(func);
        }
        Ok(())
    }

    fn read_exports(&mut self) -> Result<()> {
        debug!("== read_exports");
        let num = self.read_u32_leb()?;
        for _ in 0..num {
            let index = self.read_u32_leb()?;
            let name = Name::from(self.read_inline_string()?);
            self.export_indices.push((name, index));
        }
        Ok(())
    }

    fn read_data(&mut self) -> Result<()> {
        debug!("== read_data");
        let num = self.read_u32_leb()?;
        for _ in 0..num {
            let offset = self.read_u32_leb()?;
            let size = self.read_u32_leb()? as usize;
            let mut data = Vec::with_capacity(size);
            for _ in 0..size {
                data.push(self.read_u8()?);
            }
            self.module.memory.segments.push(Segment { offset, data });
        }
        Ok(())
    }

    fn read_table(&mut self) -> Result<()> {
        debug!("== read_table");
        let num = self.read_u32_leb()?;
        for _ in 0..num {
            let index = self.read_u32_leb()?;
            self.table_indices.push(index);
        }
        Ok(())
    }

    fn read_names(&mut self) -> Result<()> {
        debug!("== read_names");
        let num = self.read_u32_leb()? as usize;
        for i in 0..num {
            let name = Name::from(self.read_inline_string()?);
            let num_locals = self.read_u32_leb()?;
            if num_locals != 0 {
                return Err(self.malformed("local names are not supported").into());
            }
            if i >= self.functions.len() {
                return Err(self.malformed(format!("name for function {}", i)).into());
            }
            self.functions[i].name = name;
        }
        Ok(())
    }

    fn read_start(&mut self) -> Result<()> {
        debug!("== read_start");
        self.start_index = Some(self.read_u32_leb()?);
        Ok(())
    }

    fn read_opcode_table(&mut self) -> Result<()> {
        debug!("== read_opcode_table");
        self.table = OpcodeTable::parse(self.input, &mut self.pos)?;
        Ok(())
    }

    /// Resolve recorded indices to names now that every function has its
    /// final name.
    fn process_functions(&mut self) -> Result<()> {
        let calls = std::mem::take(&mut self.function_calls);
        for (target, sites) in calls {
            let name = self
                .functions
                .get(target as usize)
                .ok_or_else(|| self.malformed(format!("call to function {}", target)))?
                .name
                .clone();
            for (owner, site) in sites {
                if let Expression::Call { target: t, .. } =
                    &mut self.functions[owner].arena[site]
                {
                    *t = name.clone();
                }
            }
        }
        if let Some(index) = self.start_index {
            let func = self
                .functions
                .get(index as usize)
                .ok_or_else(|| self.malformed(format!("start function {}", index)))?;
            self.module.start = Some(func.name.clone());
        }
        for (name, index) in std::mem::take(&mut self.export_indices) {
            let func = self
                .functions
                .get(index as usize)
                .ok_or_else(|| self.malformed(format!("export of function {}", index)))?;
            self.module.exports.push(Export {
                name,
                value: func.name.clone(),
            });
        }
        for index in std::mem::take(&mut self.table_indices) {
            let func = self
                .functions
                .get(index as usize)
                .ok_or_else(|| self.malformed(format!("table entry {}", index)))?;
            self.module.table.names.push(func.name.clone());
        }
        for func in std::mem::take(&mut self.functions) {
            self.module.add_function(func);
        }
        Ok(())
    }

    // expression decoding

    fn fresh_label(&mut self) -> Name {
        let label = Name::from(format!("label${}", self.next_label));
        self.next_label += 1;
        label
    }

    fn pop_expression(&mut self) -> Result<Expr> {
        self.expression_stack
            .pop()
            .ok_or_else(|| self.malformed("expression stack underflow").into())
    }

    /// Pop `count` operands, restoring their execution order.
    fn pop_operands(&mut self, count: usize) -> Result<Vec<Expr>> {
        let mut operands = Vec::with_capacity(count);
        for _ in 0..count {
            operands.push(self.pop_expression()?);
        }
        operands.reverse();
        Ok(operands)
    }

    fn break_name(&self, depth: u32) -> Result<Name> {
        let len = self.break_stack.len();
        if (depth as usize) >= len {
            return Err(DecodeError::BadBreakDepth(depth).into());
        }
        Ok(self.break_stack[len - 1 - depth as usize].clone())
    }

    /// Read expressions until an `End`/`Else` separator (or the end of the
    /// function body), pushing each onto the expression stack.
    fn process_expressions(&mut self, func: &mut Function) -> Result<()> {
        loop {
            match self.read_expression(func)? {
                Some(id) => self.expression_stack.push(id),
                None => return Ok(()),
            }
        }
    }

    /// The expressions read since `start`, as a single node: the expression
    /// itself if there is exactly one, a fresh unnamed block otherwise.
    fn read_maybe_block(&mut self, func: &mut Function) -> Result<Expr> {
        let start = self.expression_stack.len();
        self.process_expressions(func)?;
        if self.expression_stack.len() == start + 1 {
            return self.pop_expression();
        }
        let list: Vec<Expr> = self.expression_stack.drain(start..).collect();
        let block = func.arena.alloc(Expression::Block {
            name: None,
            list,
            ty: Type::None,
        });
        func.arena.finalize(block);
        Ok(block)
    }

    /// An if-arm: a labeled scope whose contents run to `End`/`Else`.
    fn read_scope_block(&mut self, func: &mut Function) -> Result<Expr> {
        let label = self.fresh_label();
        self.break_stack.push(label.clone());
        let inner = self.read_maybe_block(func)?;
        self.break_stack.pop();
        if let Expression::Block { name: None, .. } = &func.arena[inner] {
            if let Expression::Block { name, .. } = &mut func.arena[inner] {
                *name = Some(label);
            }
            return Ok(inner);
        }
        // a named block or a bare expression keeps its identity; wrap it so
        // the arm's own scope level stays addressable
        let ty = func.arena[inner].ty();
        let block = func.arena.alloc(Expression::Block {
            name: Some(label),
            list: vec![inner],
            ty,
        });
        Ok(block)
    }

    fn read_expression(&mut self, func: &mut Function) -> Result<Option<Expr>> {
        if self.pos == self.end_of_function {
            self.last_separator = op::END;
            return Ok(None);
        }
        let mut code = self.read_u8()?;
        trace!("read_expression seeing {:#04x} (at {})", code, self.pos);
        let entry: Option<OpcodeEntry> = match self.table.get(code) {
            Some(e) => {
                let e = e.clone();
                code = e.op;
                Some(e)
            }
            None => None,
        };

        let id = match code {
            op::END | op::ELSE => {
                self.last_separator = code;
                return Ok(None);
            }
            op::NOP => {
                self.no_immediates(&entry)?;
                func.arena.alloc(Expression::Nop)
            }
            op::UNREACHABLE => {
                self.no_immediates(&entry)?;
                func.arena.alloc(Expression::Unreachable)
            }
            op::BLOCK => {
                self.no_immediates(&entry)?;
                self.read_block(func)?
            }
            op::IF => {
                self.no_immediates(&entry)?;
                self.read_if(func)?
            }
            op::LOOP => {
                self.no_immediates(&entry)?;
                self.read_loop(func)?
            }
            op::BR | op::BR_IF => self.read_break(func, code, &entry)?,
            op::TABLE_SWITCH => self.read_switch(func, &entry)?,
            op::CALL_FUNCTION => self.read_call(func, &entry)?,
            op::CALL_IMPORT => self.read_call_import(func, &entry)?,
            op::CALL_INDIRECT => self.read_call_indirect(func, &entry)?,
            op::GET_LOCAL => self.read_get_local(func, &entry)?,
            op::SET_LOCAL => self.read_set_local(func, &entry)?,
            op::SELECT => {
                self.no_immediates(&entry)?;
                let condition = self.pop_expression()?;
                let if_false = self.pop_expression()?;
                let if_true = self.pop_expression()?;
                let ty = func.arena[if_true].ty();
                func.arena.alloc(Expression::Select {
                    if_true,
                    if_false,
                    condition,
                    ty,
                })
            }
            op::RETURN => self.read_return(func, &entry)?,
            op::CURRENT_MEMORY => {
                self.no_immediates(&entry)?;
                func.arena.alloc(Expression::Host {
                    op: HostOp::CurrentMemory,
                    operand: None,
                    ty: Type::I32,
                })
            }
            op::GROW_MEMORY => {
                self.no_immediates(&entry)?;
                let operand = self.pop_expression()?;
                func.arena.alloc(Expression::Host {
                    op: HostOp::GrowMemory,
                    operand: Some(operand),
                    ty: Type::I32,
                })
            }
            op::I32_CONST | op::I64_CONST | op::F32_CONST | op::F64_CONST => {
                self.read_const(func, code, &entry)?
            }
            other => {
                if let Some((uop, ty)) = super::unary_from_code(other) {
                    self.no_immediates(&entry)?;
                    let value = self.pop_expression()?;
                    func.arena.alloc(Expression::Unary { op: uop, value, ty })
                } else if let Some((bop, ty)) = binary_from_code(other) {
                    self.no_immediates(&entry)?;
                    let right = self.pop_expression()?;
                    let left = self.pop_expression()?;
                    func.arena.alloc(Expression::Binary {
                        op: bop,
                        left,
                        right,
                        ty,
                    })
                } else if let Some((ty, bytes, signed)) = load_from_code(other) {
                    let (align, offset) = self.read_memory_access(&entry)?;
                    let ptr = self.pop_expression()?;
                    func.arena.alloc(Expression::Load {
                        bytes,
                        signed,
                        offset,
                        align,
                        ptr,
                        ty,
                    })
                } else if let Some((ty, bytes)) = store_from_code(other) {
                    let (align, offset) = self.read_memory_access(&entry)?;
                    let value = self.pop_expression()?;
                    let ptr = self.pop_expression()?;
                    func.arena.alloc(Expression::Store {
                        bytes,
                        offset,
                        align,
                        ptr,
                        value,
                        ty,
                    })
                } else {
                    return Err(DecodeError::BadOpcode(other).into());
                }
            }
        };
        Ok(Some(id))
    }

    fn no_immediates(&self, entry: &Option<OpcodeEntry>) -> Result<()> {
        match entry {
            // an opcode with no immediates can never have a table entry
            Some(e) => Err(self
                .malformed(format!("opcode-table entry for {:#04x}", e.op))
                .into()),
            None => Ok(()),
        }
    }

    fn entry_pair(&self, entry: &OpcodeEntry) -> Result<(u32, u32)> {
        match (entry.values.first(), entry.values.get(1)) {
            (Some(&Literal::I32(a)), Some(&Literal::I32(b))) => Ok((a as u32, b as u32)),
            _ => Err(self.malformed("opcode-table entry immediates").into()),
        }
    }

    fn entry_single(&self, entry: &OpcodeEntry) -> Result<u32> {
        match entry.values.first() {
            Some(&Literal::I32(a)) => Ok(a as u32),
            _ => Err(self.malformed("opcode-table entry immediates").into()),
        }
    }

    fn read_pair(&mut self, entry: &Option<OpcodeEntry>) -> Result<(u32, u32)> {
        match entry {
            Some(entry) => self.entry_pair(entry),
            None => {
                let a = self.read_u32_leb()?;
                let b = self.read_u32_leb()?;
                Ok((a, b))
            }
        }
    }

    /// Blocks de-recurse in their first position: deeply nested first-child
    /// blocks are a common pattern that would otherwise overflow the stack.
    fn read_block(&mut self, func: &mut Function) -> Result<Expr> {
        let mut stack: Vec<Expr> = vec![];
        loop {
            let label = self.fresh_label();
            self.break_stack.push(label.clone());
            let block = func.arena.alloc(Expression::Block {
                name: Some(label),
                list: vec![],
                ty: Type::None,
            });
            stack.push(block);
            if self.read_u8()? == op::BLOCK {
                continue;
            }
            self.unread_u8();
            break;
        }
        let mut last: Option<Expr> = None;
        while let Some(block) = stack.pop() {
            let start = self.expression_stack.len();
            if let Some(last) = last {
                // the inner block is this block's first element
                self.expression_stack.push(last);
            }
            last = Some(block);
            self.process_expressions(func)?;
            let list: Vec<Expr> = self.expression_stack.drain(start..).collect();
            if let Expression::Block { list: l, .. } = &mut func.arena[block] {
                *l = list;
            }
            func.arena.finalize(block);
            self.break_stack.pop();
        }
        // the loop ran at least once
        last.ok_or_else(|| self.malformed("empty block stack").into())
    }

    fn read_if(&mut self, func: &mut Function) -> Result<Expr> {
        let condition = self.pop_expression()?;
        let if_true = self.read_scope_block(func)?;
        let if_false = if self.last_separator == op::ELSE {
            Some(self.read_scope_block(func)?)
        } else {
            None
        };
        if self.last_separator != op::END {
            return Err(self.malformed("if not closed by end").into());
        }
        let id = func.arena.alloc(Expression::If {
            condition,
            if_true,
            if_false,
            ty: Type::None,
        });
        func.arena.finalize(id);
        Ok(id)
    }

    fn read_loop(&mut self, func: &mut Function) -> Result<Expr> {
        let out = self.fresh_label();
        let cont = self.fresh_label();
        self.break_stack.push(out.clone());
        self.break_stack.push(cont.clone());
        let body = self.read_maybe_block(func)?;
        self.break_stack.pop();
        self.break_stack.pop();
        if self.last_separator != op::END {
            return Err(self.malformed("loop not closed by end").into());
        }
        let id = func.arena.alloc(Expression::Loop {
            out: Some(out),
            cont: Some(cont),
            body,
            ty: Type::None,
        });
        func.arena.finalize(id);
        Ok(id)
    }

    fn read_break(
        &mut self,
        func: &mut Function,
        code: u8,
        entry: &Option<OpcodeEntry>,
    ) -> Result<Expr> {
        let (arity, depth) = self.read_pair(entry)?;
        if arity > 1 {
            return Err(self.malformed(format!("break arity {}", arity)).into());
        }
        let name = self.break_name(depth)?;
        let condition = if code == op::BR_IF {
            Some(self.pop_expression()?)
        } else {
            None
        };
        let value = if arity == 1 {
            Some(self.pop_expression()?)
        } else {
            None
        };
        Ok(func.arena.alloc(Expression::Break {
            name,
            value,
            condition,
        }))
    }

    fn read_switch(&mut self, func: &mut Function, entry: &Option<OpcodeEntry>) -> Result<Expr> {
        let (arity, num_targets) = self.read_pair(entry)?;
        if arity > 1 {
            return Err(self.malformed(format!("switch arity {}", arity)).into());
        }
        let condition = self.pop_expression()?;
        let value = if arity == 1 {
            Some(self.pop_expression()?)
        } else {
            None
        };
        let mut targets = vec![];
        for _ in 0..num_targets {
            let depth = self.read_u32()?;
            targets.push(self.break_name(depth)?);
        }
        let depth = self.read_u32()?;
        let default = self.break_name(depth)?;
        Ok(func.arena.alloc(Expression::Switch {
            condition,
            value,
            targets,
            default,
        }))
    }

    fn read_call(&mut self, func: &mut Function, entry: &Option<OpcodeEntry>) -> Result<Expr> {
        let (arity, index) = self.read_pair(entry)?;
        let type_index = *self
            .func_type_indices
            .get(index as usize)
            .ok_or_else(|| self.malformed(format!("call to function {}", index)))?;
        let ty = &self.module.function_types[type_index as usize];
        if ty.params.len() != arity as usize {
            return Err(self
                .malformed(format!(
                    "call arity {} against {} params",
                    arity,
                    ty.params.len()
                ))
                .into());
        }
        let result = ty.result;
        let operands = self.pop_operands(arity as usize)?;
        let id = func.arena.alloc(Expression::Call {
            target: Name::from(format!("func${}", index)),
            operands,
            ty: result,
        });
        self.function_calls
            .entry(index)
            .or_default()
            .push((self.functions.len(), id));
        Ok(id)
    }

    fn read_call_import(
        &mut self,
        func: &mut Function,
        entry: &Option<OpcodeEntry>,
    ) -> Result<Expr> {
        let (arity, index) = self.read_pair(entry)?;
        let import = self
            .module
            .imports
            .get(index as usize)
            .ok_or_else(|| self.malformed(format!("call to import {}", index)))?;
        let target = import.name.clone();
        let ty = self
            .module
            .get_function_type(&import.ty)
            .ok_or_else(|| self.malformed("import without type"))?;
        if ty.params.len() != arity as usize {
            return Err(self
                .malformed(format!(
                    "call_import arity {} against {} params",
                    arity,
                    ty.params.len()
                ))
                .into());
        }
        let result = ty.result;
        let operands = self.pop_operands(arity as usize)?;
        Ok(func.arena.alloc(Expression::CallImport {
            target,
            operands,
            ty: result,
        }))
    }

    fn read_call_indirect(
        &mut self,
        func: &mut Function,
        entry: &Option<OpcodeEntry>,
    ) -> Result<Expr> {
        let (arity, index) = self.read_pair(entry)?;
        let ty = self
            .module
            .function_types
            .get(index as usize)
            .ok_or_else(|| self.malformed(format!("call_indirect type {}", index)))?;
        if ty.params.len() != arity as usize {
            return Err(self
                .malformed(format!(
                    "call_indirect arity {} against {} params",
                    arity,
                    ty.params.len()
                ))
                .into());
        }
        let sig = ty.name.clone();
        let result = ty.result;
        let operands = self.pop_operands(arity as usize)?;
        let target = self.pop_expression()?;
        Ok(func.arena.alloc(Expression::CallIndirect {
            sig,
            target,
            operands,
            ty: result,
        }))
    }

    fn read_local_index(
        &mut self,
        func: &Function,
        entry: &Option<OpcodeEntry>,
    ) -> Result<Local> {
        let index = match entry {
            Some(entry) => self.entry_single(entry)?,
            None => self.read_u32_leb()?,
        };
        if index as usize >= func.num_locals() {
            return Err(DecodeError::BadLocalIndex(index).into());
        }
        Ok(Local::new(index as usize))
    }

    fn read_get_local(&mut self, func: &mut Function, entry: &Option<OpcodeEntry>) -> Result<Expr> {
        let index = self.read_local_index(func, entry)?;
        let ty = func.local_type(index);
        Ok(func.arena.alloc(Expression::GetLocal { index, ty }))
    }

    fn read_set_local(&mut self, func: &mut Function, entry: &Option<OpcodeEntry>) -> Result<Expr> {
        let index = self.read_local_index(func, entry)?;
        let value = self.pop_expression()?;
        let ty = func.arena[value].ty();
        Ok(func.arena.alloc(Expression::SetLocal {
            index,
            value,
            tee: true,
            ty,
        }))
    }

    fn read_memory_access(&mut self, entry: &Option<OpcodeEntry>) -> Result<(u32, u32)> {
        match entry {
            Some(entry) => {
                let (log_align, offset) = self.entry_pair(entry)?;
                Ok((1u32 << log_align, offset))
            }
            None => {
                let log_align = self.read_u32_leb()?;
                if log_align > 31 {
                    return Err(self.malformed(format!("alignment 2^{}", log_align)).into());
                }
                let offset = self.read_u32_leb()?;
                Ok((1u32 << log_align, offset))
            }
        }
    }

    fn read_const(
        &mut self,
        func: &mut Function,
        code: u8,
        entry: &Option<OpcodeEntry>,
    ) -> Result<Expr> {
        let value = match entry {
            Some(entry) => *entry
                .values
                .first()
                .ok_or_else(|| self.malformed("const entry without value"))?,
            None => match code {
                op::I32_CONST => Literal::I32(self.read_s32_leb()?),
                op::I64_CONST => Literal::I64(self.read_s64_leb()?),
                op::F32_CONST => Literal::F32(crate::ir::Ieee32(self.read_u32()?)),
                _ => Literal::F64(crate::ir::Ieee64(self.read_u64()?)),
            },
        };
        Ok(func.arena.alloc(Expression::Const { value }))
    }

    fn read_return(&mut self, func: &mut Function, entry: &Option<OpcodeEntry>) -> Result<Expr> {
        let arity = match entry {
            Some(entry) => self.entry_single(entry)?,
            None => self.read_u32_leb()?,
        };
        if arity > 1 {
            return Err(self.malformed(format!("return arity {}", arity)).into());
        }
        let value = if arity == 1 {
            Some(self.pop_expression()?)
        } else {
            None
        };
        Ok(func.arena.alloc(Expression::Return { value }))
    }
}
