//! Binary writer.
//!
//! Emits the section sequence of the version-11 format, reserving 5-byte
//! LEB slots for section and function-body sizes and back-patching them
//! once the bodies are written. The writer runs in one of three modes:
//! plain emission, a recording pass that tallies `(opcode, immediates)`
//! tuples for opcode-table construction, and a substituting pass that
//! consults built tables and emits single table bytes for matching tuples.

use anyhow::{bail, ensure, Result};
use fxhash::FxHashMap;
use log::debug;

use super::{
    binary_code, load_code, op, section, store_code, type_code, unary_code, Buffer, Imms,
    OpcodeEntry, OpcodeInfo, OpcodeTable, MAGIC, VERSION,
};
use crate::arena::Expr;
use crate::ir::{Expression, Function, HostOp, Literal, Local, Module, Name, Type};

/// Byte range of one function's encoded body, in emission order.
#[derive(Clone, Copy, Debug)]
pub struct FuncRange {
    pub offset: usize,
    pub size: usize,
}

/// Plain emission.
pub fn write(module: &Module) -> Result<Vec<u8>> {
    let (bytes, _) = write_with_toc(module)?;
    Ok(bytes)
}

/// Plain emission, also returning per-function body byte ranges.
pub fn write_with_toc(module: &Module) -> Result<(Vec<u8>, Vec<FuncRange>)> {
    let mut writer = Writer::new(module, Mode::Plain, vec![module.functions.len()]);
    writer.run()?;
    Ok((writer.buf.into_vec(), writer.toc))
}

/// Two-pass opcode-table compression: a recording trial encoding, table
/// construction per chunk, then a substituting encoding. Each chunk gets
/// its own `opcode` section followed by its own `code` section.
pub fn write_compressed(module: &Module, chunk_sizes: &[usize]) -> Result<Vec<u8>> {
    let chunks = normalize_chunks(module, chunk_sizes)?;

    debug!("preprocess to analyze opcode usage");
    let mut pre = Writer::new(module, Mode::Record, chunks.clone());
    pre.run()?;

    debug!("generate opcode tables");
    let tables: Vec<OpcodeTable> = pre.infos.iter().map(OpcodeTable::build).collect();

    debug!("emit using opcode tables");
    let mut post = Writer::new(module, Mode::Substitute, chunks);
    post.tables = tables;
    post.run()?;
    Ok(post.buf.into_vec())
}

fn normalize_chunks(module: &Module, chunk_sizes: &[usize]) -> Result<Vec<usize>> {
    let total = module.functions.len();
    if chunk_sizes.is_empty() {
        return Ok(vec![total]);
    }
    ensure!(
        chunk_sizes.iter().sum::<usize>() == total,
        "chunk sizes cover {} functions, module has {}",
        chunk_sizes.iter().sum::<usize>(),
        total
    );
    Ok(chunk_sizes.to_vec())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Plain,
    Record,
    Substitute,
}

struct Writer<'m> {
    module: &'m Module,
    buf: Buffer,
    mode: Mode,
    chunk_sizes: Vec<usize>,
    /// One per chunk, filled in `Record` mode.
    infos: Vec<OpcodeInfo>,
    /// One per chunk, consulted in `Substitute` mode.
    tables: Vec<OpcodeTable>,
    chunk: usize,

    func_indices: FxHashMap<Name, u32>,
    import_indices: FxHashMap<Name, u32>,
    type_indices: FxHashMap<Name, u32>,

    /// Enclosing break targets, innermost last. `None` entries are the
    /// synthetic impossible-continue scopes of if-arms.
    break_stack: Vec<Option<Name>>,
    /// Source local index -> compact index, per function being written.
    mapped_locals: FxHashMap<Local, u32>,

    toc: Vec<FuncRange>,
}

impl<'m> Writer<'m> {
    fn new(module: &'m Module, mode: Mode, chunk_sizes: Vec<usize>) -> Writer<'m> {
        let num_chunks = chunk_sizes.len();
        let func_indices = module
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i as u32))
            .collect();
        let import_indices = module
            .imports
            .iter()
            .enumerate()
            .map(|(i, im)| (im.name.clone(), i as u32))
            .collect();
        let type_indices = module
            .function_types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i as u32))
            .collect();
        Writer {
            module,
            buf: Buffer::new(),
            mode,
            chunk_sizes,
            infos: vec![OpcodeInfo::default(); num_chunks],
            tables: vec![],
            chunk: 0,
            func_indices,
            import_indices,
            type_indices,
            break_stack: vec![],
            mapped_locals: FxHashMap::default(),
            toc: vec![],
        }
    }

    fn run(&mut self) -> Result<()> {
        self.write_header();
        self.write_types()?;
        self.write_imports()?;
        self.write_function_decls()?;
        self.write_table()?;
        self.write_memory();
        self.write_exports()?;
        self.write_start()?;
        self.write_code()?;
        self.write_data();
        self.write_names();
        Ok(())
    }

    fn write_header(&mut self) {
        debug!("== write_header");
        self.buf.push_u32(MAGIC);
        self.buf.push_u32(VERSION);
    }

    fn start_section(&mut self, name: &str) -> usize {
        self.buf.push_str(name);
        self.buf.reserve_size_slot()
    }

    fn finish_section(&mut self, slot: usize) {
        // the declared size does not include the 5 size bytes themselves
        let size = self.buf.len() - slot - 5;
        self.buf.patch_u32_leb(slot, size as u32);
    }

    fn function_index(&self, name: &Name) -> Result<u32> {
        match self.func_indices.get(name) {
            Some(&i) => Ok(i),
            None => bail!("unknown function {:?}", name),
        }
    }

    fn import_index(&self, name: &Name) -> Result<u32> {
        match self.import_indices.get(name) {
            Some(&i) => Ok(i),
            None => bail!("unknown import {:?}", name),
        }
    }

    fn type_index(&self, name: &Name) -> Result<u32> {
        match self.type_indices.get(name) {
            Some(&i) => Ok(i),
            None => bail!("unknown function type {:?}", name),
        }
    }

    fn write_types(&mut self) -> Result<()> {
        if self.module.function_types.is_empty() {
            return Ok(());
        }
        debug!("== write_types");
        let slot = self.start_section(section::TYPE);
        self.buf.push_u32_leb(self.module.function_types.len() as u32);
        for ty in &self.module.function_types {
            self.buf.push_u8(super::TYPE_FORM_BASIC);
            self.buf.push_u32_leb(ty.params.len() as u32);
            for &param in &ty.params {
                self.buf.push_u8(type_code(param));
            }
            if ty.result == Type::None {
                self.buf.push_u32_leb(0);
            } else {
                self.buf.push_u32_leb(1);
                self.buf.push_u8(type_code(ty.result));
            }
        }
        self.finish_section(slot);
        Ok(())
    }

    fn write_imports(&mut self) -> Result<()> {
        if self.module.imports.is_empty() {
            return Ok(());
        }
        debug!("== write_imports");
        let slot = self.start_section(section::IMPORT);
        self.buf.push_u32_leb(self.module.imports.len() as u32);
        for import in &self.module.imports {
            let index = self.type_index(&import.ty)?;
            self.buf.push_u32_leb(index);
            self.buf.push_str(import.module.as_str());
            self.buf.push_str(import.base.as_str());
        }
        self.finish_section(slot);
        Ok(())
    }

    fn write_function_decls(&mut self) -> Result<()> {
        if self.module.functions.is_empty() {
            return Ok(());
        }
        debug!("== write_function_decls");
        let slot = self.start_section(section::FUNCTION);
        self.buf.push_u32_leb(self.module.functions.len() as u32);
        for func in &self.module.functions {
            let ty = match &func.ty {
                Some(ty) => ty.clone(),
                None => bail!("function {:?} has no function type assigned", func.name),
            };
            let index = self.type_index(&ty)?;
            self.buf.push_u32_leb(index);
        }
        self.finish_section(slot);
        Ok(())
    }

    fn write_table(&mut self) -> Result<()> {
        if self.module.table.names.is_empty() {
            return Ok(());
        }
        debug!("== write_table");
        let slot = self.start_section(section::TABLE);
        self.buf.push_u32_leb(self.module.table.names.len() as u32);
        let names = self.module.table.names.clone();
        for name in &names {
            let index = self.function_index(name)?;
            self.buf.push_u32_leb(index);
        }
        self.finish_section(slot);
        Ok(())
    }

    fn write_memory(&mut self) {
        if self.module.memory.max == 0 {
            return;
        }
        debug!("== write_memory");
        let slot = self.start_section(section::MEMORY);
        self.buf.push_u32_leb(self.module.memory.initial);
        self.buf.push_u32_leb(self.module.memory.max);
        self.buf
            .push_u8(self.module.memory.export_name.is_some() as u8);
        self.finish_section(slot);
    }

    fn write_exports(&mut self) -> Result<()> {
        if self.module.exports.is_empty() {
            return Ok(());
        }
        debug!("== write_exports");
        let slot = self.start_section(section::EXPORT);
        self.buf.push_u32_leb(self.module.exports.len() as u32);
        for export in &self.module.exports {
            let index = self.function_index(&export.value)?;
            self.buf.push_u32_leb(index);
            self.buf.push_str(export.name.as_str());
        }
        self.finish_section(slot);
        Ok(())
    }

    fn write_start(&mut self) -> Result<()> {
        let Some(start) = &self.module.start else {
            return Ok(());
        };
        debug!("== write_start");
        let index = self.function_index(start)?;
        let slot = self.start_section(section::START);
        self.buf.push_u32_leb(index);
        self.finish_section(slot);
        Ok(())
    }

    fn write_code(&mut self) -> Result<()> {
        if self.module.functions.is_empty() {
            return Ok(());
        }
        debug!("== write_code");
        let module = self.module;
        let chunk_sizes = self.chunk_sizes.clone();
        let mut next = 0usize;
        for (chunk, &size) in chunk_sizes.iter().enumerate() {
            self.chunk = chunk;
            if self.mode == Mode::Substitute && !self.tables[chunk].is_empty() {
                let slot = self.start_section(section::OPCODE);
                let table = self.tables[chunk].clone();
                table.emit(&mut self.buf);
                self.finish_section(slot);
            }
            let slot = self.start_section(section::CODE);
            self.buf.push_u32_leb(size as u32);
            for func in &module.functions[next..next + size] {
                self.write_function(func)?;
            }
            next += size;
            self.finish_section(slot);
        }
        Ok(())
    }

    fn write_function(&mut self, func: &Function) -> Result<()> {
        debug!("writing {:?} at {}", func.name, self.buf.len());
        let size_slot = self.buf.reserve_size_slot();
        let body_start = self.buf.len();
        self.map_locals(func)?;

        // locals as (count, type) runs, grouped by type
        let mut num_by_type = [0u32; 4];
        for var in &func.vars {
            num_by_type[type_slot(var.ty)?] += 1;
        }
        let num_runs = num_by_type.iter().filter(|&&n| n > 0).count();
        self.buf.push_u32_leb(num_runs as u32);
        for (slot, &count) in num_by_type.iter().enumerate() {
            if count > 0 {
                self.buf.push_u32_leb(count);
                self.buf.push_u8(type_code(slot_type(slot)));
            }
        }

        self.write_expr(func, func.body)?;
        debug_assert!(self.break_stack.is_empty());

        let size = self.buf.len() - body_start;
        self.buf.patch_u32_leb(size_slot, size as u32);
        self.toc.push(FuncRange {
            offset: body_start,
            size,
        });
        Ok(())
    }

    /// Source index -> compact index: parameters keep their slots, then all
    /// i32 vars in source order, then i64, f32, f64.
    fn map_locals(&mut self, func: &Function) -> Result<()> {
        self.mapped_locals.clear();
        for i in 0..func.num_params() {
            self.mapped_locals.insert(Local::new(i), i as u32);
        }
        let mut num_by_type = [0u32; 4];
        for var in &func.vars {
            num_by_type[type_slot(var.ty)?] += 1;
        }
        let base = func.num_params() as u32;
        let mut curr_by_type = [0u32; 4];
        for (j, var) in func.vars.iter().enumerate() {
            let slot = type_slot(var.ty)?;
            let group_base: u32 = num_by_type[..slot].iter().sum();
            let index = base + group_base + curr_by_type[slot];
            curr_by_type[slot] += 1;
            self.mapped_locals
                .insert(Local::new(func.num_params() + j), index);
        }
        Ok(())
    }

    fn mapped_local(&self, local: Local) -> Result<u32> {
        match self.mapped_locals.get(&local) {
            Some(&i) => Ok(i),
            None => bail!("local {:?} not mapped", local),
        }
    }

    /// Emit an opcode with immediates, recording or substituting per mode.
    fn emit(&mut self, opcode: u8, imms: Imms) {
        match self.mode {
            Mode::Plain => self.emit_plain(opcode, imms),
            Mode::Record => {
                let start = self.buf.len();
                self.emit_plain(opcode, imms);
                let imm_bytes = self.buf.len() - start - 1;
                self.infos[self.chunk].record(OpcodeEntry::new(opcode, imms), imm_bytes);
            }
            Mode::Substitute => {
                if !matches!(imms, Imms::None) {
                    let entry = OpcodeEntry::new(opcode, imms);
                    if let Some(byte) = self.tables[self.chunk].lookup(&entry) {
                        self.buf.push_u8(byte);
                        return;
                    }
                }
                self.emit_plain(opcode, imms);
            }
        }
    }

    fn emit_plain(&mut self, opcode: u8, imms: Imms) {
        self.buf.push_u8(opcode);
        match imms {
            Imms::None => {}
            Imms::U32(x) => self.buf.push_u32_leb(x),
            Imms::S32(x) => self.buf.push_s32_leb(x),
            Imms::S64(x) => self.buf.push_s64_leb(x),
            Imms::F32(x) => self.buf.push_f32(x),
            Imms::F64(x) => self.buf.push_f64(x),
            Imms::Pair(x, y) => {
                self.buf.push_u32_leb(x);
                self.buf.push_u32_leb(y);
            }
        }
    }

    fn break_index(&self, name: &Name) -> Result<u32> {
        for (i, target) in self.break_stack.iter().enumerate().rev() {
            if target.as_ref() == Some(name) {
                return Ok((self.break_stack.len() - 1 - i) as u32);
            }
        }
        bail!("bad break target {:?}", name)
    }

    /// Emit a node; if it is a block that nothing branches to, emit its
    /// contents without the block framing.
    fn write_possible_block_contents(&mut self, func: &Function, id: Expr) -> Result<()> {
        if let Expression::Block { name, list, .. } = &func.arena[id] {
            let inline = match name {
                None => true,
                Some(n) => !crate::analysis::has_break_to(&func.arena, id, n),
            };
            if inline {
                for &child in list {
                    self.write_expr(func, child)?;
                }
                return Ok(());
            }
        }
        self.write_expr(func, id)
    }

    fn write_expr(&mut self, func: &Function, id: Expr) -> Result<()> {
        match &func.arena[id] {
            Expression::Nop => self.emit(op::NOP, Imms::None),
            Expression::Unreachable => self.emit(op::UNREACHABLE, Imms::None),
            Expression::Block { name, list, .. } => {
                self.emit(op::BLOCK, Imms::None);
                self.break_stack.push(name.clone());
                for &child in list {
                    self.write_expr(func, child)?;
                }
                self.break_stack.pop();
                self.emit(op::END, Imms::None);
            }
            Expression::If {
                condition,
                if_true,
                if_false,
                ..
            } => {
                let (condition, if_true, if_false) = (*condition, *if_true, *if_false);
                self.write_expr(func, condition)?;
                self.emit(op::IF, Imms::None);
                self.break_stack.push(None); // impossible continue
                self.write_possible_block_contents(func, if_true)?;
                self.break_stack.pop();
                if let Some(if_false) = if_false {
                    self.emit(op::ELSE, Imms::None);
                    self.break_stack.push(None);
                    self.write_possible_block_contents(func, if_false)?;
                    self.break_stack.pop();
                }
                self.emit(op::END, Imms::None);
            }
            Expression::Loop {
                out, cont, body, ..
            } => {
                let (out, cont, body) = (out.clone(), cont.clone(), *body);
                self.emit(op::LOOP, Imms::None);
                self.break_stack.push(out);
                self.break_stack.push(cont);
                self.write_expr(func, body)?;
                self.break_stack.pop();
                self.break_stack.pop();
                self.emit(op::END, Imms::None);
            }
            Expression::Break {
                name,
                value,
                condition,
            } => {
                let (name, value, condition) = (name.clone(), *value, *condition);
                if let Some(value) = value {
                    self.write_expr(func, value)?;
                }
                if let Some(condition) = condition {
                    self.write_expr(func, condition)?;
                }
                let opcode = if condition.is_some() { op::BR_IF } else { op::BR };
                let arity = value.is_some() as u32;
                let depth = self.break_index(&name)?;
                self.emit(opcode, Imms::Pair(arity, depth));
            }
            Expression::Switch {
                condition,
                value,
                targets,
                default,
            } => {
                let (condition, value) = (*condition, *value);
                let (targets, default) = (targets.clone(), default.clone());
                if let Some(value) = value {
                    self.write_expr(func, value)?;
                }
                self.write_expr(func, condition)?;
                let arity = value.is_some() as u32;
                self.emit(op::TABLE_SWITCH, Imms::Pair(arity, targets.len() as u32));
                // target depths are fixed-width words, not LEBs
                for target in &targets {
                    let depth = self.break_index(target)?;
                    self.buf.push_u32(depth);
                }
                let depth = self.break_index(&default)?;
                self.buf.push_u32(depth);
            }
            Expression::Call {
                target, operands, ..
            } => {
                let target = target.clone();
                let operands = operands.clone();
                for &operand in &operands {
                    self.write_expr(func, operand)?;
                }
                let index = self.function_index(&target)?;
                self.emit(
                    op::CALL_FUNCTION,
                    Imms::Pair(operands.len() as u32, index),
                );
            }
            Expression::CallImport {
                target, operands, ..
            } => {
                let target = target.clone();
                let operands = operands.clone();
                for &operand in &operands {
                    self.write_expr(func, operand)?;
                }
                let index = self.import_index(&target)?;
                self.emit(op::CALL_IMPORT, Imms::Pair(operands.len() as u32, index));
            }
            Expression::CallIndirect {
                sig,
                target,
                operands,
                ..
            } => {
                let sig = sig.clone();
                let target = *target;
                let operands = operands.clone();
                self.write_expr(func, target)?;
                for &operand in &operands {
                    self.write_expr(func, operand)?;
                }
                let index = self.type_index(&sig)?;
                self.emit(
                    op::CALL_INDIRECT,
                    Imms::Pair(operands.len() as u32, index),
                );
            }
            Expression::GetLocal { index, .. } => {
                let mapped = self.mapped_local(*index)?;
                self.emit(op::GET_LOCAL, Imms::U32(mapped));
            }
            Expression::SetLocal { index, value, .. } => {
                let (index, value) = (*index, *value);
                self.write_expr(func, value)?;
                let mapped = self.mapped_local(index)?;
                self.emit(op::SET_LOCAL, Imms::U32(mapped));
            }
            Expression::Load {
                bytes,
                signed,
                offset,
                align,
                ptr,
                ty,
            } => {
                let (bytes, signed, offset, align, ptr, ty) =
                    (*bytes, *signed, *offset, *align, *ptr, *ty);
                self.write_expr(func, ptr)?;
                let code = load_code(ty, bytes, signed);
                self.emit_memory_access(code, align, bytes, offset);
            }
            Expression::Store {
                bytes,
                offset,
                align,
                ptr,
                value,
                ty,
            } => {
                let (bytes, offset, align, ptr, value, ty) =
                    (*bytes, *offset, *align, *ptr, *value, *ty);
                self.write_expr(func, ptr)?;
                self.write_expr(func, value)?;
                let code = store_code(ty, bytes);
                self.emit_memory_access(code, align, bytes, offset);
            }
            Expression::Const { value } => match *value {
                Literal::I32(v) => self.emit(op::I32_CONST, Imms::S32(v)),
                Literal::I64(v) => self.emit(op::I64_CONST, Imms::S64(v)),
                Literal::F32(v) => self.emit(op::F32_CONST, Imms::F32(v)),
                Literal::F64(v) => self.emit(op::F64_CONST, Imms::F64(v)),
            },
            Expression::Unary { op: uop, value, ty } => {
                let (uop, value, ty) = (*uop, *value, *ty);
                self.write_expr(func, value)?;
                self.emit(unary_code(uop, ty), Imms::None);
            }
            Expression::Binary {
                op: bop,
                left,
                right,
                ty,
            } => {
                let (bop, left, right, ty) = (*bop, *left, *right, *ty);
                self.write_expr(func, left)?;
                self.write_expr(func, right)?;
                self.emit(binary_code(bop, ty), Imms::None);
            }
            Expression::Select {
                if_true,
                if_false,
                condition,
                ..
            } => {
                let (if_true, if_false, condition) = (*if_true, *if_false, *condition);
                self.write_expr(func, if_true)?;
                self.write_expr(func, if_false)?;
                self.write_expr(func, condition)?;
                self.emit(op::SELECT, Imms::None);
            }
            Expression::Drop { value } => {
                // this value-dialect format has no drop: unconsumed values
                // are implicitly discarded
                let value = *value;
                self.write_expr(func, value)?;
            }
            Expression::Return { value } => {
                let value = *value;
                if let Some(value) = value {
                    self.write_expr(func, value)?;
                }
                self.emit(op::RETURN, Imms::U32(value.is_some() as u32));
            }
            Expression::Host {
                op: hop, operand, ..
            } => {
                let (hop, operand) = (*hop, *operand);
                match hop {
                    HostOp::CurrentMemory => self.emit(op::CURRENT_MEMORY, Imms::None),
                    HostOp::GrowMemory => {
                        if let Some(operand) = operand {
                            self.write_expr(func, operand)?;
                        }
                        self.emit(op::GROW_MEMORY, Imms::None);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_memory_access(&mut self, code: u8, align: u32, bytes: u8, offset: u32) {
        let effective = if align == 0 { bytes as u32 } else { align };
        self.emit(
            code,
            Imms::Pair(effective.trailing_zeros(), offset),
        );
    }

    fn write_data(&mut self) {
        let segments: Vec<_> = self
            .module
            .memory
            .segments
            .iter()
            .filter(|s| !s.data.is_empty())
            .collect();
        if segments.is_empty() {
            return;
        }
        debug!("== write_data");
        let slot = self.start_section(section::DATA);
        self.buf.push_u32_leb(segments.len() as u32);
        for segment in segments {
            self.buf.push_u32_leb(segment.offset);
            self.buf.push_u32_leb(segment.data.len() as u32);
            self.buf.extend_from_slice(&segment.data);
        }
        self.finish_section(slot);
    }

    fn write_names(&mut self) {
        if self.module.functions.is_empty() {
            return;
        }
        debug!("== write_names");
        let slot = self.start_section(section::NAME);
        self.buf.push_u32_leb(self.module.functions.len() as u32);
        for func in &self.module.functions {
            self.buf.push_str(func.name.as_str());
            self.buf.push_u32_leb(0); // local names are not preserved
        }
        self.finish_section(slot);
    }
}

fn type_slot(ty: Type) -> Result<usize> {
    match ty {
        Type::I32 => Ok(0),
        Type::I64 => Ok(1),
        Type::F32 => Ok(2),
        Type::F64 => Ok(3),
        Type::None => bail!("local declared with no type"),
    }
}

fn slot_type(slot: usize) -> Type {
    match slot {
        0 => Type::I32,
        1 => Type::I64,
        2 => Type::F32,
        _ => Type::F64,
    }
}
