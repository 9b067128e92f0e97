//! Modules and top-level entities.

use anyhow::Result;

use super::{Function, Name, Type};

/// A named function signature.
#[derive(Clone, Debug)]
pub struct FunctionType {
    pub name: Name,
    pub params: Vec<Type>,
    pub result: Type,
}

/// An imported function.
#[derive(Clone, Debug)]
pub struct Import {
    pub name: Name,
    pub module: Name,
    pub base: Name,
    /// Reference to a module-level function type.
    pub ty: Name,
}

#[derive(Clone, Debug)]
pub struct Export {
    pub name: Name,
    /// Name of the exported function.
    pub value: Name,
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub offset: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct Memory {
    pub initial: u32,
    pub max: u32,
    pub export_name: Option<Name>,
    pub segments: Vec<Segment>,
}

/// The function table: entries are function names; indices are recomputed
/// on emission.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub names: Vec<Name>,
}

/// A whole module. Functions, imports, function types, and exports each
/// have both a stable name and an index (their position in the sequence);
/// all cross-references in the AST are by name, so reordering a sequence
/// only requires re-emitting indices.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub function_types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    pub functions: Vec<Function>,
    pub exports: Vec<Export>,
    pub memory: Memory,
    pub table: Table,
    pub start: Option<Name>,
}

impl Module {
    /// A function's position in the sequence, which is also its index in
    /// the binary format at the next emission.
    pub fn function_index(&self, name: &Name) -> Option<usize> {
        self.functions.iter().position(|f| &f.name == name)
    }

    pub fn get_function_type(&self, name: &Name) -> Option<&FunctionType> {
        self.function_types.iter().find(|t| &t.name == name)
    }

    pub fn add_function(&mut self, func: Function) -> usize {
        self.functions.push(func);
        self.functions.len() - 1
    }

    /// Find a function type with the given shape, or add one.
    pub fn ensure_function_type(&mut self, params: &[Type], result: Type) -> Name {
        for ty in &self.function_types {
            if ty.params == params && ty.result == result {
                return ty.name.clone();
            }
        }
        let name = Name::from(format!("sig${}", self.function_types.len()));
        self.function_types.push(FunctionType {
            name: name.clone(),
            params: params.to_vec(),
            result,
        });
        name
    }

    /// Assign every function a function type, creating signatures as
    /// needed. The binary writer requires this to have run.
    pub fn finalize_types(&mut self) {
        let mut funcs = std::mem::take(&mut self.functions);
        for func in &mut funcs {
            if func.ty.is_none() {
                let params: Vec<Type> = func.params.iter().map(|p| p.ty).collect();
                func.ty = Some(self.ensure_function_type(&params, func.result));
            }
        }
        self.functions = funcs;
    }

    /// Decode a module from version-11 binary bytes.
    pub fn from_binary(bytes: &[u8]) -> Result<Module> {
        crate::binary::read(bytes)
    }

    /// Encode to version-11 binary bytes.
    pub fn to_binary(&mut self) -> Result<Vec<u8>> {
        self.finalize_types();
        crate::binary::write(self)
    }

    /// Encode with opcode-table compression, one table per chunk of
    /// `chunk_sizes` functions (a single table over everything if empty).
    pub fn to_binary_compressed(&mut self, chunk_sizes: &[usize]) -> Result<Vec<u8>> {
        self.finalize_types();
        crate::binary::write_compressed(self, chunk_sizes)
    }
}
