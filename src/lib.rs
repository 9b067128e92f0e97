//! STRUDEL: a Wasm AST transformation framework.
//!
//! Parses the pre-MVP (version 11) Wasm binary format into a mutable
//! expression tree, runs size-oriented optimization passes over it, and
//! re-emits binary, optionally compressed with a learned opcode table.

#![allow(dead_code)]

pub mod analysis;
mod arena;
pub mod binary;
pub mod cfg;
mod errors;
mod ir;
mod pass;
pub mod passes;
pub mod walker;

pub use arena::*;
pub use errors::*;
pub use ir::*;
pub use pass::*;
