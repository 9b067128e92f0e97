//! Sorts functions to reduce the size and improve compressibility of the
//! output binary. Several factors, in decreasing importance:
//!
//! * Functions with many uses get low indices, so each call's LEB operand
//!   is small.
//! * All things considered, larger functions come first, within the index
//!   ranges that keep call LEB lengths intact.
//! * All things considered, similar functions sit close together: similar
//!   byte streams compress well when adjacent (a C++ template might expand
//!   to two functions differing in one byte).

use std::sync::atomic::{AtomicU32, Ordering};

use fxhash::{FxHashMap, FxHashSet};
use log::warn;

use crate::analysis::each_expr_post;
use crate::binary;
use crate::ir::{Expression, Function, Module, Name};
use crate::pass::Pass;

const BITS_PER_LEB_BYTE: usize = 7;

/// Bounded substring length for the similarity signature.
const MAX_SUBSTRING: usize = 8;

#[derive(Default)]
pub struct ReorderFunctions;

struct FunctionInfo {
    size: usize,
    /// Hashes of all bounded-length substrings of the encoded body.
    signature: FxHashSet<u32>,
}

type FunctionInfoMap = FxHashMap<Name, FunctionInfo>;

impl Pass for ReorderFunctions {
    fn name(&self) -> &'static str {
        "reorder-functions"
    }

    fn create(&self) -> Box<dyn Pass> {
        Box::new(ReorderFunctions)
    }

    fn run_module(&mut self, module: &mut Module) {
        sort_by_uses(module);
        // materialize encoded bodies for the refinement stages
        module.finalize_types();
        let (bytes, toc) = match binary::write_with_toc(module) {
            Ok(out) => out,
            Err(e) => {
                warn!("reorder-functions: module failed to encode: {}", e);
                return;
            }
        };
        let mut infos = FunctionInfoMap::default();
        for (func, range) in module.functions.iter().zip(&toc) {
            let data = &bytes[range.offset..range.offset + range.size];
            infos.insert(
                func.name.clone(),
                FunctionInfo {
                    size: range.size,
                    signature: signature(data),
                },
            );
        }
        refine_by_size(module, &infos);
        refine_by_similarity(module, &infos);
    }
}

/// Stage 1: sort by number of uses, descending; ties keep their original
/// order.
fn sort_by_uses(module: &mut Module) {
    // pre-populate with zeros so the parallel counters never insert
    let uses: FxHashMap<Name, AtomicU32> = module
        .functions
        .iter()
        .map(|f| (f.name.clone(), AtomicU32::new(0)))
        .collect();
    {
        let uses = &uses;
        let funcs: Vec<&Function> = module.functions.iter().collect();
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let chunk = funcs.len().div_ceil(threads).max(1);
        std::thread::scope(|scope| {
            for slice in funcs.chunks(chunk) {
                scope.spawn(move || {
                    for func in slice {
                        each_expr_post(&func.arena, func.body, |id| {
                            if let Expression::Call { target, .. } = &func.arena[id] {
                                if let Some(counter) = uses.get(target) {
                                    counter.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        });
                    }
                });
            }
        });
    }
    let mut counts: FxHashMap<Name, u32> = uses
        .into_iter()
        .map(|(name, counter)| (name, counter.into_inner()))
        .collect();
    // global uses: start, exports, table entries
    if let Some(start) = &module.start {
        if let Some(c) = counts.get_mut(start) {
            *c += 1;
        }
    }
    for export in &module.exports {
        if let Some(c) = counts.get_mut(&export.value) {
            *c += 1;
        }
    }
    for name in &module.table.names {
        if let Some(c) = counts.get_mut(name) {
            *c += 1;
        }
    }

    let mut funcs: Vec<Function> = std::mem::take(&mut module.functions);
    funcs.sort_by(|a, b| {
        let ua = counts.get(&a.name).copied().unwrap_or(0);
        let ub = counts.get(&b.name).copied().unwrap_or(0);
        ub.cmp(&ua)
    });
    module.functions = funcs;
}

/// Stage 2: sort by encoded size, descending, within buckets whose index
/// ranges fit in a fixed number of LEB bytes, so stage 1's operand sizes
/// are preserved.
fn refine_by_size(module: &mut Module, infos: &FunctionInfoMap) {
    let mut funcs: Vec<Function> = std::mem::take(&mut module.functions);
    let mut start = 0usize;
    let mut bits = 0usize;
    while start < funcs.len() {
        bits += BITS_PER_LEB_BYTE;
        let end = if bits < usize::BITS as usize {
            (start + (1usize << bits)).min(funcs.len())
        } else {
            funcs.len()
        };
        funcs[start..end].sort_by(|a, b| {
            let sa = infos.get(&a.name).map_or(0, |i| i.size);
            let sb = infos.get(&b.name).map_or(0, |i| i.size);
            sb.cmp(&sa)
        });
        start = end;
    }
    module.functions = funcs;
}

/// Stage 3: greedy similarity ordering within fixed chunks of one LEB
/// byte's worth of indices. Each step picks the function most similar to
/// the one just placed (crossing chunk boundaries for the reference, as it
/// should). In theory a clustering algorithm could do better; chunks also
/// cap the O(n^2) comparison work.
fn refine_by_similarity(module: &mut Module, infos: &FunctionInfoMap) {
    let mut funcs: Vec<Function> = std::mem::take(&mut module.functions);
    let chunk_size = 1usize << BITS_PER_LEB_BYTE;
    let mut start = 0usize;
    let mut last: Option<Name> = None;
    while start < funcs.len() {
        let end = (start + chunk_size).min(funcs.len());
        for i in start..end {
            if let Some(last) = &last {
                let mut best_index = i;
                let mut best = difference(last, &funcs[i].name, infos);
                for (j, func) in funcs.iter().enumerate().take(end).skip(i + 1) {
                    let curr = difference(last, &func.name, infos);
                    if curr < best {
                        best = curr;
                        best_index = j;
                    }
                }
                funcs.swap(i, best_index);
            }
            // the very first function (also the largest) stays in place
            last = Some(funcs[i].name.clone());
        }
        start = end;
    }
    module.functions = funcs;
}

/// How different two encoded bodies are; lower is more similar. Counts
/// shared bounded-length substring hashes, the stand-in for a mutual-
/// compressibility measure.
fn difference(a: &Name, b: &Name, infos: &FunctionInfoMap) -> i64 {
    let (Some(a), Some(b)) = (infos.get(a), infos.get(b)) else {
        return 0;
    };
    let (small, large) = if a.signature.len() <= b.signature.len() {
        (&a.signature, &b.signature)
    } else {
        (&b.signature, &a.signature)
    };
    let shared = small.iter().filter(|h| large.contains(h)).count();
    -(shared as i64)
}

/// Rolling hashes of every substring up to `MAX_SUBSTRING` bytes.
fn signature(data: &[u8]) -> FxHashSet<u32> {
    let mut out = FxHashSet::default();
    for start in 0..data.len() {
        let mut hash: u32 = 5381;
        for &byte in data.iter().skip(start).take(MAX_SUBSTRING) {
            hash = (hash << 5).wrapping_add(hash) ^ byte as u32;
            out.insert(hash);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Type};

    /// A function that calls `target` `calls` times and pads with `nops`
    /// nops.
    fn make_func(name: &str, target: &str, calls: usize, nops: usize) -> Function {
        let mut func = Function::new(name, vec![], Type::None);
        let mut b = Builder::new(&mut func);
        let mut list = vec![];
        for _ in 0..calls {
            list.push(b.make_call(target, vec![], Type::None));
        }
        for _ in 0..nops {
            list.push(b.make_nop());
        }
        let body = b.make_block(list);
        func.body = body;
        func
    }

    fn names(module: &Module) -> Vec<String> {
        module
            .functions
            .iter()
            .map(|f| f.name.to_string())
            .collect()
    }

    #[test]
    fn sorts_by_use_count() {
        let mut module = Module::default();
        module.add_function(make_func("a", "a", 1, 0));
        module.add_function(make_func("b", "b", 2, 0));
        module.add_function(make_func("c", "c", 3, 0));
        ReorderFunctions.run_module(&mut module);
        assert_eq!(names(&module), ["c", "b", "a"]);
    }

    #[test]
    fn sort_is_stable_over_declaration_order() {
        let mut module = Module::default();
        module.add_function(make_func("a", "a", 1, 0));
        module.add_function(make_func("c", "c", 3, 0));
        module.add_function(make_func("b", "b", 2, 0));
        ReorderFunctions.run_module(&mut module);
        assert_eq!(names(&module), ["c", "b", "a"]);
    }

    #[test]
    fn similarity_pulls_matching_bodies_together() {
        // uses: a=1, b=1, c=2. After the use sort: c, a, b. The nop padding
        // makes b's bytes resemble c's, so the similarity stage moves b
        // next to c.
        let mut module = Module::default();
        module.add_function(make_func("a", "a", 1, 0));
        module.add_function(make_func("b", "b", 1, 4));
        module.add_function(make_func("c", "c", 2, 4));
        ReorderFunctions.run_module(&mut module);
        assert_eq!(names(&module), ["c", "b", "a"]);
    }

    #[test]
    fn exports_and_start_count_as_uses() {
        let mut module = Module::default();
        module.add_function(make_func("a", "a", 0, 0));
        module.add_function(make_func("b", "b", 0, 1));
        module.start = Some("b".into());
        ReorderFunctions.run_module(&mut module);
        assert_eq!(names(&module), ["b", "a"]);
    }
}
