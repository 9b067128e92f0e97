//! Pass framework: the `Pass` trait, a literal-keyed registry, and a runner
//! with a worker pool for function-parallel passes.

use anyhow::{bail, Result};
use log::debug;

use crate::ir::{Function, Module};

/// A module transformation. Passes default to iterating functions serially;
/// a pass that keeps no cross-function state during its per-function visit
/// declares `is_function_parallel` and supplies fresh worker instances via
/// `create`, and the runner dispatches functions across threads.
pub trait Pass: Send {
    fn name(&self) -> &'static str;

    fn is_function_parallel(&self) -> bool {
        false
    }

    /// A fresh instance carrying no state, for parallel workers.
    fn create(&self) -> Box<dyn Pass>;

    fn run_module(&mut self, module: &mut Module) {
        let mut funcs = std::mem::take(&mut module.functions);
        for func in &mut funcs {
            self.run_function(module, func);
        }
        module.functions = funcs;
    }

    fn run_function(&mut self, module: &Module, func: &mut Function) {
        let _ = (module, func);
    }
}

pub fn pass_names() -> &'static [&'static str] {
    &[
        "simplify-locals",
        "code-pushing",
        "loop-var-splitting",
        "reorder-functions",
        "drop-return-values",
        "metrics",
    ]
}

pub fn create_pass(name: &str) -> Option<Box<dyn Pass>> {
    use crate::passes::*;
    match name {
        "simplify-locals" => Some(Box::new(SimplifyLocals::default())),
        "code-pushing" => Some(Box::new(CodePushing::default())),
        "loop-var-splitting" => Some(Box::new(LoopVarSplitting::default())),
        "reorder-functions" => Some(Box::new(ReorderFunctions::default())),
        "drop-return-values" => Some(Box::new(DropReturnValues::default())),
        "metrics" => Some(Box::new(Metrics::default())),
        _ => None,
    }
}

pub struct PassRunner {
    passes: Vec<Box<dyn Pass>>,
    threads: usize,
}

impl Default for PassRunner {
    fn default() -> PassRunner {
        PassRunner::new()
    }
}

impl PassRunner {
    pub fn new() -> PassRunner {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        PassRunner { passes: vec![], threads }
    }

    pub fn with_threads(threads: usize) -> PassRunner {
        PassRunner {
            passes: vec![],
            threads: threads.max(1),
        }
    }

    pub fn add(&mut self, name: &str) -> Result<()> {
        match create_pass(name) {
            Some(pass) => {
                self.passes.push(pass);
                Ok(())
            }
            None => bail!("unknown pass: {}", name),
        }
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// The canonical `-O` sequence: sink and coalesce locals, push code
    /// past conditionals, split loop variables, then lay functions out for
    /// size.
    pub fn add_default_optimization_passes(&mut self) {
        for name in [
            "simplify-locals",
            "code-pushing",
            "loop-var-splitting",
            "reorder-functions",
        ] {
            // registry names above are static
            let _ = self.add(name);
        }
    }

    /// Run all passes in order. Passes depend on their predecessors'
    /// postconditions; there is no cross-pass parallelism.
    pub fn run(&mut self, module: &mut Module) {
        let threads = self.threads;
        for pass in &mut self.passes {
            debug!("running pass {}", pass.name());
            if pass.is_function_parallel() && threads > 1 && module.functions.len() > 1 {
                run_function_parallel(pass.as_ref(), module, threads);
            } else {
                pass.run_module(module);
            }
        }
    }
}

/// Dispatch a function-parallel pass over disjoint chunks of the function
/// sequence. Each worker runs its own pass instance; the module minus its
/// functions is shared read-only.
fn run_function_parallel(pass: &dyn Pass, module: &mut Module, threads: usize) {
    let mut funcs: Vec<Function> = std::mem::take(&mut module.functions);
    let chunk = funcs.len().div_ceil(threads);
    {
        let module_view: &Module = module;
        std::thread::scope(|scope| {
            for slice in funcs.chunks_mut(chunk) {
                let mut worker = pass.create();
                scope.spawn(move || {
                    for func in slice {
                        worker.run_function(module_view, func);
                    }
                });
            }
        });
    }
    module.functions = funcs;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_listed_pass() {
        for name in pass_names() {
            let pass = create_pass(name).unwrap();
            assert_eq!(pass.name(), *name);
        }
        assert!(create_pass("no-such-pass").is_none());
    }
}
