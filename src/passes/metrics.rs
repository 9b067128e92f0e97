//! Prints metrics on a module. If run more than once, shows the diff.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::analysis::each_expr_post;
use crate::ir::Module;
use crate::pass::Pass;

/// The previous run's counts, shared across pass instances so a pipeline
/// with two metrics entries reports what the passes between them changed.
static LAST_COUNTS: Mutex<Option<BTreeMap<&'static str, i64>>> = Mutex::new(None);

#[derive(Default)]
pub struct Metrics {
    counts: BTreeMap<&'static str, i64>,
}

impl Metrics {
    pub fn counts(&self) -> &BTreeMap<&'static str, i64> {
        &self.counts
    }

    fn report(&self, last: Option<&BTreeMap<&'static str, i64>>) {
        println!("Counts");
        let mut total = 0i64;
        for (&key, &value) in &self.counts {
            print!(" {:<25}: {:>8}", key, value);
            if let Some(last) = last {
                let before = last.get(key).copied().unwrap_or(0);
                let delta = value - before;
                if delta != 0 {
                    print!(" {:>+8}", delta);
                }
            }
            println!();
            total += value;
        }
        println!("{:<26}: {:>8}", "Total", total);
    }
}

impl Pass for Metrics {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn create(&self) -> Box<dyn Pass> {
        Box::new(Metrics::default())
    }

    fn run_module(&mut self, module: &mut Module) {
        self.counts = BTreeMap::new();
        for func in &module.functions {
            each_expr_post(&func.arena, func.body, |id| {
                *self.counts.entry(func.arena[id].kind_name()).or_insert(0) += 1;
            });
        }
        let mut last = LAST_COUNTS.lock().unwrap_or_else(|e| e.into_inner());
        self.report(last.as_ref());
        *last = Some(self.counts.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Function, Type};

    #[test]
    fn counts_every_kind_once_per_node() {
        let mut module = Module::default();
        let mut func = Function::new("t", vec![], Type::None);
        let mut b = Builder::new(&mut func);
        let c = b.make_i32_const(1);
        let d = b.make_drop(c);
        let nop = b.make_nop();
        let body = b.make_block(vec![d, nop]);
        func.body = body;
        module.add_function(func);

        let mut pass = Metrics::default();
        pass.run_module(&mut module);
        assert_eq!(pass.counts()["const"], 1);
        assert_eq!(pass.counts()["drop"], 1);
        assert_eq!(pass.counts()["nop"], 1);
        assert_eq!(pass.counts()["block"], 1);
    }
}
