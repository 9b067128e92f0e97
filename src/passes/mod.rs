//! Optimization and diagnostic passes.

mod code_pushing;
mod drop_return_values;
mod loop_var_splitting;
mod metrics;
mod reorder_functions;
mod simplify_locals;

pub use code_pushing::CodePushing;
pub use drop_return_values::DropReturnValues;
pub use loop_var_splitting::LoopVarSplitting;
pub use metrics::Metrics;
pub use reorder_functions::ReorderFunctions;
pub use simplify_locals::SimplifyLocals;
