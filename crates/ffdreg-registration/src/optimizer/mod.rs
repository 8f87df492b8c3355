//! Optimizers over the transform coefficients.

pub mod trait_;
pub mod state;
pub mod lbfgsb;
pub mod steepest;

pub use trait_::{Objective, Optimizer};
pub use state::{IterationRecord, OptimizationOutcome, OptimizerSettings, TerminationReason};
pub use lbfgsb::LbfgsbOptimizer;
pub use steepest::SteepestDescentOptimizer;

use crate::config::OptimizerKind;

/// Build the optimizer selected by `kind`.
pub fn build_optimizer(kind: OptimizerKind, settings: OptimizerSettings) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Lbfgsb => Box::new(LbfgsbOptimizer::new(settings)),
        OptimizerKind::SteepestDescent => Box::new(SteepestDescentOptimizer::new(settings)),
    }
}
