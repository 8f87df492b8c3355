//! Objective and optimizer traits.

use super::state::{IterationRecord, OptimizationOutcome, OptimizerSettings};
use crate::error::Result;

/// A differentiable function to minimize.
pub trait Objective {
    /// Value at `x`; writes `df/dx` into `gradient` (same length as `x`).
    ///
    /// Errors abort the optimization.
    fn evaluate(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<f64>;
}

/// Bounded minimizer of an [`Objective`].
pub trait Optimizer: Send {
    fn name(&self) -> &'static str;

    fn settings(&self) -> &OptimizerSettings;

    /// Minimize `objective` from `x0` inside the box `[-bound, bound]`.
    ///
    /// `observer` is called after every accepted iteration. The outcome
    /// carries the best point ever evaluated.
    fn minimize(
        &mut self,
        objective: &mut dyn Objective,
        x0: &[f64],
        observer: &mut dyn FnMut(&IterationRecord),
    ) -> Result<OptimizationOutcome>;
}
