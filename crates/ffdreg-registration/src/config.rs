//! Registration configuration.
//!
//! Variants are plain enums resolved once when a session is built.

use serde::{Deserialize, Serialize};

/// How intensity values are mapped to histogram bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramKind {
    /// Bins of equal width between the volume minimum and maximum.
    #[default]
    EqualSpaced,
    /// Minimum-variance partition of a fine pre-histogram.
    VOptimal,
}

/// Optimization algorithm driving the coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Bounded limited-memory quasi-Newton.
    #[default]
    Lbfgsb,
    /// Steepest descent with an adaptive step.
    SteepestDescent,
}

/// How concurrent workers share the histogram tables during accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationStrategy {
    /// Every worker fills private tables that are summed at the end.
    #[default]
    PrivateMerge,
    /// Shared tables with one lock per bin.
    PerBinLock,
    /// Shared tables behind a single lock.
    CriticalSection,
}

/// Configuration of one registration stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Bins of the fixed-image marginal.
    pub fixed_bins: usize,
    /// Bins of the moving-image marginal.
    pub moving_bins: usize,
    pub histogram: HistogramKind,
    pub optimizer: OptimizerKind,
    pub strategy: AccumulationStrategy,
    /// Maximum optimizer iterations.
    pub max_iterations: usize,
    /// Maximum score/gradient evaluations.
    pub max_evaluations: usize,
    /// Iterations before the relative-improvement test may stop the run.
    pub min_iterations: usize,
    /// Relative score improvement below which the run has converged.
    pub convergence_tolerance: f64,
    /// Coefficients are kept within `[-bound, bound]` (mm).
    pub coefficient_bound: f64,
    /// Correction pairs kept by the quasi-Newton optimizer.
    pub lbfgs_history: usize,
    /// Largest coefficient change (mm) of the first step.
    pub initial_step: f64,
    /// Distance between knots (mm) per axis.
    pub knot_spacing: [f64; 3],
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            fixed_bins: 32,
            moving_bins: 32,
            histogram: HistogramKind::EqualSpaced,
            optimizer: OptimizerKind::Lbfgsb,
            strategy: AccumulationStrategy::PrivateMerge,
            max_iterations: 100,
            max_evaluations: 500,
            min_iterations: 2,
            convergence_tolerance: 1e-5,
            coefficient_bound: 100.0,
            lbfgs_history: 5,
            initial_step: 1.0,
            knot_spacing: [15.0; 3],
        }
    }
}

impl RegistrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the same bin count for both images.
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.fixed_bins = bins;
        self.moving_bins = bins;
        self
    }

    pub fn with_fixed_bins(mut self, bins: usize) -> Self {
        self.fixed_bins = bins;
        self
    }

    pub fn with_moving_bins(mut self, bins: usize) -> Self {
        self.moving_bins = bins;
        self
    }

    pub fn with_histogram(mut self, kind: HistogramKind) -> Self {
        self.histogram = kind;
        self
    }

    pub fn with_optimizer(mut self, kind: OptimizerKind) -> Self {
        self.optimizer = kind;
        self
    }

    pub fn with_strategy(mut self, strategy: AccumulationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_max_evaluations(mut self, evaluations: usize) -> Self {
        self.max_evaluations = evaluations;
        self
    }

    pub fn with_min_iterations(mut self, iterations: usize) -> Self {
        self.min_iterations = iterations;
        self
    }

    pub fn with_convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = tolerance;
        self
    }

    pub fn with_coefficient_bound(mut self, bound: f64) -> Self {
        self.coefficient_bound = bound;
        self
    }

    pub fn with_lbfgs_history(mut self, history: usize) -> Self {
        self.lbfgs_history = history;
        self
    }

    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
        self
    }

    pub fn with_knot_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.knot_spacing = spacing;
        self
    }
}
