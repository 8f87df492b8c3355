//! Mutual-information registration with a cubic B-spline free-form
//! deformation.
//!
//! A [`RegistrationSession`] resolves every ROI voxel of the fixed volume
//! into the moving volume, fills partial-volume joint histograms, scores
//! them by negative mutual information and hands the analytic gradient to
//! a bounded optimizer.

pub mod config;
pub mod correspondence;
pub mod error;
pub mod evaluator;
pub mod metric;
pub mod optimizer;
pub mod progress;
pub mod session;
pub mod validation;

pub use config::{AccumulationStrategy, HistogramKind, OptimizerKind, RegistrationConfig};
pub use correspondence::{Correspondence, CorrespondenceFailure, CorrespondenceResolver};
pub use error::{RegistrationError, Result};
pub use evaluator::{Evaluation, Evaluator};
pub use metric::{Binning, HistogramAccumulator, HistogramSet};
pub use optimizer::{
    build_optimizer, LbfgsbOptimizer, Objective, OptimizationOutcome, Optimizer, OptimizerSettings,
    SteepestDescentOptimizer, TerminationReason,
};
pub use progress::{HistoryCallback, LoggingCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use session::{OptimizationReport, RegistrationSession};
