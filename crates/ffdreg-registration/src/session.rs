//! Registration session: one fixed/moving pair, one transform, one run.

use std::sync::Arc;

use ffdreg_core::{BSplineTransform, Roi, RoiMask, Volume};

use crate::config::RegistrationConfig;
use crate::error::Result;
use crate::evaluator::{Evaluation, Evaluator};
use crate::metric::{HistogramAccumulator, HistogramSet};
use crate::optimizer::{build_optimizer, Objective, Optimizer, OptimizerSettings, TerminationReason};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::validation::{validate_config, validate_mask, validate_roi, validate_volume};

/// Summary of [`RegistrationSession::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub reason: TerminationReason,
    pub iterations: usize,
    pub evaluations: usize,
    /// Score of the starting coefficients.
    pub initial_score: f64,
    pub best_score: f64,
    /// Score after every accepted iteration.
    pub trace: Vec<f64>,
}

impl OptimizationReport {
    /// Score decrease from the start to the best point.
    pub fn improvement(&self) -> f64 {
        self.initial_score - self.best_score
    }
}

/// Owns the transform, histograms and optimizer of a registration of
/// `moving` onto `fixed`.
pub struct RegistrationSession<'a> {
    config: RegistrationConfig,
    fixed: &'a Volume,
    moving: &'a Volume,
    fixed_mask: Option<&'a RoiMask>,
    moving_mask: Option<&'a RoiMask>,
    transform: BSplineTransform,
    histograms: HistogramSet,
    accumulator: HistogramAccumulator,
    optimizer: Box<dyn Optimizer>,
    tracker: ProgressTracker,
}

impl<'a> RegistrationSession<'a> {
    /// Validate the inputs and set up an identity transform over the whole
    /// fixed volume.
    pub fn new(config: RegistrationConfig, fixed: &'a Volume, moving: &'a Volume) -> Result<Self> {
        validate_config(&config)?;
        validate_volume(fixed, "fixed")?;
        validate_volume(moving, "moving")?;

        let transform = BSplineTransform::new(
            fixed.geometry(),
            Roi::whole(fixed.dims()),
            config.knot_spacing,
        )?;
        let histograms = HistogramSet::new(
            config.histogram,
            config.fixed_bins,
            config.moving_bins,
            fixed,
            moving,
        );
        let accumulator = HistogramAccumulator::new(config.strategy);
        let optimizer = build_optimizer(config.optimizer, OptimizerSettings::from(&config));

        tracing::info!(
            "Registration session: fixed {:?}, moving {:?}, {} regions, {} coefficients, {} optimizer, {:?} accumulation",
            fixed.dims(),
            moving.dims(),
            transform.num_regions(),
            transform.num_coefficients(),
            optimizer.name(),
            config.strategy
        );

        Ok(Self {
            config,
            fixed,
            moving,
            fixed_mask: None,
            moving_mask: None,
            transform,
            histograms,
            accumulator,
            optimizer,
            tracker: ProgressTracker::new(),
        })
    }

    /// Restrict the transform to `roi` of the fixed volume. Resets the
    /// coefficients.
    pub fn with_roi(mut self, roi: Roi) -> Result<Self> {
        validate_roi(&roi, self.fixed.dims())?;
        self.transform = BSplineTransform::new(self.fixed.geometry(), roi, self.config.knot_spacing)?;
        tracing::debug!(
            "ROI offset {:?} dim {:?}: lattice {:?}",
            roi.offset,
            roi.dim,
            self.transform.cdims()
        );
        Ok(self)
    }

    /// Only fixed voxels inside `mask` are sampled.
    pub fn with_fixed_mask(mut self, mask: &'a RoiMask) -> Result<Self> {
        validate_mask(mask, self.fixed)?;
        self.fixed_mask = Some(mask);
        Ok(self)
    }

    /// Samples whose nearest moving voxel is outside `mask` are dropped.
    pub fn with_moving_mask(mut self, mask: &'a RoiMask) -> Result<Self> {
        validate_mask(mask, self.moving)?;
        self.moving_mask = Some(mask);
        Ok(self)
    }

    /// Start from `coefficients` instead of the identity.
    pub fn with_initial_coefficients(mut self, coefficients: &[f32]) -> Result<Self> {
        self.transform.set_coefficients(coefficients)?;
        Ok(self)
    }

    /// Start from a previously computed transform, e.g. one loaded from disk.
    pub fn with_transform(mut self, transform: BSplineTransform) -> Result<Self> {
        transform.check_geometry(self.fixed.geometry())?;
        self.transform = transform;
        Ok(self)
    }

    /// Observe every accepted iteration of [`run`](Self::run).
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.tracker.add_callback(callback);
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn transform(&self) -> &BSplineTransform {
        &self.transform
    }

    /// Consume the session and keep its transform.
    pub fn into_transform(self) -> BSplineTransform {
        self.transform
    }

    /// Histograms of the most recent evaluation.
    pub fn histograms(&self) -> &HistogramSet {
        &self.histograms
    }

    fn evaluator(&self) -> Result<Evaluator<'a>> {
        Evaluator::new(
            self.fixed,
            self.moving,
            self.fixed_mask,
            self.moving_mask,
            &self.histograms,
            self.accumulator,
        )
    }

    /// Score and gradient of the current transform.
    pub fn evaluate(&mut self) -> Result<Evaluation> {
        let evaluator = self.evaluator()?;
        Ok(evaluator.evaluate(&self.transform, &mut self.histograms))
    }

    /// Optimize the coefficients and keep the best transform found.
    pub fn run(&mut self) -> Result<OptimizationReport> {
        let evaluator = self.evaluator()?;
        let initial_score = evaluator.accumulate(&self.transform, &mut self.histograms);
        self.tracker.start(initial_score);

        let x0: Vec<f64> = self.transform.coefficients().iter().map(|&c| f64::from(c)).collect();
        let mut trace = Vec::new();
        let tracker = &self.tracker;
        let mut objective = TransformObjective {
            evaluator: &evaluator,
            transform: &mut self.transform,
            histograms: &mut self.histograms,
            buffer: vec![0.0; x0.len()],
        };
        let outcome = self.optimizer.minimize(&mut objective, &x0, &mut |record| {
            trace.push(record.value);
            tracker.update(record);
        })?;

        let best: Vec<f32> = outcome.best_x.iter().map(|&v| v as f32).collect();
        self.transform.set_coefficients(&best)?;
        evaluator.accumulate(&self.transform, &mut self.histograms);
        self.tracker.complete(outcome.reason, outcome.best_value);

        Ok(OptimizationReport {
            reason: outcome.reason,
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            initial_score,
            best_score: outcome.best_value,
            trace,
        })
    }
}

/// Adapts the evaluator to the optimizer's flat `f64` parameter vector.
struct TransformObjective<'e, 'a> {
    evaluator: &'e Evaluator<'a>,
    transform: &'e mut BSplineTransform,
    histograms: &'e mut HistogramSet,
    buffer: Vec<f32>,
}

impl Objective for TransformObjective<'_, '_> {
    fn evaluate(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<f64> {
        for (b, &v) in self.buffer.iter_mut().zip(x) {
            *b = v as f32;
        }
        self.transform.set_coefficients(&self.buffer)?;
        let evaluation = self.evaluator.evaluate(self.transform, self.histograms);
        gradient.copy_from_slice(&evaluation.gradient);
        Ok(evaluation.score)
    }
}
