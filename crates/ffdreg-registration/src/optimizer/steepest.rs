//! Steepest descent with an adaptive, trust-region style step length.
//!
//! Each trial moves `alpha` along the normalized negative gradient. The
//! gain ratio between the actual and the linearly predicted improvement
//! decides whether the trial is accepted and how `alpha` changes.

use super::state::{
    norm2, project, IterationRecord, OptimizationOutcome, OptimizerSettings, OptimizerState,
    TerminationReason,
};
use super::trait_::{Objective, Optimizer};
use crate::error::Result;

const SHRINK_BELOW: f64 = 0.25;
const GROW_ABOVE: f64 = 0.75;
/// Smallest step relative to the initial one.
const MIN_STEP_RATIO: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct SteepestDescentOptimizer {
    settings: OptimizerSettings,
}

impl SteepestDescentOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }
}

impl Optimizer for SteepestDescentOptimizer {
    fn name(&self) -> &'static str {
        "steepest descent"
    }

    fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    fn minimize(
        &mut self,
        objective: &mut dyn Objective,
        x0: &[f64],
        observer: &mut dyn FnMut(&IterationRecord),
    ) -> Result<OptimizationOutcome> {
        let settings = &self.settings;
        let n = x0.len();
        let mut state = OptimizerState::new(settings, n);
        let min_step = settings.initial_step * MIN_STEP_RATIO;

        let mut x = x0.to_vec();
        project(&mut x, settings.bound);
        let mut g = vec![0.0; n];
        let mut f = state.evaluate(objective, &x, &mut g)?;

        let mut x_new = vec![0.0; n];
        let mut g_new = vec![0.0; n];
        let mut alpha = settings.initial_step;

        let reason = loop {
            if state.iterations_exhausted() {
                break TerminationReason::MaxIterations;
            }
            let g_norm = norm2(&g);
            if g_norm == 0.0 {
                break TerminationReason::Converged;
            }
            if state.evaluations_exhausted() {
                break TerminationReason::MaxEvaluations;
            }

            for i in 0..n {
                x_new[i] = x[i] - alpha * g[i] / g_norm;
            }
            project(&mut x_new, settings.bound);
            let predicted: f64 = g.iter().zip(x_new.iter().zip(&x)).map(|(gi, (a, b))| -gi * (a - b)).sum();
            let f_trial = state.evaluate(objective, &x_new, &mut g_new)?;
            let actual = f - f_trial;
            let gain = if predicted > 0.0 { actual / predicted } else { -1.0 };
            tracing::trace!("Trial alpha={:.3e} f={:.6} gain={:.3}", alpha, f_trial, gain);

            if gain < 0.0 {
                alpha *= 0.5;
                if alpha < min_step {
                    tracing::debug!("Step length fell below {:.3e}", min_step);
                    break TerminationReason::Converged;
                }
                continue;
            }

            let step = x_new.iter().zip(&x).fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
            std::mem::swap(&mut x, &mut x_new);
            std::mem::swap(&mut g, &mut g_new);
            let f_prev = f;
            f = f_trial;
            state.iteration += 1;

            if gain < SHRINK_BELOW {
                alpha *= 0.5;
            } else if gain > GROW_ABOVE {
                alpha *= 2.0;
            }

            observer(&state.record(f, step, norm2(&g)));

            if state.converged(f_prev, f) {
                break TerminationReason::Converged;
            }
            if alpha < min_step {
                break TerminationReason::Converged;
            }
        };

        let outcome = state.finish(reason);
        tracing::info!(
            "{} stopped ({}) after {} iterations, {} evaluations, best {:.6}",
            self.name(),
            outcome.reason,
            outcome.iterations,
            outcome.evaluations,
            outcome.best_value
        );
        Ok(outcome)
    }
}
